use crate::error::{Error, Result};
use std::time::Duration;

/// How many worker threads a pool runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Workers {
    /// An absolute number of workers.
    Count(usize),
    /// A fraction of the available CPU cores, in `(0, 1]`.
    Fraction(f64),
}

impl Workers {
    pub fn resolve(&self) -> usize {
        self.resolve_with(num_cpus::get())
    }

    pub(crate) fn resolve_with(&self, cpus: usize) -> usize {
        match *self {
            Workers::Count(n) => n.max(1),
            Workers::Fraction(f) => ((f * cpus as f64) as usize).max(1),
        }
    }
}

impl Default for Workers {
    fn default() -> Self {
        Workers::Fraction(1.0 / 3.0)
    }
}

impl From<usize> for Workers {
    fn from(n: usize) -> Self {
        Workers::Count(n)
    }
}

impl From<f64> for Workers {
    /// Values below 1 are a share of the CPU cores, anything else a count.
    fn from(f: f64) -> Self {
        if f < 1.0 {
            Workers::Fraction(f)
        } else {
            Workers::Count(f as usize)
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: Workers,
    /// Hand failure reports back as errors instead of replaying the task.
    pub debug: bool,
    /// Decoded descriptors each worker keeps around.
    pub cache_capacity: usize,
    /// Queue capacity per worker.
    pub queue_factor: usize,
    pub poll_interval: Duration,
    pub thread_name_prefix: String,
    pub stack_size: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: Workers::default(),
            debug: false,
            cache_capacity: 48,
            queue_factor: 3,
            poll_interval: Duration::from_millis(20),
            thread_name_prefix: "parfor-worker".to_string(),
            stack_size: None,
        }
    }
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        match self.workers {
            Workers::Count(0) => return Err(Error::config("worker count must be > 0")),
            Workers::Count(n) if n > 1024 => {
                return Err(Error::config("worker count too large (max 1024)"))
            }
            Workers::Fraction(f) if !(f > 0.0 && f <= 1.0) => {
                return Err(Error::config("worker fraction must be in (0, 1]"))
            }
            _ => {}
        }

        if self.cache_capacity == 0 {
            return Err(Error::config("cache_capacity must be > 0"));
        }

        if self.queue_factor == 0 {
            return Err(Error::config("queue_factor must be > 0"));
        }

        if self.poll_interval.is_zero() {
            return Err(Error::config("poll_interval must be > 0"));
        }

        Ok(())
    }

    pub fn worker_threads(&self) -> usize {
        self.workers.resolve()
    }

    pub(crate) fn queue_capacity(&self, workers: usize) -> usize {
        self.queue_factor * workers
    }
}

#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    pub fn workers(mut self, workers: impl Into<Workers>) -> Self {
        self.config.workers = workers.into();
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.cache_capacity = capacity;
        self
    }

    pub fn queue_factor(mut self, factor: usize) -> Self {
        self.config.queue_factor = factor;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn build(self) -> Result<PoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
