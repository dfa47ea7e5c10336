//! Ordered parallel map over an iterator.

use crate::config::{PoolConfig, Workers};
use crate::error::{BoxError, Error, Result};
use crate::executor::{Handle, Pool};
use crate::telemetry::{CompletionMeter, DepthMeter};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Below this many items a map runs in the calling thread.
pub const DEFAULT_SERIAL_THRESHOLD: usize = 4;

/// Builder for mapping a function over an iterator on a worker pool.
///
/// Results come back in input order. Short inputs are processed serially.
///
/// ```
/// use parfor_rs::ParMap;
///
/// let squares = ParMap::new(|i: &u64, a: &(u64,), _: &()| Ok(a.0 * i * i), 0..10u64)
///     .args((3,))
///     .workers(2usize)
///     .bar(false)
///     .run()
///     .unwrap();
/// assert_eq!(squares, vec![0, 3, 12, 27, 48, 75, 108, 147, 192, 243]);
/// ```
pub struct ParMap<It, F, A = (), K = ()> {
    iter: It,
    fun: F,
    args: A,
    kwargs: K,
    length: Option<usize>,
    serial_threshold: usize,
    serial: Option<bool>,
    config: PoolConfig,
    desc: Option<String>,
    bar: bool,
    qbar: bool,
    meter: Option<Arc<dyn CompletionMeter>>,
}

impl<It, F, A, K> ParMap<It, F, A, K>
where
    It: Iterator,
{
    /// Map `fun` over `iterable` with default arguments.
    pub fn new<T, O>(fun: F, iterable: T) -> Self
    where
        T: IntoIterator<IntoIter = It>,
        F: Fn(&It::Item, &A, &K) -> std::result::Result<O, BoxError>,
        A: Default,
        K: Default,
    {
        Self::with_args(fun, iterable, A::default(), K::default())
    }

    pub fn with_args<T, O>(fun: F, iterable: T, args: A, kwargs: K) -> Self
    where
        T: IntoIterator<IntoIter = It>,
        F: Fn(&It::Item, &A, &K) -> std::result::Result<O, BoxError>,
    {
        Self {
            iter: iterable.into_iter(),
            fun,
            args,
            kwargs,
            length: None,
            serial_threshold: DEFAULT_SERIAL_THRESHOLD,
            serial: None,
            config: PoolConfig::default(),
            desc: None,
            bar: true,
            qbar: true,
            meter: None,
        }
    }

    pub fn args(mut self, args: A) -> Self {
        self.args = args;
        self
    }

    pub fn kwargs(mut self, kwargs: K) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Number of items, for iterators without an exact size hint.
    pub fn length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    /// Alias for [`length`](Self::length).
    pub fn total(self, total: usize) -> Self {
        self.length(total)
    }

    pub fn serial_threshold(mut self, threshold: usize) -> Self {
        self.serial_threshold = threshold;
        self
    }

    /// Force serial (`true`) or parallel (`false`) execution.
    pub fn serial(mut self, serial: bool) -> Self {
        self.serial = Some(serial);
        self
    }

    pub fn workers(mut self, workers: impl Into<Workers>) -> Self {
        self.config.workers = workers.into();
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Pool settings; replaces anything set through `workers` or `debug`.
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    /// Show a completion bar (with the `progress` feature).
    pub fn bar(mut self, bar: bool) -> Self {
        self.bar = bar;
        self
    }

    /// Show the task buffer bar (with the `progress` feature).
    pub fn qbar(mut self, qbar: bool) -> Self {
        self.qbar = qbar;
        self
    }

    /// Report completions to `meter` instead of a progress bar.
    pub fn meter(mut self, meter: Arc<dyn CompletionMeter>) -> Self {
        self.meter = Some(meter);
        self
    }

    fn resolved_length(&self) -> Option<usize> {
        self.length.or_else(|| match self.iter.size_hint() {
            (lower, Some(upper)) if lower == upper => Some(lower),
            _ => None,
        })
    }

    fn meters(
        &mut self,
        length: Option<usize>,
        parallel: bool,
    ) -> (Option<Arc<dyn CompletionMeter>>, Option<Arc<dyn DepthMeter>>) {
        if let Some(meter) = self.meter.take() {
            meter.set_total(length.map(|n| n as u64));
            return (Some(meter), None);
        }

        #[cfg(feature = "progress")]
        let meters = {
            let (bar, buffer) = crate::telemetry::progress::map_bars(
                self.desc.as_deref(),
                length,
                self.bar,
                self.qbar && parallel,
            );
            (
                bar.map(|b| Arc::new(b) as Arc<dyn CompletionMeter>),
                buffer.map(|b| Arc::new(b) as Arc<dyn DepthMeter>),
            )
        };

        #[cfg(not(feature = "progress"))]
        let meters = {
            let _ = parallel;
            (None, None)
        };

        meters
    }
}

impl<It, F, A, K> std::fmt::Debug for ParMap<It, F, A, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParMap")
            .field("length", &self.length)
            .field("serial_threshold", &self.serial_threshold)
            .field("serial", &self.serial)
            .field("config", &self.config)
            .field("desc", &self.desc)
            .finish_non_exhaustive()
    }
}

impl<It, F, O, A, K> ParMap<It, F, A, K>
where
    It: Iterator,
    It::Item: Send + 'static,
    O: Send + 'static,
    A: Serialize + DeserializeOwned + Send + 'static,
    K: Serialize + DeserializeOwned + Send + 'static,
    F: Fn(&It::Item, &A, &K) -> std::result::Result<O, BoxError> + Send + Sync + 'static,
{
    /// Collect the results in input order.
    pub fn run(self) -> Result<Vec<O>> {
        Ok(self.run_indexed()?.into_iter().map(|(_, o)| o).collect())
    }

    /// Collect `(index, result)` pairs in input order.
    pub fn run_indexed(self) -> Result<Vec<(usize, O)>> {
        self.gather(false)?
            .into_iter()
            .map(|(i, r)| r.map(|o| (i, o)))
            .collect()
    }

    /// Collect one result per item, carrying on past failed items.
    ///
    /// Meant for debug mode: a failing item shows up as its
    /// [`Error::TaskFailed`] report while every other item still comes back.
    /// Only pool-level failures abort the whole map.
    pub fn run_results(self) -> Result<Vec<Result<O>>> {
        Ok(self.gather(true)?.into_iter().map(|(_, r)| r).collect())
    }

    fn gather(mut self, keep_going: bool) -> Result<Vec<(usize, Result<O>)>> {
        let length = self.resolved_length();
        let serial = self
            .serial
            .unwrap_or(matches!(length, Some(n) if n < self.serial_threshold));

        let (progress, depth) = self.meters(length, !serial);
        let result = if serial {
            self.run_serial(length, progress.as_ref(), keep_going)
        } else {
            self.run_parallel(length, progress.clone(), depth, keep_going)
        };

        if let Some(meter) = progress {
            meter.finish();
        }
        result
    }

    fn run_serial(
        self,
        length: Option<usize>,
        progress: Option<&Arc<dyn CompletionMeter>>,
        keep_going: bool,
    ) -> Result<Vec<(usize, Result<O>)>> {
        debug!("Mapping serially in the calling thread");
        let mut total = TotalTracker::new(length, progress.cloned());
        let mut out = Vec::with_capacity(self.iter.size_hint().0);
        for (i, item) in self.iter.enumerate() {
            total.seen(i + 1);
            let result = (self.fun)(&item, &self.args, &self.kwargs)
                .map_err(|e| Error::task(Handle::from(i), e));
            match result {
                Err(e) if !keep_going => return Err(e),
                result => out.push((i, result)),
            }
            if let Some(meter) = progress {
                meter.increment();
            }
        }
        Ok(out)
    }

    fn run_parallel(
        self,
        length: Option<usize>,
        progress: Option<Arc<dyn CompletionMeter>>,
        depth: Option<Arc<dyn DepthMeter>>,
        keep_going: bool,
    ) -> Result<Vec<(usize, Result<O>)>> {
        let mut pool = Pool::new(self.config, self.fun, self.args, self.kwargs)?;
        if let Some(meter) = progress.clone() {
            pool = pool.with_progress(meter);
        }
        if let Some(meter) = depth {
            pool = pool.with_depth_meter(meter);
        }
        debug!(
            workers = pool.worker_count(),
            length = ?length,
            "Mapping on worker pool"
        );

        let mut total = TotalTracker::new(length, progress);
        let mut count = 0usize;
        for (i, item) in self.iter.enumerate() {
            pool.submit_at(i, item)?;
            count = i + 1;
            total.seen(count);
        }

        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            match pool.retrieve(i) {
                Err(e) if !(keep_going && e.is_task_failure()) => return Err(e),
                result => out.push((i, result)),
            }
        }
        pool.close()?;
        Ok(out)
    }
}

/// Raises the progress total whenever more items turn up than announced.
struct TotalTracker {
    total: usize,
    meter: Option<Arc<dyn CompletionMeter>>,
}

impl TotalTracker {
    fn new(length: Option<usize>, meter: Option<Arc<dyn CompletionMeter>>) -> Self {
        Self {
            total: length.unwrap_or(0),
            meter,
        }
    }

    fn seen(&mut self, count: usize) {
        if count <= self.total {
            return;
        }
        self.total = count;
        if let Some(ref meter) = self.meter {
            meter.set_total(Some(count as u64));
        }
    }
}

/// Map `fun` over `iterable` with `args` and `kwargs`, preserving order.
///
/// ```
/// let words = parfor_rs::pmap(
///     |w: &String, sep: &(String,), _: &()| Ok(format!("{}{}", w, sep.0)),
///     vec!["a".to_string(), "b".to_string()],
///     (String::from("!"),),
///     (),
/// )
/// .unwrap();
/// assert_eq!(words, ["a!", "b!"]);
/// ```
pub fn pmap<T, F, O, A, K>(fun: F, iterable: T, args: A, kwargs: K) -> Result<Vec<O>>
where
    T: IntoIterator,
    T::Item: Send + 'static,
    O: Send + 'static,
    A: Serialize + DeserializeOwned + Send + 'static,
    K: Serialize + DeserializeOwned + Send + 'static,
    F: Fn(&T::Item, &A, &K) -> std::result::Result<O, BoxError> + Send + Sync + 'static,
{
    ParMap::with_args(fun, iterable, args, kwargs).run()
}
