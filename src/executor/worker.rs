// worker loop: pull a task, run it, publish the outcome
use super::panic_handler::{self, PanicInfo};
use super::task::{Handle, Outcome, Task};
use crate::codec::DescriptorCache;
use crate::error::{BoxError, Error};
use crate::telemetry::Metrics;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use serde::de::DeserializeOwned;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

pub type WorkerId = usize;

enum Failure {
    Decode(Error),
    Error(BoxError),
    Panic(PanicInfo),
}

impl Failure {
    fn report(&self, worker: WorkerId, handle: Handle) -> String {
        let mut out = format!("worker {} failed on task {}: ", worker, handle);
        match self {
            Failure::Decode(e) => {
                let _ = write!(out, "{}", e);
            }
            Failure::Error(e) => {
                let _ = write!(out, "{}", e);
                let mut source = e.source();
                while let Some(cause) = source {
                    let _ = write!(out, "\n  caused by: {}", cause);
                    source = cause.source();
                }
            }
            Failure::Panic(info) => {
                let _ = write!(out, "panicked: {}", info.message);
            }
        }
        out
    }
}

pub(crate) struct Worker<A, K> {
    pub id: WorkerId,
    debug: bool,
    poll_interval: Duration,
    args_cache: DescriptorCache<A>,
    kwargs_cache: DescriptorCache<K>,
    metrics: Arc<Metrics>,
}

impl<A, K> Worker<A, K>
where
    A: DeserializeOwned,
    K: DeserializeOwned,
{
    pub fn new(
        id: WorkerId,
        debug: bool,
        cache_capacity: usize,
        poll_interval: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            id,
            debug,
            poll_interval,
            args_cache: DescriptorCache::new(cache_capacity).with_metrics(metrics.clone()),
            kwargs_cache: DescriptorCache::new(cache_capacity).with_metrics(metrics.clone()),
            metrics,
        }
    }

    // main loop
    pub fn run<I, O>(
        mut self,
        input: Receiver<Task<I, O, A, K>>,
        output: Sender<Outcome<I, O, A, K>>,
        stop: Arc<AtomicBool>,
    ) {
        debug!(worker_id = self.id, "Worker started");

        loop {
            if stop.load(Ordering::Acquire) {
                break;
            }

            let task = match input.recv_timeout(self.poll_interval) {
                Ok(task) => task,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let outcome = self.execute(task);
            if !self.publish(outcome, &output, &stop) {
                break;
            }
        }

        debug!(worker_id = self.id, "Worker stopped");
    }

    fn execute<I, O>(&mut self, task: Task<I, O, A, K>) -> Outcome<I, O, A, K> {
        let Task {
            handle,
            item,
            target,
        } = task;
        let start = Instant::now();

        let result = match self.args_cache.resolve(&target.args) {
            Err(e) => Err(Failure::Decode(e)),
            Ok(args) => match self.kwargs_cache.resolve(&target.kwargs) {
                Err(e) => Err(Failure::Decode(e)),
                Ok(kwargs) => {
                    match panic_handler::isolate(|| target.fun.call(&item, args, kwargs)) {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(e)) => Err(Failure::Error(e)),
                        Err(panic) => Err(Failure::Panic(panic)),
                    }
                }
            },
        };

        let duration_ns = start.elapsed().as_nanos() as u64;
        self.metrics.record_task_execution(duration_ns);

        match result {
            Ok(value) => {
                trace!(
                    worker_id = self.id,
                    handle = %handle,
                    duration_us = duration_ns / 1_000,
                    "Task completed"
                );
                Outcome::value(handle, value)
            }
            Err(failure) => {
                self.metrics.record_task_failure();
                if let Failure::Panic(ref info) = failure {
                    self.metrics.record_task_panic();
                    warn!(
                        worker_id = self.id,
                        handle = %handle,
                        message = %info.message,
                        "Task panicked in worker"
                    );
                }

                if self.debug {
                    Outcome::report(handle, failure.report(self.id, handle))
                } else {
                    Outcome::retry(handle, item, target)
                }
            }
        }
    }

    /// Push an outcome, giving up once the pool asks workers to stop.
    fn publish<I, O>(
        &self,
        mut outcome: Outcome<I, O, A, K>,
        output: &Sender<Outcome<I, O, A, K>>,
        stop: &AtomicBool,
    ) -> bool {
        loop {
            match output.send_timeout(outcome, self.poll_interval) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(returned)) => {
                    if stop.load(Ordering::Acquire) {
                        return false;
                    }
                    outcome = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}
