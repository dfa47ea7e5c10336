//! The pool controller.
//!
//! A [`Pool`] owns a bounded input queue, a bounded output queue, the worker
//! threads between them and a store of outcomes keyed by [`Handle`]. Items are
//! submitted one at a time and their results retrieved later, in any order.

use super::store::ResultStore;
use super::task::{FnDescriptor, Handle, Outcome, Payload, Target, Task};
use super::worker::Worker;
use crate::codec::Descriptor;
use crate::config::PoolConfig;
use crate::error::{BoxError, Error, Result};
use crate::telemetry::{CompletionMeter, DepthMeter, Metrics, MetricsSnapshot};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Replacement function and arguments applied by [`Pool::submit_with`].
///
/// Overrides persist: they become the pool's configuration for every later
/// submission as well.
pub struct Overrides<I, O, A, K> {
    fun: Option<FnDescriptor<I, O, A, K>>,
    args: Option<A>,
    kwargs: Option<K>,
}

impl<I, O, A, K> Overrides<I, O, A, K> {
    pub fn new() -> Self {
        Self {
            fun: None,
            args: None,
            kwargs: None,
        }
    }

    pub fn fun<F>(mut self, fun: F) -> Self
    where
        F: Fn(&I, &A, &K) -> std::result::Result<O, BoxError> + Send + Sync + 'static,
    {
        self.fun = Some(FnDescriptor::new(fun));
        self
    }

    pub fn args(mut self, args: A) -> Self {
        self.args = Some(args);
        self
    }

    pub fn kwargs(mut self, kwargs: K) -> Self {
        self.kwargs = Some(kwargs);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fun.is_none() && self.args.is_none() && self.kwargs.is_none()
    }
}

impl<I, O, A, K> fmt::Debug for Overrides<I, O, A, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overrides")
            .field("fun", &self.fun)
            .field("args", &self.args.is_some())
            .field("kwargs", &self.kwargs.is_some())
            .finish()
    }
}

impl<I, O, A, K> Default for Overrides<I, O, A, K> {
    fn default() -> Self {
        Self::new()
    }
}

struct WorkerHandle {
    name: String,
    thread: JoinHandle<()>,
}

/// A fixed set of worker threads applying one function to submitted items.
///
/// ```
/// use parfor_rs::{Pool, PoolConfig};
///
/// let config = PoolConfig::builder().workers(2usize).build().unwrap();
/// let mut pool = Pool::new(config, |i: &u64, a: &(u64,), _: &()| Ok(i * a.0), (3,), ()).unwrap();
///
/// let h = pool.submit(7).unwrap();
/// assert_eq!(pool.retrieve(h).unwrap(), 21);
/// pool.close().unwrap();
/// ```
pub struct Pool<I, O, A = (), K = ()> {
    workers: Vec<WorkerHandle>,
    input_tx: Option<Sender<Task<I, O, A, K>>>,
    input_rx: Receiver<Task<I, O, A, K>>,
    output_rx: Receiver<Outcome<I, O, A, K>>,
    stop: Arc<AtomicBool>,
    target: Target<I, O, A, K>,
    store: ResultStore<Payload<I, O, A, K>>,
    next_handle: u64,
    config: PoolConfig,
    num_workers: usize,
    capacity: usize,
    metrics: Arc<Metrics>,
    progress: Option<Arc<dyn CompletionMeter>>,
    depth: Option<Arc<dyn DepthMeter>>,
    closed: bool,
}

impl<I, O> Pool<I, O, (), ()>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Pool for a function that takes no extra arguments.
    pub fn from_fn<F>(config: PoolConfig, fun: F) -> Result<Self>
    where
        F: Fn(&I, &(), &()) -> std::result::Result<O, BoxError> + Send + Sync + 'static,
    {
        Self::new(config, fun, (), ())
    }
}

impl<I, O, A, K> Pool<I, O, A, K>
where
    I: Send + 'static,
    O: Send + 'static,
    A: Serialize + DeserializeOwned + Send + 'static,
    K: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new<F>(config: PoolConfig, fun: F, args: A, kwargs: K) -> Result<Self>
    where
        F: Fn(&I, &A, &K) -> std::result::Result<O, BoxError> + Send + Sync + 'static,
    {
        config.validate()?;

        let target = Target {
            fun: FnDescriptor::new(fun),
            args: Descriptor::encode(&args)?,
            kwargs: Descriptor::encode(&kwargs)?,
        };

        let num_workers = config.worker_threads();
        let capacity = config.queue_capacity(num_workers);
        let (input_tx, input_rx) = bounded(capacity);
        let (output_tx, output_rx) = bounded(capacity);
        let stop = Arc::new(AtomicBool::new(false));
        let metrics = Arc::new(Metrics::new());

        let mut workers = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            let worker = Worker::<A, K>::new(
                id,
                config.debug,
                config.cache_capacity,
                config.poll_interval,
                metrics.clone(),
            );
            let input = input_rx.clone();
            let output = output_tx.clone();
            let stop_clone = stop.clone();
            let name = format!("{}-{}", config.thread_name_prefix, id);

            let mut builder = thread::Builder::new().name(name.clone());
            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let spawned = builder.spawn(move || worker.run(input, output, stop_clone));
            match spawned {
                Ok(thread) => workers.push(WorkerHandle { name, thread }),
                Err(e) => {
                    // stop whatever already started before bailing out
                    stop.store(true, Ordering::Release);
                    for started in workers {
                        let _ = started.thread.join();
                    }
                    return Err(Error::executor(format!("spawn failed: {}", e)));
                }
            }
        }

        info!(
            workers = num_workers,
            capacity,
            debug = config.debug,
            "Pool started"
        );

        Ok(Self {
            workers,
            input_tx: Some(input_tx),
            input_rx,
            output_rx,
            stop,
            target,
            store: ResultStore::new(),
            next_handle: 0,
            config,
            num_workers,
            capacity,
            metrics,
            progress: None,
            depth: None,
            closed: false,
        })
    }

    /// Report every drained outcome to `meter`.
    pub fn with_progress(mut self, meter: Arc<dyn CompletionMeter>) -> Self {
        self.progress = Some(meter);
        self
    }

    /// Report the input queue depth to `meter`.
    pub fn with_depth_meter(mut self, meter: Arc<dyn DepthMeter>) -> Self {
        meter.set_capacity(self.capacity);
        meter.set(self.queue_depth());
        self.depth = Some(meter);
        self
    }

    /// Replace function and arguments for subsequent submissions.
    pub fn configure<F>(&mut self, fun: F, args: A, kwargs: K) -> Result<()>
    where
        F: Fn(&I, &A, &K) -> std::result::Result<O, BoxError> + Send + Sync + 'static,
    {
        let args = Descriptor::encode(&args)?;
        let kwargs = Descriptor::encode(&kwargs)?;
        self.target = Target {
            fun: FnDescriptor::new(fun),
            args,
            kwargs,
        };
        Ok(())
    }

    pub fn set_fn<F>(&mut self, fun: F)
    where
        F: Fn(&I, &A, &K) -> std::result::Result<O, BoxError> + Send + Sync + 'static,
    {
        self.target.fun = FnDescriptor::new(fun);
    }

    pub fn set_args(&mut self, args: A) -> Result<()> {
        self.target.args = Descriptor::encode(&args)?;
        Ok(())
    }

    pub fn set_kwargs(&mut self, kwargs: K) -> Result<()> {
        self.target.kwargs = Descriptor::encode(&kwargs)?;
        Ok(())
    }

    /// Enqueue `item` under the next free handle.
    pub fn submit(&mut self, item: I) -> Result<Handle> {
        self.ensure_open()?;
        let handle = self.allocate_handle();
        self.enqueue(handle, item)?;
        Ok(handle)
    }

    /// Enqueue `item` under `handle`. Does nothing if `handle` is still live.
    pub fn submit_at(&mut self, handle: impl Into<Handle>, item: I) -> Result<Handle> {
        self.ensure_open()?;
        let handle = handle.into();
        if self.store.contains(handle) {
            debug!(handle = %handle, "Handle already live, submission ignored");
            return Ok(handle);
        }
        self.enqueue(handle, item)?;
        Ok(handle)
    }

    /// Apply `overrides` to the pool configuration, then submit `item`.
    pub fn submit_with(&mut self, item: I, overrides: Overrides<I, O, A, K>) -> Result<Handle> {
        self.ensure_open()?;
        self.apply(overrides)?;
        self.submit(item)
    }

    /// Like [`submit_at`](Self::submit_at), but a live `handle` is an error.
    pub fn insert(&mut self, handle: impl Into<Handle>, item: I) -> Result<()> {
        self.ensure_open()?;
        let handle = handle.into();
        if self.store.contains(handle) {
            return Err(Error::DuplicateHandle(handle));
        }
        self.enqueue(handle, item)
    }

    /// Wait for the result of `handle` and remove it from the pool.
    ///
    /// A task that failed in a worker (outside debug mode) is run again here,
    /// in the calling thread. Its error comes back as [`Error::Task`]; a panic
    /// propagates to the caller.
    pub fn retrieve(&mut self, handle: impl Into<Handle>) -> Result<O> {
        self.ensure_open()?;
        let handle = handle.into();
        if !self.store.contains(handle) {
            return Err(Error::UnknownHandle(handle));
        }

        loop {
            if let Some(payload) = self.store.take(handle) {
                return self.settle(handle, payload);
            }
            self.drain(self.config.poll_interval)?;
        }
    }

    pub fn contains(&self, handle: impl Into<Handle>) -> bool {
        self.store.contains(handle.into())
    }

    /// Handles submitted and not yet retrieved, in ascending order.
    pub fn live_handles(&self) -> Vec<Handle> {
        self.store.handles().collect()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.len() == 0
    }

    pub fn worker_count(&self) -> usize {
        self.num_workers
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Tasks waiting in the input queue.
    pub fn queue_depth(&self) -> usize {
        self.input_rx.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.capacity
    }

    /// Results that arrived and have not been retrieved yet.
    pub fn ready_count(&self) -> usize {
        self.store.ready_count()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop the workers and discard any queued work. Safe to call repeatedly.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.stop.store(true, Ordering::Release);
        self.input_tx.take();
        let discarded = self.input_rx.try_iter().count();

        let mut failed = Vec::new();
        for worker in self.workers.drain(..) {
            if worker.thread.join().is_err() {
                error!(worker = %worker.name, "Worker thread panicked");
                failed.push(worker.name);
            }
        }

        let unclaimed = self.output_rx.try_iter().count() + self.store.ready_count();
        let live = self.store.len();
        self.store.clear();
        self.next_handle = 0;

        if let Some(ref meter) = self.depth {
            meter.set(0);
            meter.finish();
        }
        if let Some(ref meter) = self.progress {
            meter.finish();
        }

        info!(discarded, unclaimed, live, "Pool closed");

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::Shutdown(format!(
                "failed to join {} worker(s): {}",
                failed.len(),
                failed.join(", ")
            )))
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn allocate_handle(&mut self) -> Handle {
        while self.store.contains(Handle::new(self.next_handle)) {
            self.next_handle += 1;
        }
        let handle = Handle::new(self.next_handle);
        self.next_handle += 1;
        handle
    }

    /// All or nothing: a failed encode leaves the current target untouched.
    fn apply(&mut self, overrides: Overrides<I, O, A, K>) -> Result<()> {
        let args = overrides
            .args
            .as_ref()
            .map(Descriptor::encode)
            .transpose()?;
        let kwargs = overrides
            .kwargs
            .as_ref()
            .map(Descriptor::encode)
            .transpose()?;

        if let Some(args) = args {
            self.target.args = args;
        }
        if let Some(kwargs) = kwargs {
            self.target.kwargs = kwargs;
        }
        if let Some(fun) = overrides.fun {
            self.target.fun = fun;
        }
        Ok(())
    }

    fn enqueue(&mut self, handle: Handle, item: I) -> Result<()> {
        let tx = self.input_tx.clone().ok_or(Error::Closed)?;
        let mut task = Task {
            handle,
            item,
            target: self.target.clone(),
        };

        loop {
            match tx.try_send(task) {
                Ok(()) => break,
                Err(TrySendError::Full(returned)) => {
                    task = returned;
                    self.drain(self.config.poll_interval)?;
                }
                Err(TrySendError::Disconnected(_)) => return Err(Error::Closed),
            }
        }

        self.store.register(handle);
        self.update_depth();
        Ok(())
    }

    /// Move finished outcomes into the store, waiting up to `timeout` for the
    /// first one. Returns whether anything arrived.
    fn drain(&mut self, timeout: Duration) -> Result<bool> {
        let first = match self.output_rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                self.update_depth();
                return Ok(false);
            }
            Err(RecvTimeoutError::Disconnected) => return Err(Error::Closed),
        };

        self.accept(first);
        while let Ok(outcome) = self.output_rx.try_recv() {
            self.accept(outcome);
        }
        self.update_depth();
        Ok(true)
    }

    fn accept(&mut self, outcome: Outcome<I, O, A, K>) {
        let handle = outcome.handle;
        if outcome.retry_needed() {
            debug!(handle = %handle, "Task failed in worker, replay deferred to retrieve");
        }
        if !self.store.fill(handle, outcome.payload) {
            debug!(handle = %handle, "Dropping outcome for unknown handle");
            return;
        }
        if let Some(ref meter) = self.progress {
            meter.increment();
        }
    }

    fn settle(&self, handle: Handle, payload: Payload<I, O, A, K>) -> Result<O> {
        match payload {
            Payload::Value(value) => Ok(value),
            Payload::Report(report) => Err(Error::TaskFailed { handle, report }),
            Payload::Retry(ticket) => {
                warn!(
                    handle = %handle,
                    "error occurred in iteration {}, retrying in-process", handle
                );
                self.metrics.record_retry();
                ticket.replay(handle)
            }
        }
    }

    fn update_depth(&self) {
        if let Some(ref meter) = self.depth {
            meter.set(self.input_rx.len());
        }
    }
}

impl<I, O, A, K> fmt::Debug for Pool<I, O, A, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("workers", &self.num_workers)
            .field("capacity", &self.capacity)
            .field("live", &self.store.len())
            .field("fun", &self.target.fun)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<I, O, A, K> Drop for Pool<I, O, A, K> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stop.store(true, Ordering::Release);
        self.input_tx.take();
        for worker in self.workers.drain(..) {
            if worker.thread.join().is_err() {
                error!(worker = %worker.name, "Worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn config(workers: usize) -> PoolConfig {
        PoolConfig::builder()
            .workers(workers)
            .poll_interval(Duration::from_millis(5))
            .build()
            .unwrap()
    }

    fn square_pool(workers: usize) -> Pool<u64, u64> {
        Pool::from_fn(config(workers), |i: &u64, _: &(), _: &()| Ok(i * i)).unwrap()
    }

    #[test]
    fn test_submit_and_retrieve() {
        let mut pool = square_pool(2);
        let handles: Vec<_> = (0..10).map(|i| pool.submit(i).unwrap()).collect();
        assert_eq!(pool.len(), 10);

        for (i, h) in handles.into_iter().enumerate().rev() {
            assert_eq!(pool.retrieve(h).unwrap(), (i * i) as u64);
        }
        assert!(pool.is_empty());
        pool.close().unwrap();
    }

    #[test]
    fn test_auto_handles_skip_live_ones() {
        let mut pool = square_pool(1);
        pool.submit_at(1u64, 5).unwrap();
        assert_eq!(pool.submit(2).unwrap(), Handle::new(0));
        assert_eq!(pool.submit(3).unwrap(), Handle::new(2));
        assert_eq!(
            pool.live_handles(),
            vec![Handle::new(0), Handle::new(1), Handle::new(2)]
        );
    }

    #[test]
    fn test_duplicate_handle() {
        let mut pool = square_pool(1);
        pool.submit_at(4u64, 2).unwrap();
        pool.submit_at(4u64, 3).unwrap();
        assert_eq!(pool.len(), 1);
        assert!(matches!(pool.insert(4u64, 3), Err(Error::DuplicateHandle(h)) if h.get() == 4));
        assert_eq!(pool.retrieve(4u64).unwrap(), 4);
    }

    #[test]
    fn test_unknown_handle() {
        let mut pool = square_pool(1);
        assert!(matches!(pool.retrieve(9u64), Err(Error::UnknownHandle(_))));

        let h = pool.submit(3).unwrap();
        pool.retrieve(h).unwrap();
        assert!(matches!(pool.retrieve(h), Err(Error::UnknownHandle(_))));
    }

    #[test]
    fn test_backpressure_does_not_drop_tasks() {
        let mut pool = square_pool(2);
        let n = pool.queue_capacity() as u64 * 4;
        for i in 0..n {
            pool.submit(i).unwrap();
        }
        assert!(pool.queue_depth() <= pool.queue_capacity());
        for i in 0..n {
            assert_eq!(pool.retrieve(i).unwrap(), i * i);
        }
    }

    #[test]
    fn test_closed_pool_rejects_work() {
        let mut pool = square_pool(1);
        pool.submit(1).unwrap();
        pool.close().unwrap();
        pool.close().unwrap();

        assert!(pool.is_closed());
        assert!(pool.is_empty());
        assert!(matches!(pool.submit(2), Err(Error::Closed)));
        assert!(matches!(pool.retrieve(0u64), Err(Error::Closed)));
    }

    #[test]
    fn test_retry_runs_in_calling_thread() {
        let caller = thread::current().id();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let mut pool: Pool<u64, u64> = Pool::from_fn(config(2), move |i: &u64, _: &(), _: &()| {
            let name = thread::current().name().unwrap_or("").to_string();
            seen_clone.lock().push(thread::current().id());
            if name.starts_with("parfor-worker") {
                return Err("only fails in workers".into());
            }
            Ok(i + 1)
        })
        .unwrap();

        let h = pool.submit(41).unwrap();
        assert_eq!(pool.retrieve(h).unwrap(), 42);
        assert_eq!(seen.lock().last().copied(), Some(caller));
        assert_eq!(pool.metrics().tasks_retried, 1);
    }

    #[test]
    fn test_debug_mode_reports_failure() {
        let config = PoolConfig::builder()
            .workers(1usize)
            .debug(true)
            .build()
            .unwrap();
        let mut pool: Pool<u64, u64> =
            Pool::from_fn(config, |_: &u64, _: &(), _: &()| Err("kaput".into())).unwrap();

        let h = pool.submit(1).unwrap();
        match pool.retrieve(h) {
            Err(Error::TaskFailed { handle, report }) => {
                assert_eq!(handle, h);
                assert!(report.contains("kaput"));
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        assert_eq!(pool.metrics().tasks_retried, 0);
    }

    #[test]
    fn test_reconfigure_keeps_queued_tasks() {
        let mut pool: Pool<u64, u64, (u64,), ()> = Pool::new(
            config(1),
            |i: &u64, a: &(u64,), _: &()| {
                thread::sleep(Duration::from_millis(2));
                Ok(i * a.0)
            },
            (2,),
            (),
        )
        .unwrap();

        let before: Vec<_> = (0..5).map(|i| pool.submit(i).unwrap()).collect();
        pool.set_args((10,)).unwrap();
        let after = pool
            .submit_with(1, Overrides::new().fun(|i: &u64, a: &(u64,), _: &()| Ok(i + a.0)))
            .unwrap();
        let later = pool.submit(2).unwrap();

        for (i, h) in before.into_iter().enumerate() {
            assert_eq!(pool.retrieve(h).unwrap(), i as u64 * 2);
        }
        assert_eq!(pool.retrieve(after).unwrap(), 11);
        // overrides stay in effect
        assert_eq!(pool.retrieve(later).unwrap(), 12);
    }

    #[test]
    fn test_meters_follow_the_pool() {
        #[derive(Default)]
        struct Gauge {
            done: AtomicUsize,
            capacity: AtomicUsize,
        }
        impl CompletionMeter for Gauge {
            fn increment(&self) {
                self.done.fetch_add(1, Ordering::Relaxed);
            }
        }
        impl DepthMeter for Gauge {
            fn set(&self, _depth: usize) {}
            fn set_capacity(&self, capacity: usize) {
                self.capacity.store(capacity, Ordering::Relaxed);
            }
        }

        let gauge = Arc::new(Gauge::default());
        let mut pool = square_pool(2)
            .with_progress(gauge.clone())
            .with_depth_meter(gauge.clone());
        assert_eq!(gauge.capacity.load(Ordering::Relaxed), 6);

        for i in 0..8 {
            pool.submit(i).unwrap();
        }
        for i in 0..8u64 {
            pool.retrieve(i).unwrap();
        }
        assert_eq!(gauge.done.load(Ordering::Relaxed), 8);
    }

    #[derive(serde::Deserialize)]
    struct Picky(u32);

    impl Serialize for Picky {
        fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
            if self.0 == 0 {
                return Err(serde::ser::Error::custom("zero is not allowed"));
            }
            s.serialize_u32(self.0)
        }
    }

    #[test]
    fn test_failed_override_keeps_target() {
        let mut pool: Pool<u32, u32, Picky, Picky> = Pool::new(
            config(1),
            |i: &u32, a: &Picky, k: &Picky| Ok(i * a.0 + k.0),
            Picky(1),
            Picky(1),
        )
        .unwrap();

        let bad = Overrides::new().args(Picky(5)).kwargs(Picky(0));
        assert!(matches!(pool.submit_with(2, bad), Err(Error::Codec(_))));
        assert!(pool.is_empty());

        let h = pool.submit(2).unwrap();
        assert_eq!(pool.retrieve(h).unwrap(), 3);
    }
}
