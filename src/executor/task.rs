//! Messages exchanged between the pool and its workers.

use crate::codec::Descriptor;
use crate::error::{BoxError, Error, Result};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Global function fingerprint counter
static FN_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Key identifying one submitted task and, later, its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Handle(u64);

impl Handle {
    pub const fn new(value: u64) -> Self {
        Handle(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for Handle {
    fn from(value: u64) -> Self {
        Handle(value)
    }
}

impl From<usize> for Handle {
    fn from(value: usize) -> Self {
        Handle(value as u64)
    }
}

impl From<u32> for Handle {
    fn from(value: u32) -> Self {
        Handle(value as u64)
    }
}

/// Negative values have no handle.
impl TryFrom<i64> for Handle {
    type Error = std::num::TryFromIntError;

    fn try_from(value: i64) -> std::result::Result<Self, Self::Error> {
        u64::try_from(value).map(Handle)
    }
}

impl TryFrom<i32> for Handle {
    type Error = std::num::TryFromIntError;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        u64::try_from(value).map(Handle)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signature of the function a pool applies to each item.
pub type TaskFn<I, O, A, K> =
    dyn Fn(&I, &A, &K) -> std::result::Result<O, BoxError> + Send + Sync + 'static;

/// A task function paired with a fingerprint minted when it was assigned.
pub struct FnDescriptor<I, O, A, K> {
    fingerprint: u64,
    fun: Arc<TaskFn<I, O, A, K>>,
}

impl<I, O, A, K> FnDescriptor<I, O, A, K> {
    pub fn new<F>(fun: F) -> Self
    where
        F: Fn(&I, &A, &K) -> std::result::Result<O, BoxError> + Send + Sync + 'static,
    {
        Self::from_arc(Arc::new(fun))
    }

    pub fn from_arc(fun: Arc<TaskFn<I, O, A, K>>) -> Self {
        Self {
            fingerprint: FN_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            fun,
        }
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn call(&self, item: &I, args: &A, kwargs: &K) -> std::result::Result<O, BoxError> {
        (self.fun)(item, args, kwargs)
    }
}

impl<I, O, A, K> Clone for FnDescriptor<I, O, A, K> {
    fn clone(&self) -> Self {
        Self {
            fingerprint: self.fingerprint,
            fun: Arc::clone(&self.fun),
        }
    }
}

impl<I, O, A, K> fmt::Debug for FnDescriptor<I, O, A, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnDescriptor")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// The function and arguments new submissions are bound to.
///
/// Cloned into every task, so replacing it never touches tasks already queued.
pub(crate) struct Target<I, O, A, K> {
    pub(crate) fun: FnDescriptor<I, O, A, K>,
    pub(crate) args: Descriptor<A>,
    pub(crate) kwargs: Descriptor<K>,
}

impl<I, O, A, K> Clone for Target<I, O, A, K> {
    fn clone(&self) -> Self {
        Self {
            fun: self.fun.clone(),
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
        }
    }
}

/// Input queue message.
pub(crate) struct Task<I, O, A, K> {
    pub(crate) handle: Handle,
    pub(crate) item: I,
    pub(crate) target: Target<I, O, A, K>,
}

impl<I, O, A, K> fmt::Debug for Task<I, O, A, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("handle", &self.handle)
            .field("fun", &self.target.fun)
            .field("args", &self.target.args)
            .field("kwargs", &self.target.kwargs)
            .finish()
    }
}

/// Everything needed to run a failed task again in the calling thread.
pub(crate) struct RetryTicket<I, O, A, K> {
    pub(crate) item: I,
    pub(crate) target: Target<I, O, A, K>,
}

impl<I, O, A, K> RetryTicket<I, O, A, K>
where
    A: DeserializeOwned,
    K: DeserializeOwned,
{
    /// Decode the arguments and call the function here, without catching panics.
    pub(crate) fn replay(self, handle: Handle) -> Result<O> {
        let args = self.target.args.decode()?;
        let kwargs = self.target.kwargs.decode()?;
        self.target
            .fun
            .call(&self.item, &args, &kwargs)
            .map_err(|e| Error::task(handle, e))
    }
}

pub(crate) enum Payload<I, O, A, K> {
    Value(O),
    /// Failure text from a worker in debug mode.
    Report(String),
    Retry(Box<RetryTicket<I, O, A, K>>),
}

/// Output queue message.
pub(crate) struct Outcome<I, O, A, K> {
    pub(crate) handle: Handle,
    pub(crate) payload: Payload<I, O, A, K>,
}

impl<I, O, A, K> Outcome<I, O, A, K> {
    pub(crate) fn value(handle: Handle, value: O) -> Self {
        Self {
            handle,
            payload: Payload::Value(value),
        }
    }

    pub(crate) fn report(handle: Handle, report: String) -> Self {
        Self {
            handle,
            payload: Payload::Report(report),
        }
    }

    pub(crate) fn retry(handle: Handle, item: I, target: Target<I, O, A, K>) -> Self {
        Self {
            handle,
            payload: Payload::Retry(Box::new(RetryTicket { item, target })),
        }
    }

    pub(crate) fn retry_needed(&self) -> bool {
        matches!(self.payload, Payload::Retry(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(scale: u64) -> Target<u64, u64, (u64,), ()> {
        Target {
            fun: FnDescriptor::new(|i: &u64, a: &(u64,), _: &()| {
                if *i == 13 {
                    return Err("unlucky".into());
                }
                Ok(i * a.0)
            }),
            args: Descriptor::encode(&(scale,)).unwrap(),
            kwargs: Descriptor::encode(&()).unwrap(),
        }
    }

    #[test]
    fn test_fn_fingerprints_are_unique() {
        let a = FnDescriptor::<u8, u8, (), ()>::new(|i, _, _| Ok(*i));
        let b = FnDescriptor::<u8, u8, (), ()>::new(|i, _, _| Ok(*i));
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.clone().fingerprint(), a.fingerprint());
    }

    #[test]
    fn test_handle_conversions() {
        assert_eq!(Handle::from(3usize), Handle::new(3));
        assert_eq!(Handle::from(3u64).get(), 3);
        assert_eq!(Handle::new(9).to_string(), "9");
        assert!(Handle::new(1) < Handle::new(2));
    }

    #[test]
    fn test_negative_values_are_rejected() {
        assert_eq!(Handle::try_from(5i32).unwrap(), Handle::new(5));
        assert_eq!(Handle::try_from(12i64).unwrap(), Handle::new(12));
        assert!(Handle::try_from(-1i32).is_err());
        assert!(Handle::try_from(i64::MIN).is_err());
    }

    #[test]
    fn test_retry_ticket_replays_in_process() {
        let ok = Outcome::retry(Handle::new(1), 5, target(3));
        assert!(ok.retry_needed());
        match ok.payload {
            Payload::Retry(ticket) => assert_eq!(ticket.replay(Handle::new(1)).unwrap(), 15),
            _ => panic!("expected retry payload"),
        }

        let bad = RetryTicket {
            item: 13,
            target: target(3),
        };
        let err = bad.replay(Handle::new(2)).unwrap_err();
        assert!(matches!(err, Error::Task { handle, .. } if handle == Handle::new(2)));
    }

    #[test]
    fn test_value_and_report_need_no_retry() {
        let v: Outcome<u64, u64, (u64,), ()> = Outcome::value(Handle::new(0), 1);
        let r: Outcome<u64, u64, (u64,), ()> = Outcome::report(Handle::new(0), "x".into());
        assert!(!v.retry_needed());
        assert!(!r.retry_needed());
    }
}
