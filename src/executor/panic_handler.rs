use std::panic::{catch_unwind, AssertUnwindSafe};

/// What survived of a panic caught in a worker.
#[derive(Debug, Clone)]
pub struct PanicInfo {
    pub message: String,
}

impl PanicInfo {
    fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        Self { message }
    }
}

/// Run `f`, turning a panic into a [`PanicInfo`] instead of unwinding further.
pub(crate) fn isolate<F, R>(f: F) -> Result<R, PanicInfo>
where
    F: FnOnce() -> R,
{
    catch_unwind(AssertUnwindSafe(f)).map_err(PanicInfo::from_payload)
}
