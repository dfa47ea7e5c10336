use crate::executor::Handle;

pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by user task functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("handle {0} is already live")]
    DuplicateHandle(Handle),

    #[error("no live task with handle {0}")]
    UnknownHandle(Handle),

    /// The task function failed when replayed in the calling thread.
    #[error("task {handle} failed: {source}")]
    Task {
        handle: Handle,
        #[source]
        source: BoxError,
    },

    /// Failure report produced by a worker running in debug mode.
    #[error("task {handle} failed in worker:\n{report}")]
    TaskFailed { handle: Handle, report: String },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("executor error: {0}")]
    Executor(String),

    #[error("pool is closed")]
    Closed,

    #[error("shutdown error: {0}")]
    Shutdown(String),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn executor<S: Into<String>>(msg: S) -> Self {
        Error::Executor(msg.into())
    }

    pub fn codec<S: Into<String>>(msg: S) -> Self {
        Error::Codec(msg.into())
    }

    pub fn task(handle: Handle, source: BoxError) -> Self {
        Error::Task { handle, source }
    }

    /// Handle of the task this error belongs to, if any.
    pub fn handle(&self) -> Option<Handle> {
        match self {
            Error::DuplicateHandle(h) | Error::UnknownHandle(h) => Some(*h),
            Error::Task { handle, .. } | Error::TaskFailed { handle, .. } => Some(*handle),
            _ => None,
        }
    }

    /// True when a single task failed and the pool itself is fine.
    pub fn is_task_failure(&self) -> bool {
        matches!(self, Error::Task { .. } | Error::TaskFailed { .. })
    }
}
