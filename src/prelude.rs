pub use crate::chunks::{chunks, chunks_many, Chunks, ChunksMany};
pub use crate::config::{PoolConfig, PoolConfigBuilder, Workers};
pub use crate::error::{BoxError, Error, Result};
pub use crate::executor::{Handle, Overrides, Pool};
pub use crate::map::{pmap, ParMap};
pub use crate::telemetry::{CompletionMeter, DepthMeter, Metrics, MetricsSnapshot, NoopMeter};
