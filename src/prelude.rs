pub use crate::builder::{CacheBuilder, EjectCallback, WeightFn};
pub use crate::cache::Cache;
pub use crate::error::{BoxError, CacheError};
pub use crate::loader::{CancelToken, Canceller, LoadResult, LoaderGroup};
pub use crate::metrics::{AtomicMetrics, CacheStatsSnapshot, MetricsSink, NoopMetrics};
pub use crate::policy::clock_pro::EjectReason;
