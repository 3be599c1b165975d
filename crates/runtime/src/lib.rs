pub mod metrics;
pub mod pool;

pub use metrics::*;
pub use pool::*;
