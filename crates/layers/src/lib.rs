pub mod category;
pub mod index;
pub mod query;
pub mod store;

pub use category::{Activity, Category};
pub use index::SpatialIndex;
pub use query::QueryDispatcher;
pub use store::{SpatialIndexStore, StoreError, load_activities};
