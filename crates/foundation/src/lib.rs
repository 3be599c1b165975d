pub mod bounds;
pub mod error;
pub mod ids;
pub mod math;

// Foundation crate: small, well-tested primitives shared by every other crate.
pub use bounds::*;
pub use error::*;
pub use ids::*;
