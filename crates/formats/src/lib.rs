pub mod feature_set;
pub mod grass_ascii;

pub use feature_set::*;
pub use grass_ascii::*;
