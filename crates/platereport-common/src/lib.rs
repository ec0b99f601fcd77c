pub mod coord;
pub mod measurement;
pub mod value;

pub use coord::*;
pub use measurement::*;
pub use value::*;
