pub mod calls;
pub mod formula;
pub mod tag;

pub use calls::*;
pub use formula::*;
pub use tag::*;
