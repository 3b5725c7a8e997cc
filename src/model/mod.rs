pub mod diff;
pub mod operation;

pub use diff::*;
pub use operation::*;
