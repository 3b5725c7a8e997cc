pub mod http;
pub mod traits;

pub use http::*;
pub use traits::*;
