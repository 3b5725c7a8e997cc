pub mod inputs;
pub mod planner;
pub mod poller;
pub mod update;

pub use inputs::*;
pub use planner::*;
pub use poller::*;
pub use update::*;
