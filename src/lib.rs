pub mod config;
pub mod logic;
pub mod model;
pub mod transport;

// Export logic types
pub use logic::{
    parse_list_input, plan_partial_update, plan_update, properties_to_paths, ExponentReset,
    MaskPlacement, OperationPoller, PatchStyle, PollConfig, PollError, PollSession,
    ResourceUpdater, UpdateError, UpdateResult,
};

// Export all model types
pub use model::*;

// Export transport types
pub use transport::{HttpTransport, OperationFetcher, RestTransport, TransportError};
