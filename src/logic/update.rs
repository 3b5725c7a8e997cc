use log::{debug, info};
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::logic::planner::{plan_partial_update, properties_to_paths};
use crate::logic::poller::{OperationPoller, PollError};
use crate::model::{Operation, PartialUpdate};
use crate::transport::{Method, OperationFetcher, RestRequest, RestTransport, TransportError};

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error("unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),
}

impl UpdateError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UpdateError::Poll(e) if e.is_cancelled())
    }
}

/// Where the update mask travels on the PATCH request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskPlacement {
    /// `?updateMask=a,b.c` with the resource as body
    Query,
    /// `{"<resource_key>": {...}, "updateMask": "a,b.c"}`
    Body { resource_key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchStyle {
    pub mask_placement: MaskPlacement,
    /// PATCH answers with an Operation rather than the resource
    pub long_running: bool,
}

impl Default for PatchStyle {
    fn default() -> Self {
        Self {
            mask_placement: MaskPlacement::Query,
            long_running: true,
        }
    }
}

impl PatchStyle {
    pub fn mask_in_body(resource_key: impl Into<String>) -> Self {
        Self {
            mask_placement: MaskPlacement::Body {
                resource_key: resource_key.into(),
            },
            long_running: false,
        }
    }

    pub fn with_long_running(mut self, long_running: bool) -> Self {
        self.long_running = long_running;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateResult {
    /// The server already matched; carries the state read before planning
    Unchanged(Value),
    Updated(Value),
}

impl UpdateResult {
    pub fn into_resource(self) -> Value {
        match self {
            UpdateResult::Unchanged(resource) | UpdateResult::Updated(resource) => resource,
        }
    }

    pub fn was_changed(&self) -> bool {
        matches!(self, UpdateResult::Updated(_))
    }
}

/// Build the PATCH carrying the planned mask and the full desired body
pub fn build_patch_request(resource_path: &str, update: &PartialUpdate, style: &PatchStyle) -> RestRequest {
    let mask = update.mask.update_mask();
    let request = RestRequest::new(Method::Patch, resource_path);

    match &style.mask_placement {
        MaskPlacement::Query => request.query("updateMask", mask).json(update.body.clone()),
        MaskPlacement::Body { resource_key } => request.json(json!({
            resource_key.as_str(): update.body,
            "updateMask": mask,
        })),
    }
}

/// Read-plan-patch-wait cycle for one resource
pub struct ResourceUpdater<'a, T: ?Sized> {
    transport: &'a T,
    poller: &'a OperationPoller,
}

impl<'a, T> ResourceUpdater<'a, T>
where
    T: RestTransport + OperationFetcher + ?Sized,
{
    pub fn new(transport: &'a T, poller: &'a OperationPoller) -> Self {
        Self { transport, poller }
    }

    /// Bring the resource at `resource_path` to `desired`.
    ///
    /// Only fields that already exist with another value go into the mask; no
    /// request is sent when the mask is empty.
    pub async fn apply(
        &self,
        resource_path: &str,
        desired: Value,
        style: &PatchStyle,
        cancel: &CancellationToken,
    ) -> Result<UpdateResult, UpdateError> {
        info!("Updating {}", resource_path);
        let current = self.transport.get(resource_path).await?;

        let update = plan_partial_update(&current, &desired);
        debug!(
            "Changed or new properties of {} are: {}",
            resource_path,
            properties_to_paths(&update.trace.payload).join(",")
        );
        debug!("{}", serde_json::to_string_pretty(&update.trace.payload)?);
        debug!("Changed attributes are: {}", update.mask.update_mask());

        if update.is_noop() {
            info!("Nothing was changed in {}.", resource_path);
            return Ok(UpdateResult::Unchanged(current));
        }

        let request = build_patch_request(resource_path, &update, style);
        let data = self.transport.send(request).await?.into_data()?;

        if !style.long_running {
            return Ok(UpdateResult::Updated(data));
        }

        let operation: Operation = serde_json::from_value(data)?;
        let resource = self.wait(operation, cancel).await?;
        Ok(UpdateResult::Updated(resource))
    }

    pub async fn wait(&self, operation: Operation, cancel: &CancellationToken) -> Result<Value, UpdateError> {
        info!("Waiting for operation {}", operation.name);
        Ok(self
            .poller
            .await_completion(self.transport, operation, cancel)
            .await?)
    }
}
