use gcp_tasks::logic::{OperationPoller, PatchStyle, PollConfig, ResourceUpdater, UpdateError, UpdateResult};
use gcp_tasks::model::Operation;
use gcp_tasks::transport::{Method, OperationFetcher, RestRequest, RestResponse, RestTransport, TransportError};
use gcp_tasks::PollError;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// In-memory stand-in for a Google REST API with long running PATCH calls
struct FakeApi {
    resources: Mutex<HashMap<String, Value>>,
    requests: Mutex<Vec<RestRequest>>,
    /// operation name -> (resource path, error to finish with)
    operations: Mutex<HashMap<String, (String, Option<Value>)>>,
    pending_rounds: AtomicU32,
    failing_fetches: AtomicU32,
    fetches: AtomicU32,
}

impl FakeApi {
    fn new() -> Self {
        Self {
            resources: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            operations: Mutex::new(HashMap::new()),
            pending_rounds: AtomicU32::new(0),
            failing_fetches: AtomicU32::new(0),
            fetches: AtomicU32::new(0),
        }
    }

    fn with_resource(self, path: &str, resource: Value) -> Self {
        self.resources.lock().unwrap().insert(path.to_string(), resource);
        self
    }

    fn pending_for(self, rounds: u32) -> Self {
        self.pending_rounds.store(rounds, Ordering::SeqCst);
        self
    }

    fn resource(&self, path: &str) -> Value {
        self.resources.lock().unwrap()[path].clone()
    }

    fn methods(&self) -> Vec<Method> {
        self.requests.lock().unwrap().iter().map(|r| r.method).collect()
    }

    fn last_request(&self) -> RestRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }

    fn fail_next_operation(&self, error: Value) {
        self.operations
            .lock()
            .unwrap()
            .insert("next-error".to_string(), (String::new(), Some(error)));
    }

    fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Copy the masked fields of `body` onto the stored resource
    fn apply_mask(&self, path: &str, mask: &str, body: &Value) {
        let mut resources = self.resources.lock().unwrap();
        let resource = resources.get_mut(path).unwrap();

        for field in mask.split(',') {
            let pointer = format!("/{}", field.replace('.', "/"));
            let value = body.pointer(&pointer).cloned().unwrap_or(Value::Null);

            let mut target = &mut *resource;
            let mut keys = field.split('.').peekable();
            while let Some(key) = keys.next() {
                let object = target.as_object_mut().unwrap();
                if keys.peek().is_none() {
                    object.insert(key.to_string(), value.clone());
                    break;
                }
                target = object
                    .entry(key.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
            }
        }
    }

    fn not_found(path: &str) -> RestResponse {
        RestResponse {
            status: 404,
            body: Some(json!({
                "error": {"code": 404, "message": format!("{} not found", path), "details": []}
            })),
        }
    }
}

#[async_trait::async_trait]
impl RestTransport for FakeApi {
    async fn send(&self, request: RestRequest) -> Result<RestResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let path = request.path.clone();

        if !self.resources.lock().unwrap().contains_key(&path) {
            return Ok(Self::not_found(&path));
        }

        match request.method {
            Method::Get => Ok(RestResponse {
                status: 200,
                body: Some(self.resource(&path)),
            }),
            Method::Patch => {
                let body = request.body.clone().unwrap_or(Value::Null);
                let query_mask = request
                    .query
                    .iter()
                    .find(|(key, _)| key == "updateMask")
                    .map(|(_, mask)| mask.clone());

                if let Some(mask) = query_mask {
                    self.apply_mask(&path, &mask, &body);

                    let mut operations = self.operations.lock().unwrap();
                    let error = operations.remove("next-error").and_then(|(_, e)| e);
                    let name = format!("{}/operations/{}", path, operations.len() + 1);
                    operations.insert(name.clone(), (path.clone(), error));

                    let operation = Operation::pending(name);
                    return Ok(RestResponse {
                        status: 200,
                        body: Some(serde_json::to_value(operation).unwrap()),
                    });
                }

                // mask travels next to the wrapped resource
                let mask = body["updateMask"].as_str().unwrap_or_default().to_string();
                let (key, wrapped) = body
                    .as_object()
                    .and_then(|o| o.iter().find(|(k, _)| k.as_str() != "updateMask"))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .unwrap();
                assert_eq!(key, "subscription");
                self.apply_mask(&path, &mask, &wrapped);

                Ok(RestResponse {
                    status: 200,
                    body: Some(self.resource(&path)),
                })
            }
            _ => Err(TransportError::Unavailable("unsupported method".to_string())),
        }
    }
}

#[async_trait::async_trait]
impl OperationFetcher for FakeApi {
    async fn fetch_operation(&self, name: &str) -> Result<Operation, TransportError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if self.failing_fetches.load(Ordering::SeqCst) > 0 {
            self.failing_fetches.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::Unavailable("503 backend unavailable".to_string()));
        }

        if self.pending_rounds.load(Ordering::SeqCst) > 0 {
            self.pending_rounds.fetch_sub(1, Ordering::SeqCst);
            let mut operation = Operation::pending(name);
            operation.metadata = serde_json::from_value(json!({"statusDetail": "Updating"})).ok();
            return Ok(operation);
        }

        let (path, error) = self.operations.lock().unwrap()[name].clone();
        Ok(match error {
            Some(error) => Operation::failed(name, error),
            None => Operation::succeeded(name, self.resource(&path)),
        })
    }
}

fn app() -> Value {
    json!({
        "name": "apps/my-project",
        "id": "my-project",
        "authDomain": "old.example.com",
        "defaultCookieExpiration": "3600s",
        "servingStatus": "SERVING",
        "featureSettings": {"splitHealthChecks": true}
    })
}

#[tokio::test(start_paused = true)]
async fn test_changed_fields_are_patched_and_awaited() {
    let api = FakeApi::new().with_resource("apps/my-project", app()).pending_for(2);
    let poller = OperationPoller::new(PollConfig::app_engine());
    let updater = ResourceUpdater::new(&api, &poller);
    let started = Instant::now();

    let desired = json!({
        "authDomain": "example.com",
        "defaultCookieExpiration": "3600s",
        "featureSettings": {"splitHealthChecks": false, "useContainerOptimizedOs": true}
    });

    let result = updater
        .apply("apps/my-project", desired, &PatchStyle::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.was_changed());
    let resource = result.into_resource();
    assert_eq!(resource["authDomain"], "example.com");
    assert_eq!(resource["featureSettings"]["splitHealthChecks"], false);
    // new fields are sent in the body but left out of the mask
    assert!(resource["featureSettings"].get("useContainerOptimizedOs").is_none());

    assert_eq!(api.methods(), vec![Method::Get, Method::Patch]);
    let patch = api.last_request();
    assert_eq!(
        patch.query,
        vec![("updateMask".to_string(), "authDomain,featureSettings.splitHealthChecks".to_string())]
    );
    assert_eq!(patch.body.unwrap()["featureSettings"]["useContainerOptimizedOs"], true);

    assert_eq!(api.fetches(), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(4 + 8));
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_resource_skips_patch() {
    let api = FakeApi::new().with_resource("apps/my-project", app());
    let poller = OperationPoller::default();
    let updater = ResourceUpdater::new(&api, &poller);

    // only a field the server does not know yet
    let desired = json!({"authDomain": "old.example.com", "dispatchRules": []});

    let result = updater
        .apply("apps/my-project", desired, &PatchStyle::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result, UpdateResult::Unchanged(app()));
    assert_eq!(api.methods(), vec![Method::Get]);
    assert_eq!(api.fetches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_mask_in_body_returns_resource() {
    let path = "projects/my-project/subscriptions/builds";
    let api = FakeApi::new().with_resource(
        path,
        json!({
            "name": path,
            "topic": "projects/my-project/topics/builds",
            "ackDeadlineSeconds": 10,
            "retainAckedMessages": false
        }),
    );
    let poller = OperationPoller::default();
    let updater = ResourceUpdater::new(&api, &poller);

    let result = updater
        .apply(
            path,
            json!({"ackDeadlineSeconds": 60, "retainAckedMessages": false}),
            &PatchStyle::mask_in_body("subscription"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.into_resource()["ackDeadlineSeconds"], 60);
    let patch = api.last_request();
    assert!(patch.query.is_empty());
    assert_eq!(patch.body.unwrap()["updateMask"], "ackDeadlineSeconds");
    assert_eq!(api.fetches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_operation_is_reported() {
    let api = FakeApi::new().with_resource("apps/my-project", app()).pending_for(1);
    api.fail_next_operation(json!({"code": 7, "message": "PERMISSION_DENIED"}));
    let poller = OperationPoller::default();
    let updater = ResourceUpdater::new(&api, &poller);

    let err = updater
        .apply(
            "apps/my-project",
            json!({"authDomain": "example.com"}),
            &PatchStyle::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        UpdateError::Poll(PollError::OperationFailed { error }) => {
            assert_eq!(error["message"], "PERMISSION_DENIED");
        }
        other => panic!("expected failed operation, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_flaky_status_checks_are_retried() {
    let api = FakeApi::new().with_resource("apps/my-project", app()).pending_for(1);
    api.failing_fetches.store(2, Ordering::SeqCst);
    let poller = OperationPoller::new(PollConfig::memorystore());
    let updater = ResourceUpdater::new(&api, &poller);

    let result = updater
        .apply(
            "apps/my-project",
            json!({"defaultCookieExpiration": "7200s"}),
            &PatchStyle::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.into_resource()["defaultCookieExpiration"], "7200s");
    assert_eq!(api.fetches(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_missing_resource_fails_before_planning() {
    let api = FakeApi::new();
    let poller = OperationPoller::default();
    let updater = ResourceUpdater::new(&api, &poller);

    let err = updater
        .apply("apps/unknown", json!({"authDomain": "x"}), &PatchStyle::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        UpdateError::Transport(TransportError::Api { status, message, .. }) => {
            assert_eq!(status, 404);
            assert_eq!(message, "apps/unknown not found");
        }
        other => panic!("expected API error, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_task_timeout_cancels_wait() {
    let api = FakeApi::new().with_resource("apps/my-project", app()).pending_for(u32::MAX);
    let poller = OperationPoller::default();
    let updater = ResourceUpdater::new(&api, &poller);
    let cancel = CancellationToken::new();

    let timeout = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        timeout.cancel();
    });

    let err = updater
        .apply("apps/my-project", json!({"authDomain": "example.com"}), &PatchStyle::default(), &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    // rounds at 0, 4, 12 and 28 seconds
    assert_eq!(api.fetches(), 4);
}
