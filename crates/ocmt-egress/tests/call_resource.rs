//! End-to-end invocation pipeline against mocked stores and transport

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use ocmt_core::{Clock, OwnerId, Permission, PermissionSet, ResourceId};
use ocmt_crypto::Keyring;
use ocmt_egress::{
    ActivitySink, AuthConfig, CallAudit, CallRequest, CallResponse, EgressError, EgressFabric,
    GrantStatus, GrantStore, HttpExecutor, PreparedRequest, Resource, ResourceGrant,
    ResourceStatus, ResourceStore,
};

const KEY: &str = "0505050505050505050505050505050505050505050505050505050505050505";

struct FixtureStore {
    resource: Mutex<Resource>,
    grant: Mutex<ResourceGrant>,
}

#[async_trait]
impl ResourceStore for FixtureStore {
    async fn get(&self, id: ResourceId) -> Option<Resource> {
        let resource = self.resource.lock().clone();
        (resource.id == id).then_some(resource)
    }
}

#[async_trait]
impl GrantStore for FixtureStore {
    async fn grant_for(&self, owner: OwnerId, resource: ResourceId) -> Option<ResourceGrant> {
        let grant = self.grant.lock().clone();
        (grant.owner == owner && grant.resource == resource).then_some(grant)
    }
}

#[derive(Default)]
struct RecordingExecutor {
    requests: Mutex<Vec<PreparedRequest>>,
    status: Mutex<u16>,
}

#[async_trait]
impl HttpExecutor for RecordingExecutor {
    async fn execute(&self, request: PreparedRequest) -> Result<CallResponse, String> {
        self.requests.lock().push(request);
        Ok(CallResponse {
            status: *self.status.lock(),
            headers: vec![("content-type".into(), "application/json".into())],
            body: b"{\"ok\":true}".to_vec(),
        })
    }
}

#[derive(Default)]
struct RecordingActivity {
    audits: Mutex<Vec<CallAudit>>,
}

#[async_trait]
impl ActivitySink for RecordingActivity {
    async fn record(&self, audit: CallAudit) {
        self.audits.lock().push(audit);
    }
}

struct Harness {
    fabric: EgressFabric,
    store: Arc<FixtureStore>,
    executor: Arc<RecordingExecutor>,
    activity: Arc<RecordingActivity>,
    owner: OwnerId,
    resource: ResourceId,
}

fn harness(base_endpoint: &str) -> Harness {
    let keyring = Arc::new(Keyring::new(0, KEY).unwrap());
    let owner = OwnerId::new();
    let resource_id = ResourceId::new();
    let auth = serde_json::to_vec(&AuthConfig::Bearer {
        token: "resource-secret".into(),
    })
    .unwrap();

    let store = Arc::new(FixtureStore {
        resource: Mutex::new(Resource {
            id: resource_id,
            owner,
            label: "crm".into(),
            base_endpoint: base_endpoint.to_string(),
            status: ResourceStatus::Active,
            auth_ciphertext: Some(keyring.encrypt(&auth).unwrap()),
        }),
        grant: Mutex::new(ResourceGrant {
            owner,
            resource: resource_id,
            permissions: PermissionSet::from_iter([Permission::Read, Permission::Write]),
            status: GrantStatus::Connected,
        }),
    });
    let executor = Arc::new(RecordingExecutor {
        requests: Mutex::new(Vec::new()),
        status: Mutex::new(200),
    });
    let activity = Arc::new(RecordingActivity::default());
    let (clock, _) = Clock::manual(1_700_000_000_000);

    let fabric = EgressFabric::new(
        store.clone(),
        store.clone(),
        executor.clone(),
        activity.clone(),
        keyring,
        clock,
    );
    Harness {
        fabric,
        store,
        executor,
        activity,
        owner,
        resource: resource_id,
    }
}

fn get_request(h: &Harness, path: &str) -> CallRequest {
    CallRequest {
        owner: h.owner,
        resource: h.resource,
        method: "GET".into(),
        path: path.into(),
        query: Vec::new(),
        body: None,
        headers: vec![
            ("Accept".into(), "application/json".into()),
            ("Cookie".into(), "session=steal-me".into()),
        ],
    }
}

#[tokio::test]
async fn successful_call_injects_auth_and_audits() {
    let h = harness("http://192.0.2.1/api/");
    let response = h.fabric.call_resource(get_request(&h, "/contacts")).await.unwrap();
    assert_eq!(response.status, 200);

    let requests = h.executor.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "http://192.0.2.1/api/contacts");
    // Caller cookie is gone; resource bearer auth is injected.
    assert!(requests[0]
        .headers
        .iter()
        .all(|(name, _)| !name.eq_ignore_ascii_case("cookie")));
    assert!(requests[0]
        .headers
        .contains(&("authorization".to_string(), "Bearer resource-secret".to_string())));

    let audits = h.activity.audits.lock();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].status, Some(200));
    assert_eq!(audits[0].path, "/contacts");
}

#[tokio::test]
async fn non_2xx_is_a_result_not_an_error() {
    let h = harness("http://192.0.2.1/api");
    *h.executor.status.lock() = 503;
    let response = h.fabric.call_resource(get_request(&h, "x")).await.unwrap();
    assert_eq!(response.status, 503);
}

#[tokio::test]
async fn metadata_endpoint_is_ssrf_blocked_without_egress() {
    let h = harness("http://169.254.169.254/latest/meta-data/");
    let err = h.fabric.call_resource(get_request(&h, "iam")).await.unwrap_err();
    assert_eq!(err, EgressError::SsrfBlocked);
    // The guard fired before any outbound connection.
    assert!(h.executor.requests.lock().is_empty());
    // The refusal is still audited.
    assert_eq!(
        h.activity.audits.lock()[0].error.as_deref(),
        Some("ssrf_blocked")
    );
}

#[tokio::test]
async fn disconnected_grants_cannot_invoke() {
    let h = harness("http://192.0.2.1/");
    h.store.grant.lock().status = GrantStatus::Granted;
    let err = h.fabric.call_resource(get_request(&h, "x")).await.unwrap_err();
    assert_eq!(err, EgressError::NotConnected);
}

#[tokio::test]
async fn method_permission_is_enforced() {
    let h = harness("http://192.0.2.1/");
    let mut request = get_request(&h, "x");
    request.method = "DELETE".into();
    let err = h.fabric.call_resource(request).await.unwrap_err();
    assert_eq!(
        err,
        EgressError::PermissionDenied {
            required: Permission::Delete
        }
    );
}

#[tokio::test]
async fn inactive_resources_are_refused() {
    let h = harness("http://192.0.2.1/");
    h.store.resource.lock().status = ResourceStatus::Disabled;
    let err = h.fabric.call_resource(get_request(&h, "x")).await.unwrap_err();
    assert_eq!(err, EgressError::ResourceInactive);
}

#[tokio::test]
async fn oversized_request_bodies_are_rejected_before_egress() {
    let h = harness("http://192.0.2.1/");
    let mut request = get_request(&h, "upload");
    request.method = "POST".into();
    request.body = Some(vec![0u8; ocmt_egress::MAX_BODY_BYTES + 1]);
    let err = h.fabric.call_resource(request).await.unwrap_err();
    assert_eq!(err, EgressError::BodyTooLarge);
    assert!(h.executor.requests.lock().is_empty());
}

#[tokio::test]
async fn call_window_rejects_the_101st_call() {
    let h = harness("http://192.0.2.1/");
    for _ in 0..100 {
        h.fabric.call_resource(get_request(&h, "x")).await.unwrap();
    }
    let err = h.fabric.call_resource(get_request(&h, "x")).await.unwrap_err();
    let EgressError::RateLimited { retry_after_secs } = err else {
        panic!("expected rate limit, got {err:?}");
    };
    assert!(retry_after_secs > 0 && retry_after_secs <= 3600);
}
