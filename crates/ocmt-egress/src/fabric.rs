//! Resource invocation
//!
//! The ten-step pipeline: grant, permission, resource state, call window,
//! URL construction, SSRF guard, header filter, auth injection, bounded
//! execution, audit. Non-2xx responses are results, not errors.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use ocmt_core::{Clock, OwnerId, Permission, ResourceId};
use ocmt_crypto::Keyring;

use crate::auth::AuthConfig;
use crate::error::{EgressError, Result};
use crate::ssrf;
use crate::types::{GrantStatus, GrantStore, ResourceStatus, ResourceStore};
use crate::window::ResourceCallWindow;

/// Hard deadline on every resource invocation
pub const RESOURCE_CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Cap on request and response bodies
pub const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Headers stripped from caller-supplied header sets before egress
const FILTERED_HEADERS: &[&str] = &[
    "authorization",
    "host",
    "cookie",
    "x-real-ip",
    "referer",
    "origin",
];

/// An invocation as requested by the sandbox
#[derive(Debug, Clone)]
pub struct CallRequest {
    /// Calling owner
    pub owner: OwnerId,
    /// Target resource
    pub resource: ResourceId,
    /// HTTP method, upper-case
    pub method: String,
    /// Path joined onto the resource's base endpoint
    pub path: String,
    /// Query parameters to append
    pub query: Vec<(String, String)>,
    /// Request body, if any
    pub body: Option<Vec<u8>>,
    /// Caller-supplied headers; hop-by-hop and identity headers are dropped
    pub headers: Vec<(String, String)>,
}

/// The response handed back to the sandbox
#[derive(Debug, Clone)]
pub struct CallResponse {
    /// Status code, any value
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Response body, at most [`MAX_BODY_BYTES`]
    pub body: Vec<u8>,
}

/// A request after filtering, joining, and auth injection
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// HTTP method
    pub method: String,
    /// Final URL
    pub url: String,
    /// Final headers
    pub headers: Vec<(String, String)>,
    /// Body, if any
    pub body: Option<Vec<u8>>,
}

/// Executes a prepared request; mockable in tests
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    /// Run the request within the deadline, returning any status code
    async fn execute(&self, request: PreparedRequest) -> std::result::Result<CallResponse, String>;
}

/// Audit record for one invocation
#[derive(Debug, Clone)]
pub struct CallAudit {
    /// Calling owner
    pub owner: OwnerId,
    /// Target resource
    pub resource: ResourceId,
    /// HTTP method
    pub method: String,
    /// Requested path
    pub path: String,
    /// Response status, when the call executed
    pub status: Option<u16>,
    /// Refusal/failure description, when it did not
    pub error: Option<String>,
}

/// Receives invocation audit records
#[async_trait]
pub trait ActivitySink: Send + Sync {
    /// Record one invocation outcome; must not fail the call
    async fn record(&self, audit: CallAudit);
}

/// The outbound-call fabric
pub struct EgressFabric {
    resources: Arc<dyn ResourceStore>,
    grants: Arc<dyn GrantStore>,
    executor: Arc<dyn HttpExecutor>,
    activity: Arc<dyn ActivitySink>,
    keyring: Arc<Keyring>,
    window: ResourceCallWindow,
}

impl EgressFabric {
    /// Assemble a fabric with the default 100/hour call window
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        grants: Arc<dyn GrantStore>,
        executor: Arc<dyn HttpExecutor>,
        activity: Arc<dyn ActivitySink>,
        keyring: Arc<Keyring>,
        clock: Clock,
    ) -> Self {
        Self {
            resources,
            grants,
            executor,
            activity,
            keyring,
            window: ResourceCallWindow::new(clock),
        }
    }

    /// The call window, exposed for the runtime reaper
    pub fn window(&self) -> &ResourceCallWindow {
        &self.window
    }

    /// Invoke a resource on behalf of an owner.
    pub async fn call_resource(&self, request: CallRequest) -> Result<CallResponse> {
        let outcome = self.run(&request).await;
        let audit = CallAudit {
            owner: request.owner,
            resource: request.resource,
            method: request.method.clone(),
            path: request.path.clone(),
            status: outcome.as_ref().ok().map(|response| response.status),
            error: outcome.as_ref().err().map(|err| err.to_string()),
        };
        self.activity.record(audit).await;
        outcome
    }

    async fn run(&self, request: &CallRequest) -> Result<CallResponse> {
        let grant = self
            .grants
            .grant_for(request.owner, request.resource)
            .await
            .ok_or(EgressError::NotConnected)?;
        if grant.status != GrantStatus::Connected {
            return Err(EgressError::NotConnected);
        }

        let required = required_permission(&request.method)?;
        if !grant.permissions.contains(required) {
            return Err(EgressError::PermissionDenied { required });
        }

        let resource = self
            .resources
            .get(request.resource)
            .await
            .ok_or(EgressError::ResourceNotFound)?;
        if resource.status != ResourceStatus::Active {
            return Err(EgressError::ResourceInactive);
        }

        if let Err(retry_after_secs) = self.window.try_admit(request.owner, request.resource) {
            return Err(EgressError::RateLimited { retry_after_secs });
        }

        if request
            .body
            .as_ref()
            .is_some_and(|body| body.len() > MAX_BODY_BYTES)
        {
            return Err(EgressError::BodyTooLarge);
        }

        let url = build_url(&resource.base_endpoint, &request.path, &request.query)?;
        ssrf::validate_url(&url).await?;

        let mut headers = filter_headers(&request.headers);
        let mut auth_query = Vec::new();
        if let Some(ciphertext) = resource.auth_ciphertext.as_deref() {
            let raw = self
                .keyring
                .decrypt(ciphertext)
                .map_err(|_| EgressError::AuthConfigInvalid)?;
            let auth: AuthConfig =
                serde_json::from_slice(&raw).map_err(|_| EgressError::AuthConfigInvalid)?;
            auth.apply(&mut headers, &mut auth_query);
        }
        // Query-placed keys append to the already validated URL; extra
        // parameters cannot move the host.
        let url = append_query(url, &auth_query)?;

        let prepared = PreparedRequest {
            method: request.method.clone(),
            url,
            headers,
            body: request.body.clone(),
        };
        let response = self
            .executor
            .execute(prepared)
            .await
            .map_err(|reason| EgressError::Transport { reason })?;

        if response.body.len() > MAX_BODY_BYTES {
            return Err(EgressError::BodyTooLarge);
        }
        Ok(response)
    }
}

fn required_permission(method: &str) -> Result<Permission> {
    match method {
        "GET" => Ok(Permission::Read),
        "POST" | "PUT" | "PATCH" => Ok(Permission::Write),
        "DELETE" => Ok(Permission::Delete),
        other => Err(EgressError::UnsupportedMethod {
            method: other.to_string(),
        }),
    }
}

fn filter_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| {
            let name = name.to_ascii_lowercase();
            !FILTERED_HEADERS.contains(&name.as_str()) && !name.starts_with("x-forwarded-")
        })
        .cloned()
        .collect()
}

fn build_url(base: &str, path: &str, query: &[(String, String)]) -> Result<String> {
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    let url = reqwest::Url::parse(&joined).map_err(|e| EgressError::UrlInvalid {
        reason: e.to_string(),
    })?;
    append_query(url.into(), query)
}

fn append_query(url: String, query: &[(String, String)]) -> Result<String> {
    if query.is_empty() {
        return Ok(url);
    }
    let mut url = reqwest::Url::parse(&url).map_err(|e| EgressError::UrlInvalid {
        reason: e.to_string(),
    })?;
    {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in query {
            pairs.append_pair(name, value);
        }
    }
    Ok(url.into())
}

/// Production executor backed by reqwest
pub struct ReqwestExecutor {
    client: reqwest::Client,
}

impl ReqwestExecutor {
    /// Executor with the standard 30 s deadline
    pub fn new() -> std::result::Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(RESOURCE_CALL_TIMEOUT)
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(&self, request: PreparedRequest) -> std::result::Result<CallResponse, String> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| e.to_string())?;
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await.map_err(|e| e.to_string())?.to_vec();
        Ok(CallResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_mapping_matches_the_grant_model() {
        assert_eq!(required_permission("GET").unwrap(), Permission::Read);
        assert_eq!(required_permission("POST").unwrap(), Permission::Write);
        assert_eq!(required_permission("PUT").unwrap(), Permission::Write);
        assert_eq!(required_permission("PATCH").unwrap(), Permission::Write);
        assert_eq!(required_permission("DELETE").unwrap(), Permission::Delete);
        assert!(required_permission("TRACE").is_err());
    }

    #[test]
    fn identity_headers_are_dropped_case_insensitively() {
        let headers = filter_headers(&[
            ("Authorization".into(), "Bearer leak".into()),
            ("Cookie".into(), "session=1".into()),
            ("X-Forwarded-For".into(), "1.2.3.4".into()),
            ("X-Forwarded-Host".into(), "evil".into()),
            ("X-Real-IP".into(), "1.2.3.4".into()),
            ("Referer".into(), "https://app".into()),
            ("Origin".into(), "https://app".into()),
            ("Host".into(), "internal".into()),
            ("Accept".into(), "application/json".into()),
            ("X-Request-Id".into(), "abc".into()),
        ]);
        assert_eq!(
            headers,
            vec![
                ("Accept".to_string(), "application/json".to_string()),
                ("X-Request-Id".to_string(), "abc".to_string()),
            ]
        );
    }

    #[test]
    fn url_join_deduplicates_slashes() {
        let url = build_url("https://api.example.com/v1/", "/items/7", &[]).unwrap();
        assert_eq!(url, "https://api.example.com/v1/items/7");

        let url = build_url(
            "https://api.example.com",
            "search",
            &[("q".into(), "a b".into())],
        )
        .unwrap();
        assert_eq!(url, "https://api.example.com/search?q=a+b");
    }
}
