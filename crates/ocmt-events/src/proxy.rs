//! Cookie-authenticated proxy of a sandbox's event stream
//!
//! The browser never talks to its sandbox directly and never sees a
//! gateway token. It presents its session cookie; the proxy resolves the
//! owner and sandbox, mints an ephemeral token for the upstream hop, and
//! pipes the sandbox stream back, leading with a `connected` frame. The
//! upstream connection lives exactly as long as the client keeps reading.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

use ocmt_core::{Error, OwnerId, Result, SandboxId};
use ocmt_tokens::TokenService;

use crate::registry::sse_frame;

/// Frames buffered toward the client before the pipe stalls
const CLIENT_BUFFER: usize = 64;
/// TTL of the ephemeral token minted for the upstream hop
const UPSTREAM_TOKEN_TTL_SECS: i64 = 3600;

/// What the HTTP layer extracted from the incoming request
#[derive(Debug, Clone, Default)]
pub struct ProxyRequest {
    /// The session cookie value, if any
    pub session_cookie: Option<String>,
    /// A `token` query parameter, if the client sent one. Never honored.
    pub query_token: Option<String>,
}

/// Resolves a session cookie to its owner and sandbox
#[async_trait]
pub trait SessionAuthenticator: Send + Sync {
    /// `None` for missing, expired, or unknown sessions
    async fn resolve(&self, session_cookie: &str) -> Option<(OwnerId, SandboxId)>;
}

/// Resolves a sandbox's event-stream endpoint
#[async_trait]
pub trait SandboxDirectory: Send + Sync {
    /// Base URL of the sandbox's SSE endpoint
    async fn events_endpoint(&self, sandbox: SandboxId) -> Option<String>;
}

/// Supplies the owner's decrypted permanent token for signing
#[async_trait]
pub trait PermanentTokenSource: Send + Sync {
    /// The raw permanent token, or `None` when the owner has none
    async fn permanent_for(&self, owner: OwnerId) -> Option<String>;
}

/// Opens the upstream streaming GET
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Connect with a bearer token; yields raw chunks of the SSE body
    async fn open(
        &self,
        url: &str,
        bearer: &str,
    ) -> std::result::Result<BoxStream<'static, std::result::Result<String, String>>, String>;
}

/// Production connector backed by reqwest's streaming body
pub struct ReqwestUpstreamConnector {
    client: reqwest::Client,
}

impl ReqwestUpstreamConnector {
    /// Connector with no overall deadline; SSE streams are long-lived
    pub fn new() -> std::result::Result<Self, String> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UpstreamConnector for ReqwestUpstreamConnector {
    async fn open(
        &self,
        url: &str,
        bearer: &str,
    ) -> std::result::Result<BoxStream<'static, std::result::Result<String, String>>, String> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {bearer}"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("upstream returned {}", response.status()));
        }
        let stream = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .map_err(|e| e.to_string())
            })
            .boxed();
        Ok(stream)
    }
}

/// Bridges a browser session to its sandbox's event stream
pub struct ContainerEventProxy {
    sessions: Arc<dyn SessionAuthenticator>,
    sandboxes: Arc<dyn SandboxDirectory>,
    tokens: Arc<dyn PermanentTokenSource>,
    token_service: TokenService,
    connector: Arc<dyn UpstreamConnector>,
}

impl ContainerEventProxy {
    /// Assemble a proxy
    pub fn new(
        sessions: Arc<dyn SessionAuthenticator>,
        sandboxes: Arc<dyn SandboxDirectory>,
        tokens: Arc<dyn PermanentTokenSource>,
        token_service: TokenService,
        connector: Arc<dyn UpstreamConnector>,
    ) -> Self {
        Self {
            sessions,
            sandboxes,
            tokens,
            token_service,
            connector,
        }
    }

    /// Open the proxied stream. The receiver yields framed SSE records;
    /// dropping it cancels the upstream connection.
    pub async fn open(&self, request: ProxyRequest) -> Result<mpsc::Receiver<String>> {
        if request.query_token.is_some() {
            // Tokens in query strings end up in access logs; only the
            // cookie path is acceptable here.
            tracing::warn!("query-string token presented to the event proxy; refusing");
            return Err(Error::auth_required());
        }
        let cookie = request.session_cookie.ok_or_else(Error::auth_required)?;
        let (owner, sandbox) = self
            .sessions
            .resolve(&cookie)
            .await
            .ok_or_else(Error::auth_invalid)?;

        let endpoint = self
            .sandboxes
            .events_endpoint(sandbox)
            .await
            .ok_or_else(|| Error::unavailable("sandbox has no event endpoint"))?;
        let permanent = self
            .tokens
            .permanent_for(owner)
            .await
            .ok_or_else(Error::auth_invalid)?;
        let ephemeral = self
            .token_service
            .issue(owner, &permanent, UPSTREAM_TOKEN_TTL_SECS)
            .map_err(|err| Error::internal(err.to_string()))?;

        let mut upstream = self
            .connector
            .open(&endpoint, &ephemeral)
            .await
            .map_err(Error::unavailable)?;

        let (sender, receiver) = mpsc::channel(CLIENT_BUFFER);
        let connected = sse_frame("connected", &json!({ "sandboxId": sandbox }));
        sender
            .send(connected)
            .await
            .map_err(|_| Error::internal("client went away during connect"))?;

        // The pipe owns the upstream stream; when the client drops the
        // receiver the send fails and both sides wind down.
        tokio::spawn(async move {
            while let Some(chunk) = upstream.next().await {
                match chunk {
                    Ok(data) => {
                        if sender.send(data).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "upstream event stream ended");
                        break;
                    }
                }
            }
        });

        Ok(receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use ocmt_core::{Clock, ErrorKind};
    use ocmt_tokens::generate_permanent;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixtureSessions {
        owner: OwnerId,
        sandbox: SandboxId,
    }

    #[async_trait]
    impl SessionAuthenticator for FixtureSessions {
        async fn resolve(&self, cookie: &str) -> Option<(OwnerId, SandboxId)> {
            (cookie == "good-cookie").then_some((self.owner, self.sandbox))
        }
    }

    struct FixtureSandboxes;

    #[async_trait]
    impl SandboxDirectory for FixtureSandboxes {
        async fn events_endpoint(&self, _sandbox: SandboxId) -> Option<String> {
            Some("http://sandbox.internal:7001/events".into())
        }
    }

    struct FixtureTokens {
        permanent: String,
    }

    #[async_trait]
    impl PermanentTokenSource for FixtureTokens {
        async fn permanent_for(&self, _owner: OwnerId) -> Option<String> {
            Some(self.permanent.clone())
        }
    }

    /// Connector yielding a scripted stream and counting open calls
    struct ScriptedConnector {
        opens: AtomicUsize,
        chunks: Vec<String>,
    }

    #[async_trait]
    impl UpstreamConnector for ScriptedConnector {
        async fn open(
            &self,
            _url: &str,
            bearer: &str,
        ) -> std::result::Result<BoxStream<'static, std::result::Result<String, String>>, String>
        {
            assert!(!bearer.is_empty());
            self.opens.fetch_add(1, Ordering::SeqCst);
            let chunks: Vec<std::result::Result<String, String>> =
                self.chunks.iter().cloned().map(Ok).collect();
            Ok(futures::stream::iter(chunks).boxed())
        }
    }

    fn proxy(connector: Arc<ScriptedConnector>) -> (ContainerEventProxy, OwnerId) {
        let owner = OwnerId::new();
        let (clock, _) = Clock::manual(1_700_000_000_000);
        let proxy = ContainerEventProxy::new(
            Arc::new(FixtureSessions {
                owner,
                sandbox: SandboxId::new(),
            }),
            Arc::new(FixtureSandboxes),
            Arc::new(FixtureTokens {
                permanent: generate_permanent(),
            }),
            TokenService::new(clock),
            connector,
        );
        (proxy, owner)
    }

    fn scripted(chunks: &[&str]) -> Arc<ScriptedConnector> {
        Arc::new(ScriptedConnector {
            opens: AtomicUsize::new(0),
            chunks: chunks.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[tokio::test]
    async fn connected_frame_leads_then_upstream_is_piped() {
        let connector = scripted(&["event: task\ndata: {\"id\":1}\n\n"]);
        let (proxy, _) = proxy(connector.clone());

        let mut stream = proxy
            .open(ProxyRequest {
                session_cookie: Some("good-cookie".into()),
                query_token: None,
            })
            .await
            .unwrap();

        let first = stream.recv().await.unwrap();
        assert!(first.starts_with("event: connected\n"));
        let second = stream.recv().await.unwrap();
        assert_eq!(second, "event: task\ndata: {\"id\":1}\n\n");
        assert!(stream.recv().await.is_none());
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn query_tokens_are_refused_outright() {
        let (proxy, _) = proxy(scripted(&[]));
        let err = proxy
            .open(ProxyRequest {
                session_cookie: Some("good-cookie".into()),
                query_token: Some("sneaky".into()),
            })
            .await
            .unwrap_err();
        assert_matches!(err.kind, ErrorKind::AuthRequired);
    }

    #[tokio::test]
    async fn missing_and_bad_cookies_fail_appropriately() {
        let (proxy, _) = proxy(scripted(&[]));
        let err = proxy.open(ProxyRequest::default()).await.unwrap_err();
        assert_matches!(err.kind, ErrorKind::AuthRequired);

        let err = proxy
            .open(ProxyRequest {
                session_cookie: Some("stale-cookie".into()),
                query_token: None,
            })
            .await
            .unwrap_err();
        assert_matches!(err.kind, ErrorKind::AuthInvalid);
    }
}
