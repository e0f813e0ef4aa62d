//! # OCMT Events
//!
//! Live event delivery to browsers. The registry fans control-plane events
//! out to an owner's SSE subscribers; the proxy bridges a browser to its
//! sandbox's event stream, minting an ephemeral token for the upstream hop
//! and tearing the upstream down when the browser goes away.

#![forbid(unsafe_code)]

pub mod proxy;
pub mod registry;

pub use proxy::{
    ContainerEventProxy, PermanentTokenSource, ProxyRequest, ReqwestUpstreamConnector,
    SandboxDirectory, SessionAuthenticator, UpstreamConnector,
};
pub use registry::{sse_frame, SseRegistry, SseSubscription};
