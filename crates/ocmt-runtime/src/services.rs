//! Service assembly
//!
//! One [`Services`] value owns every subsystem. Handlers receive it by
//! reference; nothing is resolved through globals except the keyring the
//! crypto layer already owns. The adapters at the bottom glue subsystems
//! together without introducing crate dependencies between them.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use ocmt_alerts::{
    AlertChannel, AlertEngine, AlertEvent, AlertHistoryStore, AlertRuleStore, AlertSinks,
    AlertStores, Broadcaster, ChannelConfigStore, CooldownStore, InMemoryAlertStores, Mailer,
    NotificationStore, RecipientDirectory, WebhookConfig,
};
use ocmt_approvals::{ApprovalRequest, ApprovalService, ApprovalStore, InMemoryApprovalStore};
use ocmt_audit::{AuditEvent, AuditFlusher, AuditLog, AuditStore, InMemoryAuditStore};
use ocmt_core::{ApprovalId, Clock, Error, OwnerId, Result, SandboxId, Severity};
use ocmt_crypto::Keyring;
use ocmt_egress::{
    ActivitySink, CallAudit, EgressFabric, GrantStore, HttpExecutor, Resource, ResourceGrant,
    ResourceStore,
};
use ocmt_events::{
    ContainerEventProxy, PermanentTokenSource, SandboxDirectory, SessionAuthenticator, SseRegistry,
    UpstreamConnector,
};
use ocmt_ratelimit::{RateLimiter, RedisSharedCache, TenantRateLimiter, TrustedProxies};
use ocmt_tokens::TokenService;
use ocmt_vault::{VaultBlob, VaultEngine, VaultSessions};

use crate::config::RuntimeConfig;
use crate::workers::{HealthProbe, HealthRegistry, WorkerSet};

/// Every storage and directory interface the runtime needs
pub struct BackingStores {
    /// Approval rows
    pub approvals: Arc<dyn ApprovalStore>,
    /// Alert rules
    pub alert_rules: Arc<dyn AlertRuleStore>,
    /// Alert cooldown rows
    pub alert_cooldowns: Arc<dyn CooldownStore>,
    /// Alert history rows
    pub alert_history: Arc<dyn AlertHistoryStore>,
    /// In-app notification records
    pub notifications: Arc<dyn NotificationStore>,
    /// Owner channel configuration
    pub channel_configs: Arc<dyn ChannelConfigStore>,
    /// Owner email lookup
    pub recipients: Arc<dyn RecipientDirectory>,
    /// Resource definitions
    pub resources: Arc<dyn ResourceStore>,
    /// Resource grants
    pub grants: Arc<dyn GrantStore>,
    /// Audit sink
    pub audit: Arc<dyn AuditStore>,
    /// Session cookie resolution
    pub sessions: Arc<dyn SessionAuthenticator>,
    /// Sandbox endpoint directory
    pub sandboxes: Arc<dyn SandboxDirectory>,
    /// Permanent token lookup for the event proxy
    pub permanent_tokens: Arc<dyn PermanentTokenSource>,
    /// Health probes for dependent services
    pub health_probes: Vec<Arc<dyn HealthProbe>>,
}

impl BackingStores {
    /// All-in-memory stores around one [`InMemoryDirectory`]; the default
    /// for tests and single-node runs.
    pub fn in_memory(directory: Arc<InMemoryDirectory>) -> Self {
        let alerts = Arc::new(InMemoryAlertStores::new());
        Self {
            approvals: Arc::new(InMemoryApprovalStore::new()),
            alert_rules: alerts.clone(),
            alert_cooldowns: alerts.clone(),
            alert_history: alerts.clone(),
            notifications: alerts,
            channel_configs: directory.clone(),
            recipients: directory.clone(),
            resources: directory.clone(),
            grants: directory.clone(),
            audit: Arc::new(InMemoryAuditStore::new()),
            sessions: directory.clone(),
            sandboxes: directory.clone(),
            permanent_tokens: directory,
            health_probes: Vec::new(),
        }
    }
}

/// The assembled control plane
pub struct Services {
    /// Versioned cipher store
    pub keyring: Arc<Keyring>,
    /// Vault engine
    pub vault: VaultEngine,
    /// Unlock sessions
    pub vault_sessions: Arc<VaultSessions>,
    /// Ephemeral token issuance and validation
    pub tokens: TokenService,
    /// Capability approval state machine
    pub approvals: Arc<ApprovalService>,
    /// Alert fan-out
    pub alerts: Arc<AlertEngine>,
    /// Fixed-window limiter
    pub rate_limiter: Arc<RateLimiter>,
    /// Tenant-aware limiter wrapper
    pub tenant_limiter: Arc<TenantRateLimiter>,
    /// Outbound-call fabric
    pub egress: Arc<EgressFabric>,
    /// SSE subscriber registry
    pub sse: Arc<SseRegistry>,
    /// Sandbox event proxy
    pub event_proxy: Arc<ContainerEventProxy>,
    /// Audit recorder
    pub audit: AuditLog,
    /// Dependent-service health
    pub health: Arc<HealthRegistry>,

    cooldowns: Arc<dyn CooldownStore>,
    audit_flusher: Mutex<Option<AuditFlusher>>,
    clock: Clock,
}

impl Services {
    /// Assemble the control plane. Async only because the shared cache may
    /// need a connection.
    pub async fn build(
        config: &RuntimeConfig,
        keyring: Arc<Keyring>,
        clock: Clock,
        stores: BackingStores,
    ) -> Result<Self> {
        let vault = VaultEngine::new(clock.clone());
        let vault_sessions = Arc::new(VaultSessions::new(clock.clone()));
        let tokens = TokenService::new(clock.clone());
        let approvals = Arc::new(ApprovalService::new(stores.approvals.clone(), clock.clone()));

        let rate_limiter = match &config.redis_url {
            Some(url) => match RedisSharedCache::connect(url).await {
                Ok(cache) => Arc::new(RateLimiter::shared("control", Arc::new(cache), clock.clone())),
                Err(err) => {
                    // Shared cache is a preference, not a dependency.
                    tracing::warn!(error = %err, "shared cache unavailable at startup, rate limiting locally");
                    Arc::new(RateLimiter::local("control", clock.clone()))
                }
            },
            None => Arc::new(RateLimiter::local("control", clock.clone())),
        };
        let trusted = TrustedProxies::parse(
            &config
                .trusted_proxy_cidrs
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>(),
        )
        .map_err(Error::validation)?;
        let tenant_limiter = Arc::new(TenantRateLimiter::new(
            rate_limiter.clone(),
            trusted,
            config.default_rate_limit,
            config.rate_limit_window_secs,
        ));

        let sse = Arc::new(SseRegistry::new());
        let mailer: Option<Arc<dyn Mailer>> = match &config.mailer {
            Some(mailer_config) => Some(Arc::new(HttpMailer::new(mailer_config.clone())?)),
            None => None,
        };
        let poster = Arc::new(
            ocmt_alerts::channel::HttpWebhookPoster::new().map_err(Error::internal)?,
        );
        let alerts = Arc::new(AlertEngine::new(
            AlertStores {
                rules: stores.alert_rules.clone(),
                cooldowns: stores.alert_cooldowns.clone(),
                history: stores.alert_history.clone(),
                notifications: stores.notifications.clone(),
            },
            AlertSinks {
                channel_configs: stores.channel_configs.clone(),
                recipients: stores.recipients.clone(),
                mailer,
                broadcaster: Arc::new(SseAlertBroadcaster { sse: sse.clone() }),
                poster,
            },
            keyring.clone(),
            clock.clone(),
        ));

        let (audit, audit_flusher) = AuditLog::new(stores.audit.clone(), clock.clone());
        let executor: Arc<dyn HttpExecutor> =
            Arc::new(ocmt_egress::ReqwestExecutor::new().map_err(Error::internal)?);
        let egress = Arc::new(EgressFabric::new(
            stores.resources.clone(),
            stores.grants.clone(),
            executor,
            Arc::new(AuditActivitySink {
                audit: audit.clone(),
            }),
            keyring.clone(),
            clock.clone(),
        ));

        let connector: Arc<dyn UpstreamConnector> = Arc::new(
            ocmt_events::proxy::ReqwestUpstreamConnector::new().map_err(Error::internal)?,
        );
        let event_proxy = Arc::new(ContainerEventProxy::new(
            stores.sessions.clone(),
            stores.sandboxes.clone(),
            stores.permanent_tokens.clone(),
            TokenService::new(clock.clone()),
            connector,
        ));

        let health = Arc::new(HealthRegistry::new(stores.health_probes));

        Ok(Self {
            keyring,
            vault,
            vault_sessions,
            tokens,
            approvals,
            alerts,
            rate_limiter,
            tenant_limiter,
            egress,
            sse,
            event_proxy,
            audit,
            health,
            cooldowns: stores.alert_cooldowns.clone(),
            audit_flusher: Mutex::new(Some(audit_flusher)),
            clock,
        })
    }

    /// Spawn the background sweepers and the audit flusher. Call once.
    pub fn start_workers(&self) -> WorkerSet {
        let mut workers = WorkerSet::new();

        if let Some(flusher) = self.audit_flusher.lock().take() {
            let shutdown = workers.shutdown_signal();
            workers.spawn("audit-flusher", flusher.run(shutdown));
        }

        let approvals = self.approvals.clone();
        workers.spawn_interval("approval-expiry", Duration::from_secs(60), move || {
            let approvals = approvals.clone();
            async move {
                if let Err(err) = approvals.expire_pending().await {
                    tracing::warn!(error = %err, "approval expiry sweep failed");
                }
            }
        });

        let cooldowns = self.cooldowns.clone();
        let clock = self.clock.clone();
        workers.spawn_interval("cooldown-purge", Duration::from_secs(3600), move || {
            let cooldowns = cooldowns.clone();
            let now = clock.now_secs();
            async move {
                if let Err(err) = cooldowns.purge_expired(now).await {
                    tracing::warn!(error = %err, "cooldown purge failed");
                }
            }
        });

        let rate_limiter = self.rate_limiter.clone();
        let egress = self.egress.clone();
        let alerts = self.alerts.clone();
        let vault_sessions = self.vault_sessions.clone();
        workers.spawn_interval("window-reaper", Duration::from_secs(300), move || {
            let rate_limiter = rate_limiter.clone();
            let egress = egress.clone();
            let alerts = alerts.clone();
            let vault_sessions = vault_sessions.clone();
            async move {
                rate_limiter.reap_idle();
                egress.window().reap_idle();
                alerts.throttle().reap_idle();
                alerts.reap_idle_locks();
                vault_sessions.reap_expired();
            }
        });

        let health = self.health.clone();
        workers.spawn_interval("health-refresh", Duration::from_secs(15), move || {
            let health = health.clone();
            async move {
                health.refresh().await;
            }
        });

        workers
    }

    /// Unlock an owner's vault and park the derived key in a session.
    /// Returns the decrypted document and the session token. The failure
    /// shape never says what went wrong.
    pub fn unlock_vault(
        &self,
        owner: OwnerId,
        blob: &VaultBlob,
        password: &str,
    ) -> Result<(Value, String)> {
        match self.vault.unlock(blob, password) {
            Ok(unlocked) => {
                let session = self.vault_sessions.insert(owner, unlocked.key);
                self.audit
                    .record(AuditEvent::success(owner, "vault.unlocked"));
                Ok((unlocked.document, session))
            }
            Err(err) => {
                self.audit.record(AuditEvent::failure(
                    owner,
                    "vault.unlocked",
                    "authentication failed",
                ));
                Err(err.into())
            }
        }
    }

    /// Mark an approval issued, audit it, and raise the issuance alert.
    pub async fn issue_capability(&self, id: ApprovalId) -> Result<ApprovalRequest> {
        let issued = self.approvals.mark_issued(id).await?;
        self.audit.record(
            AuditEvent::success(issued.owner, "capability.issued").with_target(&issued.resource),
        );
        self.alerts
            .trigger(AlertEvent {
                event_type: "capability.issued".into(),
                owner: Some(issued.owner),
                group: None,
                title: format!("Capability issued for {}", issued.resource),
                message: format!(
                    "Agent {} now holds {} on {}",
                    issued.subject_public_key,
                    issued
                        .applied
                        .as_ref()
                        .map(|applied| applied.scope.to_string())
                        .unwrap_or_else(|| issued.scope.to_string()),
                    issued.resource
                ),
                severity: Some(Severity::Info),
                metadata: serde_json::json!({}),
            })
            .await;
        Ok(issued)
    }
}

// === Adapters ===

/// Alerts → SSE bridge
struct SseAlertBroadcaster {
    sse: Arc<SseRegistry>,
}

#[async_trait]
impl Broadcaster for SseAlertBroadcaster {
    async fn broadcast(&self, owner: OwnerId, event_name: &str, payload: &Value) {
        self.sse.broadcast_to_owner(owner, event_name, payload);
    }
}

/// Egress → audit bridge
struct AuditActivitySink {
    audit: AuditLog,
}

#[async_trait]
impl ActivitySink for AuditActivitySink {
    async fn record(&self, call: CallAudit) {
        let event = if let Some(error) = call.error {
            AuditEvent::failure(call.owner, "resource.invoked", error)
        } else {
            AuditEvent::success(call.owner, "resource.invoked")
        };
        self.audit.record(
            event.with_target(format!("{}:{} {}", call.resource, call.method, call.path)),
        );
    }
}

/// Mailer speaking to an HTTP enqueue endpoint
struct HttpMailer {
    client: reqwest::Client,
    config: crate::config::MailerConfig,
}

impl HttpMailer {
    fn new(config: crate::config::MailerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::internal(e.to_string()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn enqueue(&self, to: &str, subject: &str, body: &str) -> std::result::Result<(), String> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&serde_json::json!({
                "from": self.config.from,
                "to": to,
                "subject": subject,
                "text": body,
            }))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("mailer returned {}", response.status()));
        }
        Ok(())
    }
}

// === In-memory directory ===

/// One in-memory value implementing every directory-flavored interface
/// the runtime consumes. Tests and single-node deployments populate it
/// directly.
#[derive(Default)]
pub struct InMemoryDirectory {
    resources: DashMap<ocmt_core::ResourceId, Resource>,
    grants: DashMap<(OwnerId, ocmt_core::ResourceId), ResourceGrant>,
    emails: DashMap<OwnerId, String>,
    channel_configs: DashMap<(OwnerId, AlertChannel), WebhookConfig>,
    cookies: DashMap<String, (OwnerId, SandboxId)>,
    sandbox_endpoints: DashMap<SandboxId, String>,
    permanent_tokens: DashMap<OwnerId, String>,
}

impl InMemoryDirectory {
    /// Empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource definition
    pub fn put_resource(&self, resource: Resource) {
        self.resources.insert(resource.id, resource);
    }

    /// Register a grant
    pub fn put_grant(&self, grant: ResourceGrant) {
        self.grants.insert((grant.owner, grant.resource), grant);
    }

    /// Register an owner's email address
    pub fn put_email(&self, owner: OwnerId, address: impl Into<String>) {
        self.emails.insert(owner, address.into());
    }

    /// Register a channel configuration
    pub fn put_channel_config(&self, owner: OwnerId, channel: AlertChannel, config: WebhookConfig) {
        self.channel_configs.insert((owner, channel), config);
    }

    /// Register a session cookie
    pub fn put_session(&self, cookie: impl Into<String>, owner: OwnerId, sandbox: SandboxId) {
        self.cookies.insert(cookie.into(), (owner, sandbox));
    }

    /// Register a sandbox event endpoint
    pub fn put_sandbox_endpoint(&self, sandbox: SandboxId, endpoint: impl Into<String>) {
        self.sandbox_endpoints.insert(sandbox, endpoint.into());
    }

    /// Register an owner's raw permanent token
    pub fn put_permanent_token(&self, owner: OwnerId, token: impl Into<String>) {
        self.permanent_tokens.insert(owner, token.into());
    }
}

#[async_trait]
impl ResourceStore for InMemoryDirectory {
    async fn get(&self, id: ocmt_core::ResourceId) -> Option<Resource> {
        self.resources.get(&id).map(|entry| entry.clone())
    }
}

#[async_trait]
impl GrantStore for InMemoryDirectory {
    async fn grant_for(
        &self,
        owner: OwnerId,
        resource: ocmt_core::ResourceId,
    ) -> Option<ResourceGrant> {
        self.grants.get(&(owner, resource)).map(|entry| entry.clone())
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryDirectory {
    async fn email_for(&self, owner: OwnerId) -> Option<String> {
        self.emails.get(&owner).map(|entry| entry.clone())
    }
}

#[async_trait]
impl ChannelConfigStore for InMemoryDirectory {
    async fn config_for(&self, owner: OwnerId, channel: AlertChannel) -> Option<WebhookConfig> {
        self.channel_configs
            .get(&(owner, channel))
            .map(|entry| entry.clone())
    }
}

#[async_trait]
impl SessionAuthenticator for InMemoryDirectory {
    async fn resolve(&self, session_cookie: &str) -> Option<(OwnerId, SandboxId)> {
        self.cookies.get(session_cookie).map(|entry| *entry)
    }
}

#[async_trait]
impl SandboxDirectory for InMemoryDirectory {
    async fn events_endpoint(&self, sandbox: SandboxId) -> Option<String> {
        self.sandbox_endpoints.get(&sandbox).map(|entry| entry.clone())
    }
}

#[async_trait]
impl PermanentTokenSource for InMemoryDirectory {
    async fn permanent_for(&self, owner: OwnerId) -> Option<String> {
        self.permanent_tokens.get(&owner).map(|entry| entry.clone())
    }
}
