//! Cross-subsystem flows through one assembled `Services` value

use std::sync::Arc;

use ocmt_alerts::{AlertChannel, AlertRule, InMemoryAlertStores};
use ocmt_approvals::{Constraints, NewApproval};
use ocmt_audit::InMemoryAuditStore;
use ocmt_core::{Clock, OwnerId, Permission, PermissionSet, RuleId, Severity};
use ocmt_crypto::Keyring;
use ocmt_runtime::{BackingStores, InMemoryDirectory, RuntimeConfig, Services};

const KEY: &str = "0606060606060606060606060606060606060606060606060606060606060606";
const PASSWORD: &str = "correct horse battery staple!!";

async fn services() -> (Arc<Services>, Arc<InMemoryDirectory>, Arc<InMemoryAuditStore>) {
    let directory = Arc::new(InMemoryDirectory::new());
    let mut stores = BackingStores::in_memory(directory.clone());
    let audit_store = Arc::new(InMemoryAuditStore::new());
    stores.audit = audit_store.clone();

    let (clock, _) = Clock::manual(1_700_000_000_000);
    let keyring = Arc::new(Keyring::new(0, KEY).unwrap());
    let services = Services::build(&RuntimeConfig::default(), keyring, clock, stores)
        .await
        .unwrap();
    (Arc::new(services), directory, audit_store)
}

#[tokio::test]
async fn vault_unlock_creates_a_session_and_audits() {
    let (services, _, audit_store) = services().await;
    let owner = OwnerId::new();
    let created = services.vault.create(PASSWORD).unwrap();

    let (document, session) = services.unlock_vault(owner, &created.blob, PASSWORD).unwrap();
    assert!(document["integrations"].as_object().unwrap().is_empty());

    // The parked key unlocks without the KDF.
    let key = services.vault_sessions.get(&session, owner).unwrap();
    let again = services.vault.unlock_with_key(&created.blob, &key).unwrap();
    assert_eq!(again.document, document);

    // Wrong password: opaque failure, failure audit row.
    let err = services.unlock_vault(owner, &created.blob, "wrong").unwrap_err();
    assert_eq!(err.message, "authentication failed");

    // Drain the write-behind queue.
    let workers = services.start_workers();
    workers.stop().await;
    let rows = audit_store.snapshot();
    let unlocks: Vec<_> = rows.iter().filter(|row| row.event_type == "vault.unlocked").collect();
    assert_eq!(unlocks.len(), 2);
    assert!(unlocks[0].success);
    assert!(!unlocks[1].success);
}

#[tokio::test]
async fn capability_issuance_is_audited_and_alerted() {
    let (services, _, audit_store) = services().await;
    let owner = OwnerId::new();

    let request = services
        .approvals
        .request(NewApproval {
            owner,
            subject_public_key: "agent-pk".into(),
            subject_email: None,
            resource: "github".into(),
            scope: PermissionSet::from_iter([Permission::Read, Permission::List]),
            expires_in_seconds: 86_400,
            max_calls: None,
            reason: Some("nightly sync".into()),
        })
        .await
        .unwrap();

    services
        .approvals
        .approve_with_constraints(
            request.id,
            Constraints {
                max_calls: Some(50),
                ..Constraints::default()
            },
        )
        .await
        .unwrap();

    let issued = services.issue_capability(request.id).await.unwrap();
    assert_eq!(issued.applied.as_ref().unwrap().max_calls, Some(50));

    let workers = services.start_workers();
    workers.stop().await;
    assert!(audit_store
        .snapshot()
        .iter()
        .any(|row| row.event_type == "capability.issued" && row.success));
}

#[tokio::test]
async fn issuance_alert_reaches_an_sse_subscriber() {
    let directory = Arc::new(InMemoryDirectory::new());
    let mut stores = BackingStores::in_memory(directory.clone());
    let alert_stores = Arc::new(InMemoryAlertStores::new());
    stores.alert_rules = alert_stores.clone();
    stores.alert_cooldowns = alert_stores.clone();
    stores.alert_history = alert_stores.clone();
    stores.notifications = alert_stores.clone();
    let (clock, _) = Clock::manual(1_700_000_000_000);
    let keyring = Arc::new(Keyring::new(0, KEY).unwrap());
    let services = Arc::new(
        Services::build(&RuntimeConfig::default(), keyring, clock, stores)
            .await
            .unwrap(),
    );

    alert_stores.add_rule(AlertRule {
        id: RuleId::new(),
        owner: None,
        group: None,
        event_type: "capability.issued".into(),
        severity_threshold: Severity::Info,
        threshold_count: 1,
        threshold_window_minutes: 15,
        cooldown_minutes: 60,
        channels: vec![AlertChannel::InApp],
    });

    let owner = OwnerId::new();
    let mut subscription = services.sse.subscribe(owner);

    let request = services
        .approvals
        .request(NewApproval {
            owner,
            subject_public_key: "agent-pk".into(),
            subject_email: None,
            resource: "calendar".into(),
            scope: PermissionSet::from_iter([Permission::Read]),
            expires_in_seconds: 3_600,
            max_calls: None,
            reason: None,
        })
        .await
        .unwrap();
    services.approvals.approve(request.id).await.unwrap();
    services.issue_capability(request.id).await.unwrap();

    let frame = subscription.frames.try_recv().unwrap();
    assert!(frame.starts_with("event: notification\n"));
    assert!(frame.contains("calendar"));
}

#[tokio::test]
async fn tenant_limits_flow_through_the_assembled_limiter() {
    let (services, _, _) = services().await;
    let identity = ocmt_ratelimit::RequestIdentity {
        tenant: Some(ocmt_core::TenantId::new()),
        plan: Some(ocmt_core::Plan::Free),
        api_key_override: None,
        peer: "203.0.113.9".parse().unwrap(),
        forwarded_for: None,
        real_ip: None,
    };
    for _ in 0..100 {
        assert!(services.tenant_limiter.check("api", &identity).await.allowed());
    }
    assert!(!services.tenant_limiter.check("api", &identity).await.allowed());
}
