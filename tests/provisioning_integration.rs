//! Integration tests for tenant provisioning.
//!
//! A tenant database is either fully `ready` or absent: every induced
//! failure must leave no database behind.

mod common;

use std::time::Duration;

use common::{CRITICAL, Harness, modules, plain_naming, registry, registry_with};
use enclave::schema::SqlModule;
use enclave::tenant::{
    DatabaseAdmin, NamingPolicy, ProvisionConfig, TenantError, TenantId, TenantState,
    tenant_suffix,
};
use pretty_assertions::assert_eq;

/// Scenario 1: modules apply in rank order and the checklist passes.
#[tokio::test]
async fn test_provision_acme_becomes_ready() {
    let h = Harness::new();
    let acme = TenantId::new("acme");

    let db = h.provisioner.provision(&acme, "agency_acme").await.unwrap();

    assert_eq!(db.database_name, "agency_acme");
    assert_eq!(db.state, TenantState::Ready);
    assert_eq!(h.provisioner.state(&acme), TenantState::Ready);

    let catalog = h.cluster.catalog("agency_acme").unwrap();
    assert_eq!(
        catalog.relations(),
        vec!["tenants", "users", "roles", "invoices", "contacts", "audit_log"]
    );
    for relation in CRITICAL {
        assert!(catalog.has_relation(relation));
    }
    assert_eq!(h.cluster.marker("agency_acme").as_deref(), Some("enclave:ready:acme"));
}

#[tokio::test]
async fn test_provision_releases_its_pool_borrow() {
    let h = Harness::new();
    h.provisioner
        .provision(&TenantId::new("acme"), "acme")
        .await
        .unwrap();

    assert_eq!(h.pools.ref_count("agency_acme"), Some(0));
    assert_eq!(h.cluster.sessions("agency_acme"), 0);
}

#[tokio::test]
async fn test_default_naming_appends_tenant_suffix() {
    let h = Harness::with(registry(), ProvisionConfig::new());
    let acme = TenantId::new("acme");

    let db = h.provisioner.provision(&acme, "Acme Corp").await.unwrap();

    assert_eq!(db.database_name, format!("agency_acme_corp_{}", tenant_suffix(&acme, 8)));
    assert!(h.cluster.exists(&db.database_name));
}

#[tokio::test]
async fn test_invalid_names_never_reach_the_server() {
    let h = Harness::new();
    let acme = TenantId::new("acme");

    for requested in ["", "!!!", "pg_catalog"] {
        let err = h.provisioner.provision(&acme, requested).await.unwrap_err();
        assert!(matches!(err, TenantError::InvalidName { .. }), "{requested}: {err}");
    }
    assert!(h.cluster.events().is_empty());
}

/// Scenario 2: rank 3 of 5 throws; the database is dropped.
#[tokio::test]
async fn test_failing_module_rolls_back_to_absent() {
    let h = Harness::new();
    let acme2 = TenantId::new("acme2");
    h.cluster.fail_statements_containing("invoices");

    let err = h.provisioner.provision(&acme2, "agency_acme2").await.unwrap_err();

    assert!(err.is_provision_error());
    assert!(err.to_string().contains("billing"));
    assert!(!h.cluster.exists("agency_acme2"));
    assert!(!h.cluster.database_exists("agency_acme2").await.unwrap());
    assert_eq!(h.provisioner.state(&acme2), TenantState::Failed);
    assert!(!h.pools.contains("agency_acme2"));
    assert_eq!(
        h.cluster.events(),
        vec!["create agency_acme2", "terminate agency_acme2", "drop agency_acme2"]
    );
}

/// Step 3: `CREATE DATABASE` itself fails.
#[tokio::test]
async fn test_rollback_when_create_fails() {
    let h = Harness::new();
    h.cluster.fail_create_database(true);

    let err = h
        .provisioner
        .provision(&TenantId::new("acme"), "acme")
        .await
        .unwrap_err();

    assert!(err.is_provision_error());
    assert!(!h.cluster.exists("agency_acme"));
}

/// Step 4: the new database cannot be reached.
#[tokio::test]
async fn test_rollback_when_pool_cannot_connect() {
    let h = Harness::new();
    h.cluster.set_unreachable("agency_acme", true);

    let err = h
        .provisioner
        .provision(&TenantId::new("acme"), "acme")
        .await
        .unwrap_err();

    assert!(err.is_provision_error());
    assert!(!h.cluster.exists("agency_acme"));
    assert!(!h.pools.contains("agency_acme"));
}

/// Step 6: modules succeed but a critical relation is missing.
#[tokio::test]
async fn test_rollback_when_checklist_incomplete() {
    let only_identity = std::sync::Arc::new(
        enclave::schema::SchemaRegistry::builder()
            .register_sql(
                SqlModule::new("identity", 1)
                    .statement("CREATE TABLE IF NOT EXISTS tenants (id uuid PRIMARY KEY)"),
            )
            .build()
            .unwrap(),
    );
    let h = Harness::with(only_identity, ProvisionConfig::new().naming(plain_naming()));

    let err = h
        .provisioner
        .provision(&TenantId::new("acme"), "acme")
        .await
        .unwrap_err();

    match &err {
        TenantError::Provision { source, .. } => match source.as_ref() {
            TenantError::MissingRelations { relations, .. } => {
                assert_eq!(relations, &vec!["users".to_string()]);
            }
            other => panic!("expected MissingRelations, got {other}"),
        },
        other => panic!("expected Provision, got {other}"),
    }
    assert!(!h.cluster.exists("agency_acme"));
}

/// A stalled module hits the provisioning timeout and takes the rollback path.
#[tokio::test(start_paused = true)]
async fn test_timeout_rolls_back() {
    let h = Harness::with(
        registry(),
        ProvisionConfig::new()
            .naming(plain_naming())
            .timeout(Duration::from_secs(30)),
    );
    h.cluster
        .stall_statements_containing("contacts", Duration::from_secs(3600));

    let err = h
        .provisioner
        .provision(&TenantId::new("acme"), "acme")
        .await
        .unwrap_err();

    assert!(err.is_provision_error());
    assert!(err.is_timeout());
    assert!(!h.cluster.exists("agency_acme"));
}

#[tokio::test]
async fn test_every_failure_point_leaves_nothing() {
    for needle in ["tenants", "roles", "invoices", "contacts", "audit_log"] {
        let h = Harness::new();
        h.cluster.fail_statements_containing(needle);

        let err = h
            .provisioner
            .provision(&TenantId::new("acme"), "acme")
            .await
            .unwrap_err();

        assert!(err.is_provision_error(), "{needle}");
        assert!(!h.cluster.exists("agency_acme"), "{needle}");
        assert!(h.cluster.database_names().is_empty(), "{needle}");
    }
}

#[tokio::test]
async fn test_retry_after_failure_succeeds() {
    let h = Harness::new();
    let acme = TenantId::new("acme");
    h.cluster.fail_statements_containing("invoices");
    assert!(h.provisioner.provision(&acme, "acme").await.is_err());

    h.cluster.clear_faults();
    let db = h.provisioner.provision(&acme, "acme").await.unwrap();

    assert_eq!(db.state, TenantState::Ready);
    assert_eq!(h.provisioner.state(&acme), TenantState::Ready);
}

#[tokio::test]
async fn test_existing_foreign_database_is_a_name_conflict() {
    let h = Harness::new();
    let legacy = h.cluster.insert_database("agency_acme", None);
    legacy.seed("customers");

    let err = h
        .provisioner
        .provision(&TenantId::new("acme"), "acme")
        .await
        .unwrap_err();

    assert!(err.is_name_conflict());
    assert!(h.cluster.exists("agency_acme"));
    assert!(h.cluster.catalog("agency_acme").unwrap().has_relation("customers"));
    assert_eq!(h.provisioner.state(&TenantId::new("acme")), TenantState::Absent);
}

#[tokio::test]
async fn test_ready_database_of_another_tenant_is_a_name_conflict() {
    let h = Harness::new();
    h.provisioner
        .provision(&TenantId::new("acme"), "shared")
        .await
        .unwrap();

    let err = h
        .provisioner
        .provision(&TenantId::new("globex"), "shared")
        .await
        .unwrap_err();

    assert!(err.is_name_conflict());
    assert_eq!(
        h.cluster.marker("agency_shared").as_deref(),
        Some("enclave:ready:acme")
    );
}

#[tokio::test]
async fn test_residual_from_own_aborted_attempt_is_rebuilt() {
    let h = Harness::new();
    let residual = h
        .cluster
        .insert_database("agency_acme", Some("enclave:provisioning:acme"));
    residual.seed("tenants");

    let db = h
        .provisioner
        .provision(&TenantId::new("acme"), "acme")
        .await
        .unwrap();

    assert_eq!(db.state, TenantState::Ready);
    assert_eq!(
        h.cluster.events(),
        vec!["terminate agency_acme", "drop agency_acme", "create agency_acme"]
    );
    assert_eq!(h.cluster.catalog("agency_acme").unwrap().relations().len(), 6);
}

/// A create that was interrupted before its marker was written leaves an
/// unmarked, empty database behind. It must not block the tenant forever.
#[tokio::test]
async fn test_unmarked_empty_database_is_rebuilt() {
    let h = Harness::new();
    h.cluster.insert_database("agency_acme", None);

    let db = h
        .provisioner
        .provision(&TenantId::new("acme"), "acme")
        .await
        .unwrap();

    assert_eq!(db.state, TenantState::Ready);
    assert_eq!(
        h.cluster.events(),
        vec!["terminate agency_acme", "drop agency_acme", "create agency_acme"]
    );
    assert_eq!(h.cluster.marker("agency_acme").as_deref(), Some("enclave:ready:acme"));
    assert_eq!(h.pools.ref_count("agency_acme"), Some(0));
}

#[tokio::test]
async fn test_residual_of_another_tenant_is_not_dropped() {
    let h = Harness::new();
    h.cluster
        .insert_database("agency_acme", Some("enclave:provisioning:globex"));

    let err = h
        .provisioner
        .provision(&TenantId::new("acme"), "acme")
        .await
        .unwrap_err();

    assert!(err.is_name_conflict());
    assert!(h.cluster.exists("agency_acme"));
}

#[tokio::test]
async fn test_concurrent_provisioning_of_one_name_is_serialized() {
    let h = Harness::new();
    let acme = TenantId::new("acme");

    let (a, b) = tokio::join!(
        h.provisioner.provision(&acme, "acme"),
        h.provisioner.provision(&acme, "acme"),
    );

    let outcomes = [a.is_ok(), b.is_ok()];
    assert!(outcomes.contains(&true));
    let failure = [a, b].into_iter().find_map(Result::err);
    if let Some(err) = failure {
        assert!(err.is_name_conflict());
    }
    assert!(h.cluster.exists("agency_acme"));
}

#[tokio::test]
async fn test_different_tenants_provision_concurrently() {
    let h = Harness::new();
    let tenants: Vec<TenantId> = (0..8).map(|i| TenantId::new(format!("t{i}"))).collect();

    let results = futures::future::join_all(
        tenants
            .iter()
            .map(|t| h.provisioner.provision(t, t.as_str())),
    )
    .await;

    for result in results {
        assert_eq!(result.unwrap().state, TenantState::Ready);
    }
    assert_eq!(h.cluster.list_databases("agency_").await.unwrap().len(), 8);
}

#[tokio::test]
async fn test_deprovision_requires_ownership() {
    let h = Harness::new();
    let acme = TenantId::new("acme");
    h.provisioner.provision(&acme, "acme").await.unwrap();

    let err = h
        .provisioner
        .deprovision(&TenantId::new("globex"), "agency_acme")
        .await
        .unwrap_err();
    assert!(matches!(err, TenantError::NotOwned { .. }));
    assert!(h.cluster.exists("agency_acme"));

    h.provisioner.deprovision(&acme, "agency_acme").await.unwrap();
    assert!(!h.cluster.exists("agency_acme"));
    assert!(!h.pools.contains("agency_acme"));
    assert_eq!(h.provisioner.state(&acme), TenantState::Absent);
}

#[tokio::test]
async fn test_deprovision_terminates_open_sessions() {
    let h = Harness::new();
    let acme = TenantId::new("acme");
    h.provisioner.provision(&acme, "acme").await.unwrap();

    let handle = h.pools.get_pool("agency_acme").await.unwrap();
    let conn = handle.acquire().await.unwrap();
    assert_eq!(h.cluster.sessions("agency_acme"), 1);

    h.provisioner.deprovision(&acme, "agency_acme").await.unwrap();

    assert!(!h.cluster.exists("agency_acme"));
    let err = conn.select("users").await.unwrap_err();
    assert!(err.to_string().contains("terminating"));
}

#[tokio::test]
async fn test_deprovision_unchecked_drops_foreign_database() {
    let h = Harness::new();
    h.cluster.insert_database("agency_legacy", None);

    h.provisioner
        .deprovision_unchecked("agency_legacy")
        .await
        .unwrap();

    assert!(!h.cluster.exists("agency_legacy"));
}

#[tokio::test]
async fn test_new_module_reaches_new_tenants_only_through_provisioning() {
    let extra = vec![
        SqlModule::new("projects", 6)
            .statement("CREATE TABLE IF NOT EXISTS projects (id uuid PRIMARY KEY)"),
    ];
    let h = Harness::with(
        registry_with(extra),
        ProvisionConfig::new().naming(NamingPolicy::new().append_tenant_suffix(false)),
    );

    h.provisioner
        .provision(&TenantId::new("fresh"), "fresh")
        .await
        .unwrap();

    let catalog = h.cluster.catalog("agency_fresh").unwrap();
    assert!(catalog.has_relation("projects"));
    assert_eq!(catalog.relations().len(), modules().len() + 2);
}
