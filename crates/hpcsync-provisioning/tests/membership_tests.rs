//! Membership Tests
//!
//! Accounting sync planning and fail-fast batch execution.

mod common;

use std::sync::Arc;

use hpcsync_connector::command::AccountingCommand;
use hpcsync_connector::entity::{Entity, EntityKind};
use hpcsync_connector::operation::AttributeSet;
use hpcsync_connector::traits::Association;
use hpcsync_provisioning::error::SyncError;
use hpcsync_provisioning::membership::{AccountingSync, AccountingSyncConfig, BatchExecutor};

use common::{at, MemorySource, ScriptedAccounting};

fn vo(key: &str, members: &[&str]) -> Entity {
    Entity::new(
        EntityKind::Vo,
        key,
        AttributeSet::new()
            .with("members", members.to_vec())
            .with("institute", "gent"),
        at(1, 0),
    )
}

fn account(key: &str, status: &str) -> Entity {
    Entity::new(
        EntityKind::Account,
        key,
        AttributeSet::new().with("status", status),
        at(1, 0),
    )
}

fn config(clusters: &[&str]) -> AccountingSyncConfig {
    AccountingSyncConfig {
        clusters: clusters.iter().map(|c| c.to_string()).collect(),
        parent: "gent".to_string(),
        ..AccountingSyncConfig::default()
    }
}

fn commands(n: usize) -> Vec<AccountingCommand> {
    (0..n)
        .map(|i| AccountingCommand::remove_member(format!("vsc4000{i}"), "doduo"))
        .collect()
}

// =============================================================================
// Batch executor
// =============================================================================

#[tokio::test]
async fn test_third_command_failure_aborts_batch() {
    let backend = Arc::new(ScriptedAccounting::default().failing_at(2));
    let executor = BatchExecutor::new(backend.clone());

    let err = executor.execute(&commands(6)).await.unwrap_err();

    assert_eq!(backend.execute_calls(), 3);
    assert!(err.is_fatal());
    match err {
        SyncError::CommandFailed { index, status, .. } => {
            assert_eq!(index, 2);
            assert_eq!(status, 1);
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_batch_runs_in_order() {
    let backend = Arc::new(ScriptedAccounting::default());
    let executor = BatchExecutor::new(backend.clone());
    let batch = commands(3);

    let summary = executor.execute(&batch).await.unwrap();

    assert_eq!(summary.planned, 3);
    assert_eq!(summary.executed, 3);
    assert_eq!(backend.executed(), batch);
}

#[tokio::test]
async fn test_dry_run_executes_nothing() {
    let backend = Arc::new(ScriptedAccounting::default().failing_at(0));
    let executor = BatchExecutor::new(backend.clone()).with_dry_run(true);

    let summary = executor.execute(&commands(4)).await.unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.planned, 4);
    assert_eq!(summary.executed, 0);
    assert_eq!(backend.execute_calls(), 0);
}

// =============================================================================
// Accounting sync
// =============================================================================

#[tokio::test]
async fn test_plan_creates_grouping_and_moves_member() {
    let source = Arc::new(
        MemorySource::new()
            .with(vo("g1", &["A"]))
            .with(vo("g2", &["B", "C"]))
            .with(account("A", "active"))
            .with(account("B", "active"))
            .with(account("C", "active")),
    );
    let backend = Arc::new(ScriptedAccounting::new(vec![
        Association::grouping("doduo", "g1"),
        Association::member("doduo", "g1", "A"),
        Association::member("doduo", "g1", "B"),
    ]));
    let sync = AccountingSync::new(source, backend, config(&["doduo"]));

    let plan = sync.plan().await.unwrap();

    assert_eq!(
        plan,
        vec![
            AccountingCommand::add_grouping("g2", "gent", "gent", "doduo"),
            AccountingCommand::add_member("B", "g2", "doduo"),
            AccountingCommand::remove_member_from("B", "g1", "doduo"),
            AccountingCommand::add_member("C", "g2", "doduo"),
        ]
    );
}

#[tokio::test]
async fn test_inactive_accounts_never_added() {
    let source = Arc::new(
        MemorySource::new()
            .with(vo("g1", &["A", "B"]))
            .with(account("A", "active"))
            .with(account("B", "inactive")),
    );
    let backend = Arc::new(ScriptedAccounting::new(vec![
        Association::grouping("doduo", "g1"),
        Association::member("doduo", "g1", "B"),
    ]));
    let sync = AccountingSync::new(source, backend, config(&["doduo"]));

    let plan = sync.plan().await.unwrap();

    assert_eq!(
        plan,
        vec![
            AccountingCommand::remove_member("B", "doduo"),
            AccountingCommand::add_member("A", "g1", "doduo"),
        ]
    );
}

#[tokio::test]
async fn test_plan_spans_clusters() {
    let source = Arc::new(
        MemorySource::new()
            .with(vo("g1", &["A"]))
            .with(account("A", "active")),
    );
    let backend = Arc::new(ScriptedAccounting::new(vec![
        Association::grouping("doduo", "g1"),
        Association::member("doduo", "g1", "A"),
    ]));
    let sync = AccountingSync::new(source, backend, config(&["doduo", "joltik"]));

    let plan = sync.plan().await.unwrap();

    assert_eq!(
        plan,
        vec![
            AccountingCommand::add_grouping("g1", "gent", "gent", "joltik"),
            AccountingCommand::add_member("A", "g1", "joltik"),
        ]
    );
}

#[tokio::test]
async fn test_run_reports_commands() {
    let source = Arc::new(
        MemorySource::new()
            .with(vo("g1", &["A"]))
            .with(account("A", "active")),
    );
    let backend = Arc::new(ScriptedAccounting::new(vec![Association::grouping(
        "doduo", "g1",
    )]));
    let sync = AccountingSync::new(source, backend.clone(), config(&["doduo"]));

    let report = sync.run().await.unwrap();

    let commands = report.commands.unwrap();
    assert_eq!(commands.planned, 1);
    assert_eq!(commands.executed, 1);
    assert_eq!(backend.execute_calls(), 1);
    assert!(report.window.is_none());
}

#[tokio::test]
async fn test_no_clusters_is_configuration_error() {
    let sync = AccountingSync::new(
        Arc::new(MemorySource::new()),
        Arc::new(ScriptedAccounting::default()),
        config(&[]),
    );

    let err = sync.plan().await.unwrap_err();
    assert!(matches!(err, SyncError::Configuration { .. }));
    assert!(!err.is_fatal());
}
