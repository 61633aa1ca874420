#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use compliance_ledger::audit::NewEvent;
use compliance_ledger::config::AppConfig;
use compliance_ledger::database::Database;
use compliance_ledger::vault::PassthroughVault;
use compliance_ledger::AuditLedger;

/// Setup an in-memory SQLite database for testing
pub async fn setup_test_db() -> Database {
    Database::new_in_memory().await.expect("Failed to create test database")
}

/// Ledger over the given database with default configuration
pub fn ledger_for(db: &Database) -> AuditLedger {
    ledger_with_config(db, &AppConfig::default())
}

pub fn ledger_with_config(db: &Database, config: &AppConfig) -> AuditLedger {
    AuditLedger::new(Arc::new(db.ledger_store()), Arc::new(PassthroughVault), config)
}

/// File-backed database in a temporary directory, shared by several pools
pub async fn setup_file_db(dir: &tempfile::TempDir) -> (String, Database) {
    let url = format!("sqlite://{}", dir.path().join("ledger.db").display());
    let db = Database::new(&url).await.expect("Failed to create file database");
    db.run_migrations().await.expect("Failed to run migrations");
    (url, db)
}

pub fn consent_event(tenant_id: &str, student: &str) -> NewEvent {
    NewEvent::new(tenant_id, "u1", "consent.grant", "student", student)
        .payload(format!("{{\"student\":\"{}\",\"scope\":\"directory\"}}", student))
}

pub fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days)
}

/// Append `count` events that occurred `age_days` ago
pub async fn append_aged(ledger: &AuditLedger, tenant_id: &str, count: usize, age_days: i64) {
    for i in 0..count {
        let request = NewEvent::new(tenant_id, "registrar", "record.disclose", "transcript", format!("t-{}", i))
            .occurred_at(days_ago(age_days))
            .payload(format!("disclosure-{}", i));
        ledger.append(request).await.expect("append failed");
    }
}
