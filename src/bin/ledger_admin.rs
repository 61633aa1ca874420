//! Ledger administration CLI
//!
//! Operational access to a compliance ledger database: record events,
//! inspect chains, run retention by hand and produce offline exports.

use anyhow::{anyhow, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use compliance_ledger::audit::{
    export_tenant, AuditEvent, NewEvent, RetentionAction, RetentionPolicy,
};
use compliance_ledger::config::AppConfig;
use compliance_ledger::database::Database;
use compliance_ledger::vault::PassthroughVault;
use compliance_ledger::AuditLedger;

#[derive(Parser)]
#[command(name = "ledger-admin")]
#[command(about = "Compliance ledger administration tool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database URL (defaults to the configured database_url)
    #[arg(long)]
    database_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Append an event to a tenant's chain
    Append {
        #[arg(short, long)]
        tenant: String,

        #[arg(long)]
        actor: String,

        #[arg(long)]
        action: String,

        #[arg(long)]
        resource_type: String,

        #[arg(long)]
        resource_id: String,

        /// Payload as UTF-8 text
        #[arg(short, long)]
        payload: Option<String>,

        /// RFC 3339 timestamp (defaults to now)
        #[arg(long)]
        occurred_at: Option<DateTime<Utc>>,

        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Print events in an inclusive sequence range
    Read {
        #[arg(short, long)]
        tenant: String,

        #[arg(long, default_value_t = 1)]
        from: u64,

        #[arg(long)]
        to: u64,
    },

    /// Show a tenant's tail
    Tail {
        #[arg(short, long)]
        tenant: String,
    },

    /// List a tenant's checkpoints
    Checkpoints {
        #[arg(short, long)]
        tenant: String,
    },

    /// Run retention for a tenant now
    Retention {
        #[arg(short, long)]
        tenant: String,

        /// Override the configured policy's age limit
        #[arg(long)]
        max_age_days: Option<u32>,

        /// Override the configured policy's action (archive, anonymize, rollup)
        #[arg(long)]
        action: Option<RetentionAction>,
    },

    /// Retry payload erasure for committed checkpoints
    Erasures {
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
    },

    /// Inclusion proof of a checkpointed event
    Prove {
        #[arg(short, long)]
        tenant: String,

        sequence: u64,
    },

    /// Write a tenant's ledger to a JSON Lines file
    Export {
        #[arg(short, long)]
        tenant: String,

        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "compliance_ledger=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;
    let database_url = cli.database_url.clone().unwrap_or_else(|| config.database_url.clone());

    let db = Database::new(&database_url).await?;
    db.run_migrations().await?;
    let ledger = AuditLedger::new(Arc::new(db.ledger_store()), Arc::new(PassthroughVault), &config);

    match cli.command {
        Commands::Append {
            tenant,
            actor,
            action,
            resource_type,
            resource_id,
            payload,
            occurred_at,
            idempotency_key,
        } => {
            let mut request = NewEvent::new(tenant, actor, action, resource_type, resource_id)
                .payload(payload.unwrap_or_default());
            if let Some(occurred_at) = occurred_at {
                request = request.occurred_at(occurred_at);
            }
            if let Some(key) = idempotency_key {
                request = request.idempotency_key(key);
            }

            let receipt = ledger.append(request).await?;
            if receipt.deduplicated {
                println!("Event already recorded (idempotency key matched):");
            } else {
                println!("Event appended:");
            }
            println!("  Sequence: {}", receipt.sequence);
            println!("  Content Hash: {}", receipt.content_hash);
        }

        Commands::Read { tenant, from, to } => {
            let events = ledger.read_range(&tenant, from, to).await?;
            print_events(&events);
        }

        Commands::Tail { tenant } => {
            let tail = ledger.tail(&tenant).await?;
            if tail.is_empty() {
                println!("No events for {}", tenant);
            } else {
                println!("Tail of {}:", tenant);
                println!("  Sequence: {}", tail.last_sequence);
                println!("  Content Hash: {}", tail.last_content_hash);
            }
        }

        Commands::Checkpoints { tenant } => {
            let checkpoints = ledger.checkpoints(&tenant).await?;
            if checkpoints.is_empty() {
                println!("No checkpoints for {}", tenant);
            }
            for checkpoint in checkpoints {
                println!("{}", checkpoint.summary());
                println!("  Tail Hash: {}", checkpoint.tail_hash);
                println!("  Created: {}", checkpoint.created_at);
            }
        }

        Commands::Retention {
            tenant,
            max_age_days,
            action,
        } => {
            let policies = config.retention.load_policies()?;
            let configured = policies.for_tenant(&tenant);
            let policy = RetentionPolicy::new(
                max_age_days.unwrap_or(configured.max_age_days),
                action.unwrap_or(configured.action),
            );

            match ledger.enforce_retention(&tenant, &policy).await? {
                Some(receipt) => {
                    println!("{}", receipt.checkpoint.summary());
                    if receipt.checkpoint.action.erases_payloads() && !receipt.payloads_erased {
                        println!("  Payload erasure deferred; run `ledger-admin erasures` to retry");
                    } else {
                        println!("  Payloads erased: {}", receipt.erased_count);
                    }
                }
                None => println!("Nothing expired for {} under {} days", tenant, policy.max_age_days),
            }
        }

        Commands::Erasures { limit } => {
            let sweep = ledger.retry_pending_erasures(limit).await?;
            println!("Pending erasures:");
            println!("  Attempted: {}", sweep.attempted);
            println!("  Completed: {}", sweep.completed);
            println!("  Payloads Erased: {}", sweep.payloads_erased);
            for checkpoint_id in &sweep.failed {
                println!("  Failed: {}", checkpoint_id);
            }
            if !sweep.failed.is_empty() {
                return Err(anyhow!("{} erasures still pending", sweep.failed.len()));
            }
        }

        Commands::Prove { tenant, sequence } => {
            let proof = ledger.prove_event(&tenant, sequence).await?;
            println!("{}", proof.summary());
            println!("{}", serde_json::to_string_pretty(&proof)?);
        }

        Commands::Export { tenant, output } => {
            let summary = export_tenant(
                ledger.store().as_ref(),
                &tenant,
                &output,
                config.verify.page_size,
            )
            .await?;
            println!(
                "Exported {} events and {} checkpoints to {}",
                summary.events,
                summary.checkpoints,
                summary.path.display()
            );
        }
    }

    Ok(())
}

fn print_events(events: &[AuditEvent]) {
    if events.is_empty() {
        println!("No events found");
        return;
    }

    println!(
        "{:<8} {:<20} {:<24} {:<28} {:<10}",
        "Seq", "Actor", "Action", "Occurred", "Payload"
    );
    println!("{}", "-".repeat(94));

    for event in events {
        let payload = match &event.payload {
            Some(bytes) => format!("{} bytes", bytes.len()),
            None => "erased".to_string(),
        };
        println!(
            "{:<8} {:<20} {:<24} {:<28} {:<10}",
            event.sequence,
            event.actor_id,
            event.action,
            event.occurred_at.format("%Y-%m-%d %H:%M:%S%.6f"),
            payload
        );
        println!("         hash {}", event.content_hash);
        if let Some(bytes) = &event.payload {
            println!(
                "         payload {}",
                base64::engine::general_purpose::STANDARD.encode(bytes)
            );
        }
    }
}
