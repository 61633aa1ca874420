use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use compliance_ledger::audit::{verify_export, VerificationReport};
use compliance_ledger::config::AppConfig;
use compliance_ledger::database::Database;
use compliance_ledger::vault::PassthroughVault;
use compliance_ledger::AuditLedger;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("verify-ledger")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Verify compliance ledger integrity for a tenant or an export file")
        .arg(
            Arg::new("database-url")
                .short('d')
                .long("database-url")
                .value_name("URL")
                .help("Ledger database (defaults to the configured database_url)"),
        )
        .arg(
            Arg::new("tenant")
                .short('t')
                .long("tenant")
                .value_name("TENANT_ID")
                .help("Tenant to verify")
                .conflicts_with_all(["all", "export"]),
        )
        .arg(
            Arg::new("all")
                .short('a')
                .long("all")
                .action(ArgAction::SetTrue)
                .help("Verify every tenant in the database")
                .conflicts_with("export"),
        )
        .arg(
            Arg::new("export")
                .short('e')
                .long("export")
                .value_name("PATH")
                .help("Verify a JSON Lines export instead of the database"),
        )
        .arg(
            Arg::new("from")
                .short('f')
                .long("from")
                .value_name("SEQUENCE")
                .value_parser(clap::value_parser!(u64))
                .help("First sequence to verify (defaults to the latest checkpoint boundary)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print reports as JSON"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppress output except errors"),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");
    let json = matches.get_flag("json");

    let level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::load()?;

    let reports = if let Some(path) = matches.get_one::<String>("export") {
        info!("Verifying export: {}", path);
        if !Path::new(path).exists() {
            return Err(anyhow!("Export file not found: {}", path));
        }
        vec![verify_export(Path::new(path), config.verify.page_size).await?]
    } else {
        let database_url = matches
            .get_one::<String>("database-url")
            .cloned()
            .unwrap_or_else(|| config.database_url.clone());
        let database = Database::new(&database_url).await?;
        database.run_migrations().await?;
        let ledger = AuditLedger::new(
            Arc::new(database.ledger_store()),
            Arc::new(PassthroughVault),
            &config,
        );

        let tenants = match matches.get_one::<String>("tenant") {
            Some(tenant) => vec![tenant.clone()],
            None if matches.get_flag("all") => ledger.tenants().await?,
            None => return Err(anyhow!("one of --tenant, --all or --export is required")),
        };
        let from = matches.get_one::<u64>("from").copied();

        let mut reports = Vec::with_capacity(tenants.len());
        for tenant in &tenants {
            reports.push(ledger.verify(tenant, from).await?);
        }
        reports
    };

    for report in &reports {
        print_report(report, json, verbose, quiet)?;
    }

    let incidents = reports.iter().filter(|r| !r.valid).count();
    if incidents > 0 {
        error!("{} ledger(s) failed verification", incidents);
        std::process::exit(1);
    }
    Ok(())
}

fn print_report(report: &VerificationReport, json: bool, verbose: bool, quiet: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }
    if quiet && report.valid {
        return Ok(());
    }

    println!("{}", report.summary());
    if verbose {
        println!("  Checked from: {}", report.checked_from);
        println!("  Checked through: {}", report.checked_through);
        println!("  Events checked: {}", report.total_checked);
        println!("  Checkpoints checked: {}", report.checkpoints_checked);
        println!("  Verified at: {}", report.verified_at);
    }
    Ok(())
}
