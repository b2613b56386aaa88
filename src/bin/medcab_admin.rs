//! Operational admin tool for the MedCab reconciliation service.
//!
//! Run with: cargo run --bin medcab-admin -- <command>
//!
//! Commands:
//! - migrate: apply pending database migrations
//! - seed: load a demo item catalog, optionally with one day of activity
//! - rebuild: recompute comparison rows for a date range
//! - summary: print the reconciliation roll-up for a date range

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use medcab_api::{
    commands::admin::rebuild_windows_command::RebuildWindowsCommand,
    commands::claims::record_return_command::RecordReturnCommand,
    commands::claims::record_usage_command::RecordUsageCommand,
    commands::ledger::append_delta_command::AppendDeltaCommand,
    config,
    db::{self, DbPool},
    entities::{item_master, ReturnReason},
    events::{Event, EventSender},
    services::{
        ledger::LedgerService,
        reconciliation::ReconciliationService,
        reporting::{ComparisonFilter, ReconciliationSummary, ReportingService},
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => handle_migrate(&context, cli.json).await?,
        Commands::Seed(args) => handle_seed(&context, args, cli.json).await?,
        Commands::Rebuild(args) => handle_rebuild(&context, args, cli.json).await?,
        Commands::Summary(args) => handle_summary(&context, args, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(
    name = "medcab-admin",
    about = "MedCab admin tool for migrations, seed data and window maintenance",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Load the demo item catalog
    Seed(SeedArgs),
    /// Recompute comparison rows for a date range from the ledgers
    Rebuild(RebuildArgs),
    /// Print the reconciliation roll-up for a date range
    Summary(SummaryArgs),
}

#[derive(Args)]
struct SeedArgs {
    #[arg(
        long,
        action = ArgAction::SetTrue,
        help = "Also record one day of demo cabinet activity against the catalog"
    )]
    with_activity: bool,
}

#[derive(Args)]
struct RebuildArgs {
    #[arg(long, value_parser = parse_date, help = "First window day (YYYY-MM-DD)")]
    from: NaiveDate,
    #[arg(long, value_parser = parse_date, help = "Last window day (YYYY-MM-DD), inclusive")]
    to: NaiveDate,
    #[arg(long, help = "Restrict the rebuild to one item code")]
    item_code: Option<String>,
}

#[derive(Args)]
struct SummaryArgs {
    #[arg(long, value_parser = parse_date, help = "First window day (YYYY-MM-DD)")]
    from: Option<NaiveDate>,
    #[arg(long, value_parser = parse_date, help = "Last window day (YYYY-MM-DD), inclusive")]
    to: Option<NaiveDate>,
    #[arg(long, help = "Restrict the roll-up to one item code")]
    item_code: Option<String>,
    #[arg(long, help = "Restrict the roll-up to one owning department")]
    department: Option<String>,
}

struct CliContext {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        let db = Arc::new(db_pool);

        let (event_tx, mut event_rx) = mpsc::channel::<Event>(32);
        let event_sender = Arc::new(EventSender::new(event_tx));

        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                debug!(target: "medcab_admin", event = ?event, "received async event");
            }
        });

        Ok(Self { db, event_sender })
    }

    fn ledger_service(&self) -> LedgerService {
        LedgerService::new(self.db.clone(), self.event_sender.clone())
    }

    fn reconciliation_service(&self) -> ReconciliationService {
        ReconciliationService::new(self.db.clone(), self.event_sender.clone(), None)
    }

    fn reporting_service(&self) -> ReportingService {
        ReportingService::new(self.db.clone())
    }
}

async fn handle_migrate(context: &CliContext, json: bool) -> Result<()> {
    db::run_migrations(context.db.as_ref())
        .await
        .context("failed to run migrations")?;

    if json {
        print_json(&serde_json::json!({"status": "migrated"}))?;
    } else {
        println!("Migrations applied.");
    }
    Ok(())
}

/// Demo catalog: a few RFID-tracked surgical items plus loose consumables,
/// the mix a ward cabinet actually holds.
fn demo_catalog() -> Vec<(&'static str, &'static str, &'static str, &'static str, bool, Decimal)> {
    vec![
        ("KIT-SUTURE", "Suture kit", "KIT", "SURG", true, dec!(42.50)),
        ("MESH-HER-L", "Hernia mesh, large", "IMPLANT", "SURG", true, dec!(310.00)),
        ("STAP-LIN-60", "Linear stapler 60mm", "DEVICE", "SURG", true, dec!(189.90)),
        ("SYR-10ML", "Syringe 10 ml", "CONSUMABLE", "ICU", false, dec!(0.35)),
        ("GLV-NTR-M", "Nitrile gloves, medium", "CONSUMABLE", "ICU", false, dec!(0.12)),
        ("GZE-STER-10", "Sterile gauze 10x10", "CONSUMABLE", "ER", false, dec!(0.80)),
    ]
}

async fn handle_seed(context: &CliContext, args: SeedArgs, json: bool) -> Result<()> {
    let now = Utc::now();
    let mut created = 0usize;
    let mut skipped = 0usize;

    for (code, name, item_type, department, tracked, cost) in demo_catalog() {
        let existing = item_master::Entity::find_by_id(code.to_string())
            .one(context.db.as_ref())
            .await
            .with_context(|| format!("failed to look up item {}", code))?;
        if existing.is_some() {
            skipped += 1;
            continue;
        }

        item_master::ActiveModel {
            item_code: Set(code.to_string()),
            name: Set(name.to_string()),
            item_type: Set(Some(item_type.to_string())),
            department_code: Set(Some(department.to_string())),
            is_tracked: Set(tracked),
            unit_cost: Set(Some(cost)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(context.db.as_ref())
        .await
        .with_context(|| format!("failed to insert item {}", code))?;
        created += 1;
    }

    let activity = if args.with_activity {
        Some(seed_activity(context).await?)
    } else {
        None
    };

    if json {
        print_json(&serde_json::json!({
            "items_created": created,
            "items_skipped": skipped,
            "activity": activity,
        }))?;
    } else {
        println!("Catalog seeded: {} created, {} already present.", created, skipped);
        if let Some(outcome) = activity {
            println!(
                "Demo activity recorded: usage claim {} ({}), return claim {} ({}).",
                outcome.usage_reference, outcome.usage_outcome,
                outcome.return_reference, outcome.return_outcome
            );
            println!("Try: curl http://localhost:8080/api/v1/comparisons");
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct SeedActivityOutcome {
    usage_reference: String,
    usage_outcome: String,
    return_reference: String,
    return_outcome: String,
}

/// One believable day: the cabinet is stocked, a nurse takes a tracked kit,
/// the HIS bills part of it and the ward returns the rest. Claim references
/// are fixed, so re-running the seed replays them as duplicates.
async fn seed_activity(context: &CliContext) -> Result<SeedActivityOutcome> {
    let ledger = context.ledger_service();
    let reconciliation = context.reconciliation_service();

    ledger
        .append_delta(AppendDeltaCommand {
            cabinet_id: "CAB-DEMO".to_string(),
            slot_no: 1,
            item_code: "KIT-SUTURE".to_string(),
            sign: "refill".to_string(),
            qty: 8,
            unit_id: None,
            actor_id: "pharmacy-tech-04".to_string(),
            recorded_at: None,
        })
        .await
        .context("failed to record demo refill")?;

    ledger
        .append_delta(AppendDeltaCommand {
            cabinet_id: "CAB-DEMO".to_string(),
            slot_no: 1,
            item_code: "KIT-SUTURE".to_string(),
            sign: "take".to_string(),
            qty: 2,
            unit_id: Some("RFID-DEMO-0001".to_string()),
            actor_id: "nurse-demo-12".to_string(),
            recorded_at: None,
        })
        .await
        .context("failed to record demo take")?;

    let usage = reconciliation
        .record_usage(RecordUsageCommand {
            source_system_id: "HIS-DEMO".to_string(),
            external_reference: "SEED-USAGE-0001".to_string(),
            encounter_id: "HN123456/EN07".to_string(),
            item_code: "KIT-SUTURE".to_string(),
            qty: 1,
            unit_id: None,
            actor_id: Some("nurse-demo-12".to_string()),
            reported_status: None,
            unit_cost: Some(dec!(42.50)),
            recorded_at: None,
            lookback_hours: None,
        })
        .await
        .context("failed to record demo usage claim")?;

    let returned = reconciliation
        .record_return(RecordReturnCommand {
            source_system_id: "WARD-DEMO".to_string(),
            external_reference: "SEED-RETURN-0001".to_string(),
            item_code: "KIT-SUTURE".to_string(),
            qty: 1,
            unit_id: None,
            actor_id: Some("nurse-demo-12".to_string()),
            reason: ReturnReason::UnwrappedUnused,
            note: Some("demo seed".to_string()),
            unit_cost: None,
            recorded_at: None,
            lookback_hours: None,
        })
        .await
        .context("failed to record demo return claim")?;

    Ok(SeedActivityOutcome {
        usage_reference: "SEED-USAGE-0001".to_string(),
        usage_outcome: usage.outcome.to_string(),
        return_reference: "SEED-RETURN-0001".to_string(),
        return_outcome: returned.outcome.to_string(),
    })
}

async fn handle_rebuild(context: &CliContext, args: RebuildArgs, json: bool) -> Result<()> {
    let service = context.reconciliation_service();
    let result = service
        .rebuild_windows(RebuildWindowsCommand {
            from: args.from,
            to: args.to,
            item_code: args.item_code.clone(),
        })
        .await
        .context("failed to rebuild comparison windows")?;

    if json {
        print_json(&result)?;
    } else {
        println!(
            "Rebuilt {} comparison row(s) for {}..={}.",
            result.rows, result.from, result.to
        );
    }
    Ok(())
}

async fn handle_summary(context: &CliContext, args: SummaryArgs, json: bool) -> Result<()> {
    let service = context.reporting_service();
    let filter = ComparisonFilter {
        from: args.from,
        to: args.to,
        item_code: args.item_code.clone(),
        status: None,
        department_code: args.department.clone(),
        item_type: None,
    };

    let summary = service
        .summary(&filter)
        .await
        .context("failed to compute reconciliation summary")?;

    if json {
        print_json(&summary)?;
    } else {
        render_summary(&summary);
    }
    Ok(())
}

fn render_summary(summary: &ReconciliationSummary) {
    println!(
        "Windows {} • dispensed {} • used {} • returned {} • pending {} • difference {}",
        summary.windows,
        summary.total_dispensed,
        summary.total_used,
        summary.total_returned,
        summary.total_pending,
        summary.total_difference
    );
    for count in &summary.status_counts {
        println!("  • {} x {}", count.windows, count.status);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{raw}', expected YYYY-MM-DD"))
}
