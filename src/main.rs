use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use roster_sync::{
    calendar, db, ApplyReport, AuthoritativeList, Config, NameRepairer, NewMember, ReconciliationPlan,
    RecordStore, RosterSession, SqliteStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Reconcile the member roster and sync calendar events", long_about = None)]
struct Cli {
    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file (overrides config and ROSTER_SYNC_DB)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Authoritative roster, JSON or CSV (overrides config and ROSTER_SYNC_ROSTER)
    #[arg(short, long, global = true)]
    roster: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database schema
    Init {
        /// Fill an empty member table from this roster file
        #[arg(long)]
        seed: Option<PathBuf>,
    },

    /// Print members in store order
    List {
        /// Only members whose full name matches (case-insensitive)
        #[arg(long)]
        name: Option<String>,
    },

    /// Show what reconciliation would change
    Plan {
        /// Write the plan as JSON for review
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Reconcile the store with the roster
    Apply {
        /// Reviewed plan file; aborts if the store changed since it was written
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Actually write to the store
        #[arg(long)]
        yes: bool,
    },

    /// Split merged "first last" surnames and drop first-name-only duplicates
    RepairNames {
        /// Split merged names the way the roster spells them
        #[arg(long)]
        use_roster: bool,

        /// Actually write to the store
        #[arg(long)]
        yes: bool,
    },

    /// Upsert events from a calendar feed export
    SyncCalendar {
        /// JSON export (defaults to the configured calendar path)
        file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    if let Some(roster) = cli.roster {
        config.roster_path = roster;
    }
    info!(database = ?config.database_path, "using database");

    match cli.command {
        Command::Init { seed } => run_init(&config, seed),
        Command::List { name } => run_list(&config, name),
        Command::Plan { out } => run_plan(&config, out),
        Command::Apply { plan, yes } => run_apply(&config, plan, yes),
        Command::RepairNames { use_roster, yes } => run_repair_names(&config, use_roster, yes),
        Command::SyncCalendar { file } => run_sync_calendar(&config, file),
    }
}

fn run_init(config: &Config, seed: Option<PathBuf>) -> Result<()> {
    println!("🔧 Setting up database...");
    let mut store = SqliteStore::open(&config.database_path)?;
    println!("✓ Schema ready at {:?}", config.database_path);

    let Some(seed) = seed else {
        return Ok(());
    };

    if db::count_members(store.connection())? > 0 {
        println!("⚠️  Member table not empty, seed skipped");
        return Ok(());
    }

    let list = AuthoritativeList::from_path(&seed)?;
    for entry in list.entries() {
        store.insert(&NewMember {
            first_name: entry.first_name.clone(),
            surname: entry.surname.clone(),
            category: entry.category.clone(),
        })?;
    }
    println!("✓ Seeded {} members from {:?}", list.len(), seed);

    Ok(())
}

fn run_list(config: &Config, name: Option<String>) -> Result<()> {
    let store = SqliteStore::open(&config.database_path)?;
    let members = match name {
        Some(name) => db::find_members_by_full_name(store.connection(), &name)?,
        None => store.list_all()?,
    };

    println!("👥 {} members", members.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for member in &members {
        let legacy = if member.category.is_known() { "" } else { " ⚠️" };
        let role = member
            .admin_role
            .as_ref()
            .map(|r| format!(" [{}]", r.label()))
            .unwrap_or_default();
        println!(
            "  {:<36}  {:<30} {}{}{}",
            member.id,
            member.label(),
            member.category.label(),
            legacy,
            role
        );
    }

    Ok(())
}

fn load_roster(config: &Config) -> Result<AuthoritativeList> {
    let list = AuthoritativeList::from_path(&config.roster_path)
        .with_context(|| format!("Failed to load roster {:?}", config.roster_path))?;
    println!("📂 Loaded {} roster entries from {:?}", list.len(), config.roster_path);
    for (category, count) in list.count_by_category() {
        if count > 0 {
            println!("   {:<20} {}", category.label(), count);
        }
    }
    Ok(list)
}

fn print_plan(plan: &ReconciliationPlan) {
    println!("\n📋 Reconciliation plan");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for line in plan.report_lines() {
        println!("{}", line);
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("{}", plan.summary());
    println!("Fingerprint: {}", plan.fingerprint());
}

fn run_plan(config: &Config, out: Option<PathBuf>) -> Result<()> {
    let list = load_roster(config)?;
    let mut session = RosterSession::new(SqliteStore::open(&config.database_path)?);

    let plan = session.plan(&list)?;
    print_plan(plan);

    if let Some(out) = out {
        plan.save(&out)?;
        println!("\n💾 Plan written to {:?}", out);
    }

    Ok(())
}

fn run_apply(config: &Config, reviewed: Option<PathBuf>, yes: bool) -> Result<()> {
    let list = load_roster(config)?;
    let mut session = RosterSession::new(SqliteStore::open(&config.database_path)?);

    let plan = session.plan(&list)?;
    print_plan(plan);
    let fingerprint = plan.fingerprint();

    if let Some(path) = reviewed {
        let reviewed = ReconciliationPlan::load(&path)?;
        if reviewed.fingerprint() != fingerprint {
            bail!(
                "Plan {:?} no longer matches the store or roster; run `plan` again and review",
                path
            );
        }
        println!("✓ Matches reviewed plan {:?}", path);
    }

    if plan.is_noop() {
        println!("\n✅ Store already matches the roster");
        return Ok(());
    }

    if !yes {
        println!("\nDry run: pass --yes to apply these changes");
        return Ok(());
    }

    println!("\n💾 Applying...");
    let report = session.apply(Some(fingerprint.as_str()))?;
    print_report(report)?;
    println!("✅ Reconciliation applied");

    Ok(())
}

fn print_report(report: &ApplyReport) -> Result<()> {
    for outcome in &report.outcomes {
        match &outcome.error {
            None => println!("  ✓ {} {}", outcome.kind, outcome.label),
            Some(error) => println!("  ❌ {} {}: {}", outcome.kind, outcome.label, error),
        }
    }
    println!(
        "\n{} succeeded, {} failed",
        report.succeeded(),
        report.failed()
    );

    if !report.is_clean() {
        bail!("{} operations failed", report.failed());
    }
    Ok(())
}

fn run_repair_names(config: &Config, use_roster: bool, yes: bool) -> Result<()> {
    let hints = if use_roster {
        load_roster(config)?.entries().to_vec()
    } else {
        Vec::new()
    };
    let mut session = RosterSession::new(SqliteStore::open(&config.database_path)?);

    let repair = NameRepairer::plan_against(session.store(), &hints)?;
    println!("\n🩹 Name repairs");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for line in repair.report_lines() {
        println!("{}", line);
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "{} splits, {} duplicates",
        repair.splits.len(),
        repair.duplicates.len()
    );

    if repair.is_noop() {
        println!("\n✅ No names need repair");
        return Ok(());
    }

    if !yes {
        println!("\nDry run: pass --yes to apply these changes");
        return Ok(());
    }

    let fingerprint = repair.fingerprint();
    session.stage(repair.to_reconciliation_plan());

    println!("\n💾 Applying...");
    let report = session.apply(Some(fingerprint.as_str()))?;
    print_report(report)?;
    println!("✅ Names repaired");

    Ok(())
}

fn run_sync_calendar(config: &Config, file: Option<PathBuf>) -> Result<()> {
    let Some(path) = file.or_else(|| config.calendar_path.clone()) else {
        bail!("No calendar export given (argument, config or ROSTER_SYNC_CALENDAR)");
    };

    let events = calendar::load_events_from_path(&path)?;
    println!("📅 Loaded {} calendar events from {:?}", events.len(), path);

    let store = SqliteStore::open(&config.database_path)?;
    let report = calendar::sync_calendar_events(store.connection(), &events)?;
    println!(
        "✓ Inserted: {}  Updated: {}  Skipped: {}",
        report.inserted, report.updated, report.skipped
    );

    let today = Local::now().date_naive();
    let upcoming = calendar::upcoming_events(&events, today);
    println!("\n🗓️  {} upcoming events", upcoming.len());
    for event in upcoming.iter().take(10) {
        let schedule = event.schedule();
        println!(
            "  {} {:<5}  {}",
            schedule.date,
            schedule.time.map(|t| t.format("%H:%M").to_string()).unwrap_or_default(),
            event.summary
        );
    }

    Ok(())
}
