// ============================================================================
// tierledger — CLI admin tool for the TierLedger engine
// ============================================================================
// Usage:
//   tierledger award <user> --kind new-user                Grant an award
//   tierledger purchase <user> --trade-id T --paid 5       Ingest a purchase
//   tierledger exchange <user> --tier premium --days 30    Buy tier time
//   tierledger set-vip <user> --on                         Toggle VIP
//   tierledger reconcile [--date 2024-07-01] [--daemon]    Run the daily job
//   tierledger account <user>                              Show the account
//   tierledger entries <user> [--all]                      List ledger entries
//   tierledger export --format json                        Dump the ledger
//   tierledger stats                                       Store statistics
// ============================================================================

use anyhow::Result;
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use ledger_core::{
    AwardEngine, AwardKind, AwardRequest, ExchangeEngine, ExchangePeriod, LedgerStore,
    PurchaseEvent, PurchaseIngest, ReconciliationJob, RedbLedgerStore, StaticConfig, Tier,
    TracingAuditSink, VipToggle,
};

/// TierLedger administration tool
#[derive(Parser)]
#[command(name = "tierledger", version, about = "Manage the TierLedger token ledger")]
struct Cli {
    /// Path to the database file (default: ~/.tierledger/ledger.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    /// Path to a JSON pricing/award config (default: built-in defaults)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Override the engine clock (YYYY-MM-DD, default: today UTC)
    #[arg(long, global = true)]
    as_of: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grant an award to a user
    Award {
        user: String,

        /// Award kind: subscribed-bot, invite-register, new-user, duration
        #[arg(long)]
        kind: String,

        /// Explicit token amount (default: from configuration)
        #[arg(long)]
        amount: Option<i64>,

        /// Related entity id (bot id, invited user) used for idempotency
        #[arg(long)]
        related_id: Option<String>,

        /// Days the tokens stay spendable (default: from configuration)
        #[arg(long)]
        validity: Option<i64>,
    },

    /// Ingest a completed-purchase event from the payment gateway
    Purchase {
        user: String,

        /// Gateway transaction id (idempotency key)
        #[arg(long)]
        trade_id: String,

        /// Amount paid in external currency units
        #[arg(long)]
        paid: i64,

        #[arg(long, default_value = "USD")]
        currency: String,
    },

    /// Exchange tokens for tier time
    Exchange {
        user: String,

        /// Tier: standard or premium
        #[arg(long)]
        tier: String,

        /// Period length: 30, 90 or 360
        #[arg(long)]
        days: i64,
    },

    /// Toggle the VIP expiry override
    SetVip {
        user: String,

        /// Turn VIP on
        #[arg(long, conflicts_with = "off")]
        on: bool,

        /// Turn VIP off
        #[arg(long)]
        off: bool,

        /// Operator name recorded in the audit trail
        #[arg(long, default_value = "admin")]
        actor: String,
    },

    /// Run the daily reconciliation batch
    Reconcile {
        /// Run date (YYYY-MM-DD, default: today UTC)
        #[arg(long)]
        date: Option<String>,

        /// Keep running, once per calendar day
        #[arg(long)]
        daemon: bool,

        /// Day-rollover poll interval in seconds (daemon mode)
        #[arg(long, default_value = "300")]
        poll_secs: u64,
    },

    /// Show a user's account projection
    Account { user: String },

    /// List a user's ledger entries
    Entries {
        user: String,

        /// Include tombstoned entries
        #[arg(long)]
        all: bool,
    },

    /// Export full ledger contents as JSON
    Export {
        /// Output format (currently only json is supported)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Show store-wide statistics
    Stats,
}

fn parse_tier(s: &str) -> Result<Tier> {
    match s.to_lowercase().as_str() {
        "standard" => Ok(Tier::Standard),
        "premium" => Ok(Tier::Premium),
        _ => anyhow::bail!("Unknown tier '{}'. Valid values: standard, premium", s),
    }
}

fn parse_period(days: i64) -> Result<ExchangePeriod> {
    ExchangePeriod::from_days(days)
        .ok_or_else(|| anyhow::anyhow!("Unsupported period '{} days'. Valid values: 30, 90, 360", days))
}

fn parse_kind(s: &str) -> Result<AwardKind> {
    match s.to_lowercase().as_str() {
        "subscribed-bot" | "subscribed_bot" => Ok(AwardKind::SubscribedBot),
        "invite-register" | "invite_register" => Ok(AwardKind::InviteRegister),
        "new-user" | "new_user" => Ok(AwardKind::NewUser),
        "duration" => Ok(AwardKind::Duration),
        _ => anyhow::bail!(
            "Unknown award kind '{}'. Valid values: subscribed-bot, invite-register, new-user, duration",
            s
        ),
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("Invalid date '{}': {} (expected YYYY-MM-DD)", s, e))
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts))
}

fn format_date(d: Option<NaiveDate>) -> String {
    d.map(|d| d.to_string()).unwrap_or_else(|| "-".into())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let store = RedbLedgerStore::open(cli.db_path.as_deref())?;
    let config = match cli.config.as_deref() {
        Some(path) => StaticConfig::from_file(std::path::Path::new(path))?,
        None => StaticConfig::default(),
    };
    let today = match cli.as_of.as_deref() {
        Some(s) => parse_date(s)?,
        None => Utc::now().date_naive(),
    };

    match cli.command {
        Commands::Award {
            user,
            kind,
            amount,
            related_id,
            validity,
        } => cmd_award(&store, &config, &user, &kind, amount, related_id, validity, today),
        Commands::Purchase {
            user,
            trade_id,
            paid,
            currency,
        } => cmd_purchase(&store, &config, &user, &trade_id, paid, &currency, today),
        Commands::Exchange { user, tier, days } => {
            cmd_exchange(&store, &config, &user, &tier, days, today)
        }
        Commands::SetVip { user, on, off, actor } => cmd_set_vip(&store, &user, on, off, &actor, today),
        Commands::Reconcile {
            date,
            daemon,
            poll_secs,
        } => cmd_reconcile(&store, date, daemon, poll_secs, today),
        Commands::Account { user } => cmd_account(&store, &user, today),
        Commands::Entries { user, all } => cmd_entries(&store, &user, all),
        Commands::Export { format } => cmd_export(&store, &format),
        Commands::Stats => cmd_stats(&store),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_award(
    store: &RedbLedgerStore,
    config: &StaticConfig,
    user: &str,
    kind: &str,
    amount: Option<i64>,
    related_id: Option<String>,
    validity: Option<i64>,
    today: NaiveDate,
) -> Result<()> {
    let request = AwardRequest {
        kind: parse_kind(kind)?,
        amount,
        related_id,
        validity_days: validity,
    };
    let engine = AwardEngine::new(store, config);
    match engine.grant(user, &request, today)? {
        ledger_core::AwardOutcome::Granted { trade_no, amount } => {
            println!("Granted {} tokens to {} (trade {})", amount, user, trade_no);
        }
        ledger_core::AwardOutcome::Duplicate => {
            println!("Already granted, nothing to do.");
        }
    }
    Ok(())
}

fn cmd_purchase(
    store: &RedbLedgerStore,
    config: &StaticConfig,
    user: &str,
    trade_id: &str,
    paid: i64,
    currency: &str,
    today: NaiveDate,
) -> Result<()> {
    let event = PurchaseEvent {
        user_id: user.to_string(),
        external_trade_id: trade_id.to_string(),
        amount_paid: paid,
        currency: currency.to_string(),
    };
    let ingest = PurchaseIngest::new(store, config);
    match ingest.ingest(&event, today)? {
        ledger_core::PurchaseOutcome::Credited { trade_no, tokens } => {
            println!("Credited {} tokens to {} (trade {})", tokens, user, trade_no);
        }
        ledger_core::PurchaseOutcome::Duplicate => {
            println!("Purchase {} already ingested, nothing to do.", trade_id);
        }
    }
    Ok(())
}

fn cmd_exchange(
    store: &RedbLedgerStore,
    config: &StaticConfig,
    user: &str,
    tier: &str,
    days: i64,
    today: NaiveDate,
) -> Result<()> {
    let tier = parse_tier(tier)?;
    let period = parse_period(days)?;
    let engine = ExchangeEngine::new(store, config);
    let receipt = engine.exchange(user, tier, period, today)?;
    println!(
        "Exchanged {} tokens for {} {} ({} - {}), entry {:?}",
        receipt.cost, tier, period, receipt.start_date, receipt.end_date, receipt.status
    );
    Ok(())
}

fn cmd_set_vip(
    store: &RedbLedgerStore,
    user: &str,
    on: bool,
    off: bool,
    actor: &str,
    today: NaiveDate,
) -> Result<()> {
    if on == off {
        anyhow::bail!("Pass exactly one of --on / --off");
    }
    let audit = TracingAuditSink;
    let toggle = VipToggle::new(store, &audit);
    let changed = toggle.set_vip(user, on, actor, today)?;
    if changed {
        println!("VIP for {} is now {}", user, if on { "on" } else { "off" });
    } else {
        println!("VIP for {} unchanged.", user);
    }
    Ok(())
}

fn cmd_reconcile(
    store: &RedbLedgerStore,
    date: Option<String>,
    daemon: bool,
    poll_secs: u64,
    today: NaiveDate,
) -> Result<()> {
    let job = ReconciliationJob::new(store);

    if daemon {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(job.run_daily(std::time::Duration::from_secs(poll_secs)));
        return Ok(());
    }

    let run_date = match date.as_deref() {
        Some(s) => parse_date(s)?,
        None => today,
    };
    let summary = job.run(run_date)?;
    println!("=== Reconciliation for {} ===", run_date);
    println!("Users processed:  {}", summary.users_processed);
    println!("Skipped (VIP):    {}", summary.users_skipped_vip);
    println!("Entries completed: {}", summary.entries_completed);
    println!("Entries promoted:  {}", summary.entries_promoted);
    println!("Credits expired:   {}", summary.credits_expired);
    if !summary.failures.is_empty() {
        println!("Failures:");
        for failure in &summary.failures {
            println!("  - {}: {}", failure.user_id, failure.error);
        }
    }
    Ok(())
}

fn cmd_account(store: &RedbLedgerStore, user: &str, today: NaiveDate) -> Result<()> {
    let Some(state) = store.read_user(user)? else {
        println!("No account for user {}.", user);
        return Ok(());
    };
    let account = &state.account;

    println!("=== Account {} ===", account.user_id);
    println!("Balance:            {}", account.balance);
    println!(
        "Current tier:       {}",
        account
            .current_tier(today)
            .map(|t| t.display_name())
            .unwrap_or("-")
    );
    println!("Standard ends:      {}", format_date(account.standard_end_date));
    println!("Standard banked:    {} days", account.standard_remain_days);
    println!("Premium ends:       {}", format_date(account.premium_end_date));
    println!("Premium banked:     {} days", account.premium_remain_days);
    println!("VIP:                {}", account.is_vip);
    println!("Created:            {}", format_timestamp(account.created_at));
    println!("Updated:            {}", format_timestamp(account.updated_at));
    Ok(())
}

fn cmd_entries(store: &RedbLedgerStore, user: &str, all: bool) -> Result<()> {
    let Some(state) = store.read_user(user)? else {
        println!("No account for user {}.", user);
        return Ok(());
    };

    let entries: Vec<_> = state
        .entries
        .iter()
        .filter(|e| all || e.status != ledger_core::EntryStatus::Deleted)
        .collect();
    if entries.is_empty() {
        println!("No entries found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<22}  {:<10}  {:>8}  {:>6}  {:<10}  {:<10}  {}",
        "TRADE NO", "TYPE", "STATUS", "AMOUNT", "USED", "START", "END", "TITLE"
    );
    println!("{}", "-".repeat(120));
    for entry in &entries {
        println!(
            "{:<36}  {:<22}  {:<10}  {:>8}  {:>6}  {:<10}  {:<10}  {}",
            entry.trade_no,
            format!("{:?}", entry.entry_type),
            format!("{:?}", entry.status),
            entry.amount,
            entry.used,
            format_date(entry.start_date),
            format_date(entry.end_date),
            entry.title
        );
    }
    println!("\nTotal: {} entries", entries.len());
    Ok(())
}

fn cmd_export(store: &RedbLedgerStore, format: &str) -> Result<()> {
    if format != "json" {
        anyhow::bail!("Unsupported format '{}'. Only json is supported", format);
    }

    let mut users = Vec::new();
    for user_id in store.user_ids()? {
        if let Some(state) = store.read_user(&user_id)? {
            users.push(serde_json::json!({
                "account": state.account,
                "entries": state.entries,
            }));
        }
    }

    let export = serde_json::json!({ "users": users });
    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}

fn cmd_stats(store: &RedbLedgerStore) -> Result<()> {
    let user_ids = store.user_ids()?;

    let mut total_entries = 0usize;
    let mut total_balance = 0i64;
    let mut vip_users = 0usize;
    let mut status_counts = std::collections::HashMap::new();
    for user_id in &user_ids {
        if let Some(state) = store.read_user(user_id)? {
            total_entries += state.entries.len();
            total_balance += state.account.balance;
            if state.account.is_vip {
                vip_users += 1;
            }
            for entry in &state.entries {
                *status_counts
                    .entry(format!("{:?}", entry.status))
                    .or_insert(0usize) += 1;
            }
        }
    }

    println!("=== TierLedger Store Stats ===");
    println!("Database: {}", store.path().display());
    println!();
    println!("Users:          {} ({} VIP)", user_ids.len(), vip_users);
    println!("Total balance:  {}", total_balance);
    println!("Entries:        {} total", total_entries);
    for (status, count) in &status_counts {
        println!("  {:12} {}", status, count);
    }
    Ok(())
}
