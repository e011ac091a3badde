// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use pipeline_dashboard::{
    load_csv,
    shaping::{format_currency, format_percent},
    telemetry::{self, Output},
    verify_count, Config, DashboardViews, DealCache, ShapeReport, SqliteDealStore,
};

#[derive(Parser)]
#[command(name = "pipeline-dashboard", version, about = "Sales pipeline dashboard")]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config and PIPELINE_DATABASE)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Import deals from a CSV file
    Import { csv: PathBuf },
    /// Print every dashboard view
    Report {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Interactive terminal dashboard (default)
    Tui,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database = database;
    }

    match cli.command.unwrap_or(Command::Tui) {
        Command::Import { csv } => {
            telemetry::init(&config.log_filter, Output::Stderr)?;
            run_import(&config, &csv)
        }
        Command::Report { json } => {
            telemetry::init(&config.log_filter, Output::Stderr)?;
            run_report(&config, json)
        }
        Command::Tui => {
            let output = match config.log_file.as_deref() {
                Some(path) => Output::File(path),
                None => Output::Discard,
            };
            telemetry::init(&config.log_filter, output)?;
            run_ui_mode(&config)
        }
    }
}

fn run_import(config: &Config, csv_path: &std::path::Path) -> Result<()> {
    println!("🗄️  Deal Import - CSV → SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Load CSV
    println!("\n📂 Loading CSV...");
    let rows = load_csv(csv_path)?;
    println!("✓ Loaded {} rows from {}", rows.len(), csv_path.display());

    // 2. Setup database
    println!("\n🔧 Opening database...");
    let store = SqliteDealStore::open(&config.database)?.with_actor("csv_import");
    println!("✓ Database ready at {}", config.database.display());

    // 3. Insert deals
    println!("\n💾 Inserting deals...");
    let summary = store.import(&rows)?;

    // 4. Verify count
    println!("\n🔍 Verifying database...");
    let conn = rusqlite::Connection::open(&config.database)?;
    let count = verify_count(&conn)?;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Import complete");
    println!("✓ Inserted: {}", summary.inserted);
    println!("✓ Already present: {}", summary.skipped_existing);
    println!(
        "✓ New statuses / companies / owners: {} / {} / {}",
        summary.statuses_created, summary.companies_created, summary.persons_created
    );
    println!("✓ Database contains {} deals", count);

    Ok(())
}

fn run_report(config: &Config, json: bool) -> Result<()> {
    let store = Arc::new(open_existing(config)?);
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    let cache = DealCache::new();
    let snapshot = runtime.block_on(cache.load(store.as_ref()))?;
    let views = DashboardViews::new(snapshot, config.view_options())
        .with_directory(store.statuses()?, store.companies()?);

    if json {
        let report = serde_json::json!({
            "generation": views.snapshot().generation,
            "fingerprint": views.snapshot().fingerprint,
            "overview": views.overview(),
            "pipeline": views.pipeline(),
            "companies": views.companies(),
            "performance": views.performance(),
            "forecasting": views.forecasting(),
            "velocity": views.velocity(),
            "data_quality": ShapeReport::inspect(views.deals()),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let overview = views.overview();
    println!("📊 Dashboard Overview");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Total pipeline value: {}", format_currency(overview.total_value));
    println!("Active deals:         {}", overview.deal_count);
    println!("Average deal value:   {}", format_currency(overview.average_value));

    println!("\n🗂️  Pipeline");
    for column in views.pipeline().columns {
        println!("  {:<20} {:>4} deals  {}", column.name, column.count, format_currency(column.total_value));
    }

    println!("\n🏢 Companies");
    for row in views.companies().metrics {
        println!(
            "  {:<24} {:>16}  {:>3} deals  {}",
            row.name,
            format_currency(row.total_value),
            row.deal_count,
            format_percent(row.success_rate)
        );
    }

    println!("\n👤 Performance");
    for row in views.performance().people {
        println!(
            "  {:<24} {:>16}  {:>3} deals  {}",
            row.name,
            format_currency(row.total_value),
            row.deal_count,
            format_percent(row.success_rate)
        );
    }

    let forecasting = views.forecasting();
    println!("\n📈 Forecasting");
    for point in &forecasting.trend {
        let trend = point.trend.map(format_currency).unwrap_or_else(|| "-".to_string());
        println!("  {}  {:>16}  trend {}", point.date, format_currency(point.value), trend);
    }
    if let Some(forecast) = forecasting.summary.current_quarter_forecast {
        println!("  Current quarter forecast: {}", format_currency(forecast));
    }
    println!(
        "  Average monthly revenue:  {}",
        format_currency(forecasting.summary.average_monthly_revenue)
    );
    if let Some(growth) = forecasting.summary.growth_rate_percent {
        println!("  Growth rate:              {}", format_percent(growth));
    }

    println!("\n⏱️  Velocity (avg days to close)");
    for point in views.velocity().by_status {
        println!("  {:<20} {:.1}", point.name, point.value);
    }

    let report = ShapeReport::inspect(views.deals());
    if !report.is_clean() {
        println!("\n⚠️  Data quality: {}", report.summary());
    }

    Ok(())
}

fn open_existing(config: &Config) -> Result<SqliteDealStore> {
    if !config.database.exists() {
        eprintln!("❌ Database not found: {}", config.database.display());
        eprintln!("   Run: pipeline-dashboard import <deals.csv>");
        eprintln!("   to import deals first.");
        std::process::exit(1);
    }
    SqliteDealStore::open(&config.database)
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &Config) -> Result<()> {
    println!("🖥️  Loading Pipeline Dashboard...\n");

    let store = Arc::new(open_existing(config)?);
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    let mut app = ui::App::new(runtime.handle().clone(), store, config.view_options());
    ui::run_ui(&mut app)?;

    println!("\n✅ Dashboard closed");

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &Config) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API: cargo run --bin pipeline-server --features server");
    std::process::exit(1);
}
