// Entry point and high-level CLI flow.
//
// - Each subcommand fetches one dashboard's records, builds its views and
//   prints Markdown previews.
// - `--export-dir` also writes every view as CSV plus a JSON summary.
// - `--interactive` keeps the session open so the facility filter can be
//   changed; re-runs are served from the cached fetch while it is fresh.
use anyhow::Context;
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use health_report::dashboards::{Dashboard, ReportFilter};
use health_report::output;
use health_report::source::{CachedSource, CsvSource, KoboConfig, KoboSource, RecordSource};
use health_report::{util, Selection};
use log::info;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "health_report")]
#[command(about = "Program monitoring summaries from form-collection data", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// HTS summary by date, counselor and facility
    Hts(CommonArgs),
    /// Weekly appointment adherence and tracing
    Appointments(CommonArgs),
    /// Loss-to-follow-up audit counts
    Ltfu(CommonArgs),
}

#[derive(Args)]
struct CommonArgs {
    /// Read records from a local CSV export instead of the API
    #[arg(long)]
    csv: Option<PathBuf>,
    #[arg(long, env = "KOBO_BASE_URL", default_value = "https://kf.kobotoolbox.org")]
    base_url: String,
    #[arg(long, env = "KOBO_TOKEN", hide_env_values = true)]
    token: Option<String>,
    #[arg(long, env = "KOBO_ASSET_UID")]
    asset: Option<String>,
    /// Request choice labels rather than choice names
    #[arg(long)]
    labels: bool,
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
    /// How long a fetched snapshot may be reused
    #[arg(long, default_value_t = 3600)]
    cache_ttl_secs: u64,
    /// First reporting date (inclusive, YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last reporting date (inclusive, YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,
    /// Reference date for ages (YYYY-MM-DD, defaults to today)
    #[arg(long)]
    as_of: Option<NaiveDate>,
    /// Facility to report on, or "All"
    #[arg(long, default_value = "All")]
    facility: String,
    /// Rows shown per table preview
    #[arg(long, default_value_t = 20)]
    preview_rows: usize,
    /// Directory for CSV/JSON exports
    #[arg(long)]
    export_dir: Option<PathBuf>,
    #[arg(long)]
    interactive: bool,
}

impl CommonArgs {
    fn source(&self) -> anyhow::Result<Box<dyn RecordSource>> {
        if let Some(path) = &self.csv {
            return Ok(Box::new(CsvSource::new(path)));
        }
        let token = self
            .token
            .clone()
            .context("an API token is required (--token or KOBO_TOKEN) unless --csv is given")?;
        let asset_uid = self
            .asset
            .clone()
            .context("an asset UID is required (--asset or KOBO_ASSET_UID) unless --csv is given")?;
        let config = KoboConfig {
            base_url: self.base_url.clone(),
            token,
            asset_uid,
            labels: self.labels,
            timeout: Duration::from_secs(self.timeout_secs),
        };
        Ok(Box::new(KoboSource::new(config).context("failed to build HTTP client")?))
    }

    fn filter(&self) -> ReportFilter {
        ReportFilter {
            from: self.from,
            to: self.to,
            facility: parse_selection(&self.facility),
            as_of: Some(self.as_of.unwrap_or_else(|| Local::now().date_naive())),
        }
    }
}

fn parse_selection(s: &str) -> Selection {
    match s.parse::<Selection>() {
        Ok(sel) => sel,
        Err(never) => match never {},
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Fetch, build and print one dashboard; export it when asked.
fn run_report(
    dashboard: Dashboard,
    source: &dyn RecordSource,
    filter: &ReportFilter,
    args: &CommonArgs,
) -> anyhow::Result<()> {
    let records = source.fetch().context("failed to load records")?;
    let report = dashboard
        .build(&records, filter)
        .with_context(|| format!("failed to build {}", dashboard.title()))?;

    println!(
        "Processing dataset... ({} rows loaded)",
        util::format_int(report.load.total_rows)
    );
    if report.load.missing_measures > 0 || report.load.missing_dates > 0 {
        println!(
            "Note: {} measure values and {} dates were missing or unparseable.",
            util::format_int(report.load.missing_measures),
            util::format_int(report.load.missing_dates)
        );
    }
    println!("\n{}\n", report.title);
    for view in &report.views {
        output::preview_view(view, args.preview_rows);
    }

    if let Some(dir) = &args.export_dir {
        let stem = match dashboard {
            Dashboard::Hts => "hts",
            Dashboard::Appointments => "appointments",
            Dashboard::Ltfu => "ltfu",
        };
        let written = output::export_report(dir, stem, &report)?;
        info!("exported {} files to {}", written.len(), dir.display());
        println!("(Full tables exported to {})\n", dir.display());
    }
    Ok(())
}

/// Ask for the next facility filter. `None` means quit.
fn prompt_facility(current: &Selection) -> Option<Selection> {
    let shown = match current {
        Selection::All => "All",
        Selection::Only(f) => f.as_str(),
    };
    print!("Facility [{}] (All for every facility, Q to quit): ", shown);
    // a prompt that fails to flush still reads the answer
    io::stdout().flush().ok();
    let mut buf = String::new();
    if io::stdin().read_line(&mut buf).ok()? == 0 {
        return None;
    }
    match buf.trim() {
        "" => Some(current.clone()),
        q if q.eq_ignore_ascii_case("q") => None,
        other => Some(parse_selection(other)),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (dashboard, args) = match cli.command {
        Commands::Hts(args) => (Dashboard::Hts, args),
        Commands::Appointments(args) => (Dashboard::Appointments, args),
        Commands::Ltfu(args) => (Dashboard::Ltfu, args),
    };
    let source = CachedSource::new(args.source()?, Duration::from_secs(args.cache_ttl_secs));
    let mut filter = args.filter();

    run_report(dashboard, &source, &filter, &args)?;
    if args.interactive {
        while let Some(facility) = prompt_facility(&filter.facility) {
            filter.facility = facility;
            if let Err(e) = run_report(dashboard, &source, &filter, &args) {
                eprintln!("Error: {:#}\n", e);
            }
        }
        println!("Exiting the program.");
    }
    Ok(())
}
