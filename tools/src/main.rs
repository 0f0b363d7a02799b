//! audit-runner: headless driver for the audit prioritization core.
//!
//! Usage:
//!   audit-runner --dataset data/fraud_dashboard.json --tiers HIGH --labels 1
//!   audit-runner --synthetic 500 --seed 42 --export audit_work_order.csv
//!   audit-runner --synthetic 500 --import-db cases.db
//!   audit-runner --dataset cases.db --ipc-mode

use anyhow::Result;
use audit_queue_core::{
    config::AuditConfig,
    explain::DisplayRow,
    queue::{FilterParams, ScoreRange, SortOrder},
    repository::DatasetSource,
    session::AuditSession,
    store::DatasetStore,
    synth::{generate, SyntheticSpec},
    AuditError, RiskTier,
};
use std::collections::BTreeSet;
use std::env;
use std::io::{self, BufRead, Write};

const DEFAULT_DATASET: &str = "fraud_dashboard.json";

/// Exit status when the dataset cannot be used.
const EXIT_DATA_UNAVAILABLE: i32 = 2;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetState,
    SetFilters { filters: FilterParams },
    SetSort { sort: SortOrder },
    SelectRow { row: usize },
    SelectCase { case_id: String },
    ClearSelection,
    Export { path: Option<String> },
    Reload,
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let data_dir = str_arg(&args, "--data-dir").unwrap_or("./data");
    let seed = parse_arg(&args, "--seed", 42u64);

    let config = AuditConfig::load_or_default(data_dir)?;

    let source = match (str_arg(&args, "--dataset"), str_arg(&args, "--synthetic")) {
        (Some(path), _) => DatasetSource::from_path(path),
        (None, Some(n)) => {
            let cases: usize = n.parse()?;
            let spec = SyntheticSpec { base_value: config.base_value, ..SyntheticSpec::new(cases) };
            DatasetSource::InMemory(generate(&spec, seed))
        }
        (None, None) => DatasetSource::from_path(format!("{data_dir}/{DEFAULT_DATASET}")),
    };

    if let Some(db) = str_arg(&args, "--import-db") {
        let dataset = source.read_dataset()?;
        let store = DatasetStore::open(db)?;
        store.migrate()?;
        store.import_dataset(&dataset, &source.describe())?;
        println!("Imported {} cases into {db}", store.case_count()?);
        return Ok(());
    }

    if !ipc_mode {
        println!("Audit prioritization: audit-runner");
        println!("  dataset:   {}", source.describe());
        println!("  data_dir:  {data_dir}");
        println!();
    }

    let mut session = match AuditSession::open(source, config) {
        Ok(s) => s,
        Err(e) if e.is_fatal() => {
            // Shown to the user as a notice; no partial output follows.
            if ipc_mode {
                println!("{}", serde_json::json!({ "fatal": e.to_string() }));
            } else {
                eprintln!("Dataset unavailable: {e}");
                eprintln!("Export the model output first, or pass --dataset / --synthetic.");
            }
            std::process::exit(EXIT_DATA_UNAVAILABLE);
        }
        Err(e) => return Err(e.into()),
    };

    if ipc_mode {
        return run_ipc_loop(&mut session);
    }

    if let Some(filters) = filters_from_args(&args, session.filters())? {
        session.apply_filters(filters)?;
    }
    if let Some(sort) = str_arg(&args, "--sort") {
        session.set_sort(parse_sort(sort)?);
    }
    if let Some(row) = str_arg(&args, "--select") {
        session.select_row(row.parse()?);
    }

    print_summary(&session)?;

    if let Some(path) = str_arg(&args, "--export") {
        let mut file = std::fs::File::create(path)?;
        let rows = session.export_csv(&mut file)?;
        println!();
        println!("Exported {rows} cases to {path}");
    }
    Ok(())
}

fn run_ipc_loop(session: &mut AuditSession) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    writeln!(stdout, "{}", serde_json::to_string(&session.snapshot()?)?)?;
    stdout.flush()?;

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                write_error(&mut stdout, &e.to_string())?;
                continue;
            }
        };

        let outcome = match cmd {
            IpcCommand::Quit => break,
            IpcCommand::GetState => Ok(()),
            IpcCommand::SetFilters { filters } => session.apply_filters(filters).map(|_| ()),
            IpcCommand::SetSort { sort } => {
                session.set_sort(sort);
                Ok(())
            }
            IpcCommand::SelectRow { row } => {
                session.select_row(row);
                Ok(())
            }
            IpcCommand::SelectCase { case_id } => {
                session.select_case(&case_id);
                Ok(())
            }
            IpcCommand::ClearSelection => {
                session.clear_selection();
                Ok(())
            }
            IpcCommand::Export { path } => {
                let path = path.unwrap_or_else(|| session.config().export_file_name.clone());
                std::fs::File::create(&path)
                    .map_err(AuditError::from)
                    .and_then(|mut f| session.export_csv(&mut f))
                    .map(|rows| log::info!("Exported {rows} cases to {path}"))
            }
            IpcCommand::Reload => session.reload(),
        };

        match outcome {
            Ok(()) => writeln!(stdout, "{}", serde_json::to_string(&session.snapshot()?)?)?,
            Err(e) if e.is_fatal() => {
                writeln!(stdout, "{}", serde_json::json!({ "fatal": e.to_string() }))?;
                stdout.flush()?;
                std::process::exit(EXIT_DATA_UNAVAILABLE);
            }
            // Recoverable: the session keeps its previous view.
            Err(e) => write_error(&mut stdout, &e.to_string())?,
        }
        stdout.flush()?;
    }
    Ok(())
}

fn write_error(stdout: &mut io::Stdout, message: &str) -> Result<()> {
    writeln!(stdout, "{}", serde_json::json!({ "error": message }))?;
    stdout.flush()?;
    Ok(())
}

/// Overlay any filter flags on `current`. `None` when no flag was given.
fn filters_from_args(args: &[String], current: &FilterParams) -> Result<Option<FilterParams>> {
    let tiers = str_arg(args, "--tiers");
    let labels = str_arg(args, "--labels");
    let min = str_arg(args, "--min");
    let max = str_arg(args, "--max");
    if tiers.is_none() && labels.is_none() && min.is_none() && max.is_none() {
        return Ok(None);
    }

    let mut filters = current.clone();
    if let Some(list) = tiers {
        filters.tiers = split_list(list)
            .map(|t| t.parse::<RiskTier>().map_err(anyhow::Error::msg))
            .collect::<Result<BTreeSet<_>>>()?;
    }
    if let Some(list) = labels {
        filters.labels = split_list(list)
            .map(|l| l.parse::<u8>().map_err(anyhow::Error::from))
            .collect::<Result<BTreeSet<_>>>()?;
    }
    filters.score_range = ScoreRange::new(
        min.map(str::parse::<f64>).transpose()?.unwrap_or(filters.score_range.min),
        max.map(str::parse::<f64>).transpose()?.unwrap_or(filters.score_range.max),
    );
    Ok(Some(filters))
}

/// Comma-separated values; an empty string is an empty list.
fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_sort(s: &str) -> Result<SortOrder> {
    match s {
        "repository" => Ok(SortOrder::Repository),
        "score_desc" => Ok(SortOrder::ScoreDescending),
        "score_asc" => Ok(SortOrder::ScoreAscending),
        other => anyhow::bail!("unknown sort '{other}' (repository | score_desc | score_asc)"),
    }
}

fn print_summary(session: &AuditSession) -> Result<()> {
    let summary = session.summary();
    let filters = session.filters();
    let tiers: Vec<&str> = filters.tiers.iter().map(|t| t.label()).collect();

    println!("=== AUDIT QUEUE ===");
    println!("  session:        {}", session.session_id);
    println!("  total cases:    {}", session.repository().len());
    println!("  tiers:          {}", tiers.join(", "));
    println!(
        "  score range:    {:.0}–{:.0}%",
        filters.score_range.min, filters.score_range.max
    );
    println!("  labels:         {:?}", filters.labels);
    println!("  selected:       {}", summary.count);
    println!("  high priority:  {}", summary.high_count);
    println!("  mean risk:      {}", summary.mean_score_display());

    if let Some(notice) = session.notice() {
        println!();
        println!("  {notice}");
        return Ok(());
    }

    println!();
    println!("=== TOP OF QUEUE ===");
    let table = session.table()?;
    for row in table.rows.iter().take(10) {
        println!(
            "  {:<12} {:<9} {:>6.2}%  label={}",
            row.case_id,
            row.tier.label(),
            row.score * 100.0,
            row.label
        );
    }

    if let Some(p) = session.explanation() {
        println!();
        println!("=== DETERMINANT FACTORS: {} ===", p.case_id);
        println!(
            "  tier {} | score {:.1}% | {:+.1} vs reference | base {:.2}",
            p.tier, p.score_pct, p.delta_from_reference, p.base_value
        );
        for row in p.display_rows() {
            match row {
                DisplayRow::Factor(f) => {
                    println!("  {:<22} {:>+8.4}  (value: {})", f.feature, f.attribution, f.value)
                }
                DisplayRow::Others(rest) => println!(
                    "  {:<22} {:>+8.4}",
                    format!("{} other features", rest.feature_count),
                    rest.attribution_sum
                ),
            }
        }
    }
    Ok(())
}

fn str_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
