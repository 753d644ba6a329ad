use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use prettytable::{Cell, Row, Table};

use fiobatch::corrlog;
use fiobatch::join::{self, JoinConfig, Value};
use fiobatch::logging;
use fiobatch::results;
use fiobatch::telemetry;

#[derive(Parser)]
#[command(
    name = "joinpower",
    about = "Reconcile a fiobatch run with power telemetry into aggregate statistics"
)]
struct Cli {
    /// Log file from fiobatch
    log: PathBuf,

    /// Fio output CSV file
    fio: PathBuf,

    /// Power telemetry CSV file
    power: PathBuf,

    /// Write the aggregation (e.g. mean of replicates) CSV to a file
    #[arg(short, long)]
    output: PathBuf,

    /// Write the joined CSV (one row per job) to a file
    #[arg(short, long)]
    all: Option<PathBuf>,

    /// Shift telemetry by adding SECONDS to its timestamps
    #[arg(long, value_name = "SECONDS", allow_hyphen_values = true)]
    power_shift: Option<f64>,

    /// Telemetry channel holding instantaneous power in watts
    #[arg(long, default_value = "Active Power")]
    channel: String,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, None).context("installing logger")?;

    let records = corrlog::read_log_file(&cli.log)
        .with_context(|| format!("reading log file {}", cli.log.display()))?;
    log::info!("Correlated {} jobs from {}", records.len(), cli.log.display());

    let telemetry = telemetry::read_telemetry(&cli.power, cli.power_shift)
        .with_context(|| format!("reading telemetry file {}", cli.power.display()))?;
    log::info!(
        "Loaded {} telemetry samples across {} channels",
        telemetry.times.len(),
        telemetry.channels.len()
    );

    let results = results::read_results(&cli.fio)
        .with_context(|| format!("reading fio CSV {}", cli.fio.display()))?;
    log::info!("Loaded {} result rows", results.rows());

    let config = JoinConfig {
        power_channel: cli.channel,
    };
    let joined = join::reconcile(&records, &telemetry, &results, &config)?;

    if let Some(path) = &cli.all {
        log::info!("Writing {}", path.display());
        let file =
            File::create(path).with_context(|| format!("creating {}", path.display()))?;
        joined.table.write_csv(file)?;
    }

    let aggregated = join::aggregate(&joined);
    log::info!("Writing {}", cli.output.display());
    let file = File::create(&cli.output)
        .with_context(|| format!("creating {}", cli.output.display()))?;
    aggregated.write_csv(file)?;

    print_summary(&aggregated, &joined.key_columns);
    Ok(())
}

/// Prints a compact per-configuration summary of the aggregate table.
fn print_summary(aggregated: &join::Table, key_columns: &[String]) {
    let group_keys: Vec<&String> = key_columns
        .iter()
        .filter(|k| k.as_str() != "replicate")
        .collect();
    let metrics = [
        ("iops__mean", "IOPS"),
        ("bandwidth__mean", "Bandwidth (B/s)"),
        ("watts_mean__mean", "Power (W)"),
        ("iopj__mean", "IOPS/W"),
        ("bpj__mean", "B/s/W"),
    ];

    let mut table = Table::new();
    let mut header: Vec<Cell> = group_keys.iter().map(|k| Cell::new(k)).collect();
    for (_, label) in &metrics {
        header.push(Cell::new(label));
    }
    table.add_row(Row::new(header));

    for row in &aggregated.rows {
        let mut cells = Vec::with_capacity(group_keys.len() + metrics.len());
        for key in &group_keys {
            let text = aggregated
                .column_index(key)
                .map(|i| format_cell(&row[i]))
                .unwrap_or_default();
            cells.push(Cell::new(&text));
        }
        for (name, _) in &metrics {
            let text = aggregated
                .column_index(name)
                .map(|i| format_cell(&row[i]))
                .unwrap_or_default();
            cells.push(Cell::new(&text));
        }
        table.add_row(Row::new(cells));
    }

    println!();
    table.printstd();
    println!();
}

fn format_cell(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_nan() => String::new(),
        Value::Float(f) => format!("{f:.2}"),
        _ => String::new(),
    }
}
