use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use fiobatch::engine::{Engine, EngineConfig, SystemRunner};
use fiobatch::job::IdSequence;
use fiobatch::logging;
use fiobatch::params::SweepSpec;

#[derive(Parser)]
#[command(
    name = "fiobatch",
    about = "Run fio across a combinatorial parameter sweep"
)]
struct Cli {
    /// JSON sweep specification
    #[arg(value_name = "JSON")]
    parameters: PathBuf,

    /// Fio script templates, each expanded against the full sweep
    #[arg(value_name = "FIO", required = true)]
    fiofiles: Vec<PathBuf>,

    /// Write the result CSV to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the log to a file instead of stderr
    #[arg(short, long)]
    log: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Wall-clock timeout per fio invocation, in seconds
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<f64>,

    /// Cool down time between jobs
    #[arg(long, value_name = "SECONDS", default_value_t = 2.0)]
    cooldown: f64,

    /// Command run before each job with the parameters in its environment
    #[arg(long, value_name = "CMD")]
    pre_hook: Option<String>,

    /// Sync and drop kernel caches before each job
    #[arg(long)]
    drop_caches: bool,

    /// Trim the filesystem holding the job's target file before each job
    #[arg(long)]
    trim: bool,

    /// Randomize job order independently per replicate
    #[arg(long)]
    shuffle: bool,

    /// Benchmark tool binary
    #[arg(long, default_value = "fio")]
    fio_cmd: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log.as_deref()).context("installing logger")?;
    log::info!("Started");

    let text = fs::read_to_string(&cli.parameters)
        .with_context(|| format!("reading parameter file {}", cli.parameters.display()))?;
    let json = serde_json::from_str(&text)
        .with_context(|| format!("parsing parameter file {}", cli.parameters.display()))?;
    let spec = SweepSpec::from_json(&json)?;

    let mut templates = Vec::with_capacity(cli.fiofiles.len());
    for path in &cli.fiofiles {
        let template = fs::read_to_string(path)
            .with_context(|| format!("reading template {}", path.display()))?;
        templates.push(template);
    }

    let mut output: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(
            fs::File::create(path)
                .with_context(|| format!("creating output file {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };

    let config = EngineConfig {
        fio_cmd: cli.fio_cmd,
        timeout: cli.timeout.map(Duration::from_secs_f64),
        cooldown: Duration::from_secs_f64(cli.cooldown),
        pre_hook: cli.pre_hook,
        drop_caches: cli.drop_caches,
        trim: cli.trim,
        shuffle: cli.shuffle,
    };
    let runner = SystemRunner;
    let mut engine = Engine::new(&runner, config, IdSequence::seeded());
    engine.run_sweep(&spec, &templates, &mut output)?;

    log::info!("All done");
    Ok(())
}
