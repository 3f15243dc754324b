use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use taxonomy_request::{
    execute, JoinOptions, MatchOracle, OutputPaths, ResolutionPolicy, RunConfig, ScriptedOracle,
};

/// Build ENA taxonomy requests from BOLD identifications, validated against GBIF
#[derive(Parser, Debug)]
#[command(name = "taxonomy-request")]
#[command(version)]
struct Cli {
    /// Metadata table (CSV) with Process ID, lineage columns and matched_rank
    metadata: PathBuf,

    /// Sample list (CSV) restricting which Process IDs are processed
    samples: PathBuf,

    /// Prefix for the output files and the run log
    prefix: String,

    /// Override path of the taxonomy request TSV
    #[arg(long)]
    taxonomy_request: Option<PathBuf>,

    /// Override path of the GBIF inconsistent TSV
    #[arg(long)]
    inconsistent: Option<PathBuf>,

    /// Override path of the validation failures CSV
    #[arg(long)]
    validation_fails: Option<PathBuf>,

    /// Resolution policy JSON (thresholds, missing values, project code)
    #[arg(long, env = "TAXREQ_POLICY")]
    policy: Option<PathBuf>,

    /// Concurrent backbone lookups
    #[arg(long, default_value = "1", env = "TAXREQ_WORKERS")]
    workers: usize,

    /// Per-request HTTP timeout in seconds
    #[cfg(feature = "gbif")]
    #[arg(long, default_value = "30", env = "TAXREQ_TIMEOUT_SECS")]
    timeout_secs: u64,

    /// Also evaluate GBIF's alternative matches
    #[cfg(feature = "gbif")]
    #[arg(long)]
    include_alternatives: bool,

    /// Leave out species records that already have a taxid (each one is logged)
    #[arg(long)]
    skip_registered: bool,

    /// Look up family placeholders instead of submitting them by name only
    #[arg(long)]
    family_lookup: bool,

    /// Replay recorded backbone answers (JSON) instead of calling GBIF
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "taxonomy_request=trace" (defaults to RUST_LOG, then info)
    #[arg(long)]
    log_level: Option<String>,

    /// GBIF API base URL
    #[cfg(feature = "gbif")]
    #[arg(long, default_value = taxonomy_request::GBIF_API_URL, env = "GBIF_API_URL")]
    gbif_url: String,

    /// ENA project code prefixed to each Process ID
    #[arg(long, env = "TAXREQ_PROJECT_CODE")]
    project_code: Option<String>,
}

impl Cli {
    fn output_paths(&self) -> OutputPaths {
        let mut paths = OutputPaths::from_prefix(&self.prefix);
        if let Some(path) = &self.taxonomy_request {
            paths.taxonomy_request = path.clone();
        }
        if let Some(path) = &self.inconsistent {
            paths.gbif_inconsistent = path.clone();
        }
        if let Some(path) = &self.validation_fails {
            paths.tax_validation_fails = path.clone();
        }
        paths
    }

    fn resolution_policy(&self) -> Result<ResolutionPolicy> {
        let mut policy = match &self.policy {
            Some(path) => ResolutionPolicy::from_file(path)?,
            None => ResolutionPolicy::new(),
        };
        if self.family_lookup {
            policy.family_lookup = true;
        }
        if let Some(code) = &self.project_code {
            policy.project_code = code.clone();
        }
        policy.validate().context("Invalid resolution policy")?;
        Ok(policy)
    }

    fn oracle(&self) -> Result<Box<dyn MatchOracle>> {
        match &self.replay {
            Some(path) => Ok(Box::new(ScriptedOracle::from_file(path)?)),
            None => self.live_oracle(),
        }
    }

    #[cfg(feature = "gbif")]
    fn live_oracle(&self) -> Result<Box<dyn MatchOracle>> {
        let client = taxonomy_request::GbifClient::new(
            &self.gbif_url,
            std::time::Duration::from_secs(self.timeout_secs),
        )
        .context("Failed to build GBIF client")?
        .with_alternatives(self.include_alternatives);
        Ok(Box::new(client))
    }

    #[cfg(not(feature = "gbif"))]
    fn live_oracle(&self) -> Result<Box<dyn MatchOracle>> {
        anyhow::bail!("built without the `gbif` feature; pass --replay <FILE>")
    }
}

/// Console on stderr plus a plain-text copy in `<prefix>.log`
fn init_logging(cli: &Cli, log_path: &Path) -> Result<()> {
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level).context("Invalid --log-level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let log_file = File::create(log_path)
        .with_context(|| format!("Failed to create log file: {:?}", log_path))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let outputs = cli.output_paths();
    init_logging(&cli, &outputs.log)?;

    let policy = cli.resolution_policy()?;
    let oracle = cli.oracle()?;

    tracing::info!(
        version = taxonomy_request::VERSION,
        metadata = %cli.metadata.display(),
        samples = %cli.samples.display(),
        prefix = %cli.prefix,
        "Starting taxonomy request run"
    );

    let summary = execute(
        RunConfig {
            metadata: cli.metadata.clone(),
            samples: cli.samples.clone(),
            outputs,
            policy,
            join: JoinOptions {
                skip_registered: cli.skip_registered,
            },
            workers: cli.workers,
        },
        oracle.as_ref(),
    )?;

    println!("✅ {} records processed (run {})", summary.records(), summary.run_id);
    println!("   accepted:          {}", summary.outcomes.accepted);
    println!("   naming only:       {}", summary.outcomes.naming_only);
    println!("   inconsistent:      {}", summary.outcomes.inconsistent);
    println!("   validation failed: {}", summary.outcomes.validation_failed);
    for output in &summary.outputs {
        println!("📄 {} ({} rows)", output.path.display(), output.rows);
    }

    Ok(())
}
