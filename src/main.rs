use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use lactation_forecast::logging::init_logging;
use lactation_forecast::{
    load_csv, schema, BatchReport, FeatureBatch, ModelSet, ParityType, Pipeline, PipelineConfig,
    ScalerSet, Severity, Validator,
};

#[derive(Parser)]
#[command(name = "lactation-forecast")]
#[command(about = "Clean milk-recording uploads and build 305-day yield model inputs")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline on one upload
    Process {
        /// Uploaded milk-recording CSV
        #[arg(long)]
        input: PathBuf,
        /// TOML configuration (defaults when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Directory holding <type>_scaler.json and optional <type>_model.json
        #[arg(long)]
        artifacts: Option<PathBuf>,
        /// Directory for report.json and the feature CSVs
        #[arg(long, default_value = "output")]
        output: PathBuf,
    },
    /// Validate an upload and list lactation eligibility
    Check {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the feature columns for each parity type
    Schema {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match cli.command {
        Commands::Process {
            input,
            config,
            artifacts,
            output,
        } => run_process(&input, config.as_deref(), artifacts.as_deref(), &output),
        Commands::Check { input, config } => run_check(&input, config.as_deref()),
        Commands::Schema { config } => run_schema(config.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn run_process(input: &Path, config: Option<&Path>, artifacts: Option<&Path>, output: &Path) -> Result<()> {
    println!("🐄 Lactation Forecast - processing {}", input.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut pipeline = Pipeline::new(load_config(config)?);
    if let Some(dir) = artifacts {
        println!("\n📐 Loading scalers and models from {}...", dir.display());
        pipeline = pipeline
            .with_scalers(ScalerSet::load_dir(dir)?)
            .with_models(ModelSet::load_dir(dir)?);
    }

    println!("\n🚜 Running pipeline...");
    let report = pipeline.run_csv(input)?;

    println!("\n💾 Writing results to {}...", output.display());
    write_outputs(&report, output)?;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ {}", report.summary());
    for diagnostic in report
        .diagnostics
        .entries
        .iter()
        .filter(|d| d.severity <= Severity::Warning)
    {
        println!("   ⚠️  {}", diagnostic);
    }
    if !report.predictions.is_empty() {
        println!("✓ {} predictions", report.predictions.len());
    }

    Ok(())
}

fn write_outputs(report: &BatchReport, output: &Path) -> Result<()> {
    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let json = serde_json::to_string_pretty(report)?;
    fs::write(output.join("report.json"), json)?;

    for parity_type in [ParityType::Primiparous, ParityType::Multiparous] {
        let path = output.join(format!("{}_features.csv", parity_type.as_str()));
        write_feature_csv(report.features(parity_type), &path)?;
        info!(path = %path.display(), "wrote feature table");
    }
    Ok(())
}

fn write_feature_csv(batch: &FeatureBatch, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut header = vec!["animal_id".to_string(), "parity".to_string()];
    header.extend(batch.columns.iter().cloned());
    writer.write_record(&header)?;

    for (i, row) in batch.rows.iter().enumerate() {
        let values = match &batch.scaled {
            Some(scaled) => &scaled[i],
            None => &row.values,
        };
        let mut record = vec![row.key.animal_id.clone(), row.key.parity.to_string()];
        record.extend(values.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn run_check(input: &Path, config: Option<&Path>) -> Result<()> {
    println!("🔍 Checking {}", input.display());

    let config = load_config(config)?;
    let table = load_csv(input)?;
    let batch = Validator::with_config(config.validation).validate(&table)?;

    println!("✓ {} records parsed", batch.records.len());
    for decision in &batch.decisions {
        match &decision.reason {
            None => println!("   ✅ {} parity {}", decision.animal_id, decision.parity),
            Some(reason) => println!("   ❌ {} parity {}: {}", decision.animal_id, decision.parity, reason),
        }
    }
    println!(
        "\n{} of {} lactations eligible",
        batch.eligible_keys().len(),
        batch.decisions.len()
    );
    Ok(())
}

fn run_schema(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    for parity_type in [ParityType::Primiparous, ParityType::Multiparous] {
        let columns = schema(parity_type, &config.features);
        println!("📋 {} ({} columns)", parity_type, columns.len());
        for (i, column) in columns.iter().enumerate() {
            println!("   {:>2}. {}", i + 1, column);
        }
    }
    Ok(())
}
