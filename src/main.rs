use anyhow::{bail, Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use std::fs;
use std::path::{Path, PathBuf};

use lineage::core::dataset::digest;
use lineage::history::{self, BuildRecord};
use lineage::{
    genealogy, Dataset, DatasetAssembler, EngineConfig, HashRepository, LinkBasis, Metric,
    PairStrategy,
};

const LOG_ENV: &str = "LINEAGE_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "lineage",
    version,
    about = "Merge near-identical image hashes and link related images"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a dataset from hashed occurrences
    Build {
        /// JSON file, or directory of JSON files, mapping occurrence ids to occurrences
        #[arg(short, long, value_name = "PATH")]
        input: PathBuf,
        /// Where to write the dataset
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
        /// Config file (default: $LINEAGE_CONFIG, then the user config dir)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Side length of the hash matrix
        #[arg(long, value_name = "N")]
        hash_size: Option<u32>,
        /// Distance at or below which occurrences are the same image
        #[arg(long, value_name = "T")]
        identical_threshold: Option<f64>,
        /// Distance at or below which images are relatives
        #[arg(long, value_name = "T")]
        related_threshold: Option<f64>,
        #[arg(long, value_enum)]
        metric: Option<Metric>,
        #[arg(long, value_enum)]
        pair_strategy: Option<PairStrategy>,
        #[arg(long, value_enum)]
        link_basis: Option<LinkBasis>,
        /// Overwrite the output without asking
        #[arg(short, long)]
        force: bool,
        /// Hide progress bars
        #[arg(long)]
        no_progress: bool,
    },

    /// Show one image record and its ancestors and descendants
    Show {
        #[arg(short, long, value_name = "FILE")]
        dataset: PathBuf,
        /// Record id
        id: usize,
    },

    /// Print dataset statistics
    Summary {
        #[arg(short, long, value_name = "FILE")]
        dataset: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a dataset's structure and print its digest
    Verify {
        #[arg(short, long, value_name = "FILE")]
        dataset: PathBuf,
    },

    /// List previous builds recorded next to a dataset
    History {
        #[arg(short, long, value_name = "FILE")]
        dataset: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or(LOG_ENV, "info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            config,
            hash_size,
            identical_threshold,
            related_threshold,
            metric,
            pair_strategy,
            link_basis,
            force,
            no_progress,
        } => {
            let mut config = match config {
                Some(path) => EngineConfig::load_from(&path)
                    .with_context(|| format!("Failed to read config {:?}", path))?,
                None => EngineConfig::load().context("Failed to read config")?,
            };
            if let Some(v) = hash_size {
                config.hash_size = v;
            }
            if let Some(v) = identical_threshold {
                config.identical_threshold = v;
            }
            if let Some(v) = related_threshold {
                config.related_threshold = v;
            }
            if let Some(v) = metric {
                config.metric = v;
            }
            if let Some(v) = pair_strategy {
                config.pair_strategy = v;
            }
            if let Some(v) = link_basis {
                config.link_basis = v;
            }
            let assembler = DatasetAssembler::new(config)?.with_progress(!no_progress);

            if output.exists() && !force && !confirm_overwrite(&output)? {
                println!("Aborted; {} left untouched.", output.display());
                return Ok(());
            }

            println!("▶ Reading occurrences from: {}", input.display());
            let (repo, report) = HashRepository::load(&input, assembler.config())
                .with_context(|| format!("Failed to load {:?}", input))?;
            println!(
                "   {} accepted, {} rejected",
                report.accepted,
                report.rejected.len()
            );

            let dataset = assembler.assemble(&repo)?;
            let digest = dataset
                .save(&output)
                .with_context(|| format!("Failed to save {:?}", output))?;

            println!(
                "✨ {} image(s), {} relative pair(s)",
                dataset.len(),
                dataset.relative_pairs()
            );
            println!("✅ Wrote {}", output.display());
            println!("   blake3 {}", digest);

            let history_file = history::history_path(&output);
            let record = BuildRecord::now(
                &input,
                &output,
                report.accepted,
                report.rejected.len(),
                dataset.len(),
                dataset.relative_pairs(),
                digest,
                assembler.config().clone(),
            );
            history::append(&history_file, &record).with_context(|| {
                format!("Failed to update history file {:?}", history_file)
            })?;
        }

        Commands::Show { dataset, id } => {
            let dataset = load_dataset(&dataset)?;
            let Some(record) = dataset.get(id) else {
                bail!(
                    "No image with id {}; valid range is 0..{}",
                    id,
                    dataset.len()
                );
            };

            println!("🖼️  Image {} ({})", record.id, record.hash);
            println!("   thumbnail: {}", record.thumbnail_key());
            println!("   {} usage(s):", record.usages.len());
            for usage in &record.usages {
                let thread = if usage.thread_id.is_empty() {
                    "-"
                } else {
                    usage.thread_id.as_str()
                };
                println!(
                    "     {}  post {}  thread {}",
                    format_timestamp(usage.timestamp),
                    usage.local_id,
                    thread
                );
            }

            let family = genealogy(record, &dataset)?;
            println!("   ⬆ {} ancestor(s)", family.ancestors.len());
            for (relative, dist) in &family.ancestors {
                println!(
                    "     {} (dist {:.3}, first seen {})",
                    relative.id,
                    dist,
                    format_timestamp(relative.first_seen())
                );
            }
            println!("   ⬇ {} descendant(s)", family.descendants.len());
            for (relative, dist) in &family.descendants {
                println!(
                    "     {} (dist {:.3}, first seen {})",
                    relative.id,
                    dist,
                    format_timestamp(relative.first_seen())
                );
            }
        }

        Commands::Summary { dataset, json } => {
            let dataset = load_dataset(&dataset)?;
            let Some(summary) = dataset.summary() else {
                println!("Dataset is empty.");
                return Ok(());
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("🗂️  {} image(s), {} usage(s)", summary.records, summary.usages);
                println!("   relative pairs: {}", summary.relative_pairs);
                println!(
                    "   span: {} → {}",
                    format_timestamp(summary.start_ts),
                    format_timestamp(summary.end_ts)
                );
                println!("   most used: {}", summary.most_used);
                println!("   most recent: {}", summary.most_recent);
                println!("   most relatives: {}", summary.most_relatives);
            }
        }

        Commands::Verify { dataset } => {
            let bytes =
                fs::read(&dataset).with_context(|| format!("Could not read {:?}", dataset))?;
            let loaded = Dataset::from_slice(&bytes)
                .with_context(|| format!("{:?} failed verification", dataset))?;
            println!(
                "✅ {} is valid: {} image(s), {} relative pair(s)",
                dataset.display(),
                loaded.len(),
                loaded.relative_pairs()
            );
            println!("   blake3 {}", digest(&bytes));
        }

        Commands::History { dataset } => {
            let history_file = history::history_path(&dataset);
            let records = history::read(&history_file)
                .with_context(|| format!("Could not read history file {:?}", history_file))?;
            if records.is_empty() {
                println!("No builds recorded in {}", history_file.display());
                return Ok(());
            }

            println!("🗂️  Build History:");
            for (i, rec) in records.iter().enumerate() {
                println!(
                    "[{}] {}\n     input: {}\n     output: {}\n     occurrences: {} accepted, {} rejected\n     images: {}, relative pairs: {}\n     blake3: {}\n",
                    i,
                    rec.timestamp,
                    rec.input,
                    rec.output,
                    rec.accepted,
                    rec.rejected,
                    rec.records,
                    rec.relative_pairs,
                    rec.digest
                );
            }
        }
    }

    Ok(())
}

fn load_dataset(path: &Path) -> Result<Dataset> {
    Dataset::load(path).with_context(|| format!("Failed to load dataset {:?}", path))
}

fn confirm_overwrite(output: &Path) -> Result<bool> {
    Confirm::new()
        .with_prompt(format!("{} exists. Overwrite?", output.display()))
        .default(false)
        .interact()
        .context("Output exists; pass --force to overwrite it")
}

/// UTC date and time for a unix timestamp, or the raw number if out of range.
fn format_timestamp(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}
