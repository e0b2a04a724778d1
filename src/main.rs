//! Oracle CLI - perplexity and output-closeness checks for exported models

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use exported_lm_oracle::config::OracleConfig;
use exported_lm_oracle::inference::{LoadOptions, PerplexityEvaluator};
use exported_lm_oracle::utils::device_utils::select_device;
use exported_lm_oracle::validation::{check_close_recursively, CloseError, Outputs};
use exported_lm_oracle::VERSION;

/// Test oracles for exported causal language models
#[derive(Parser, Debug)]
#[command(name = "oracle")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to an oracle config file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check generated text against a reference model's perplexity
    Perplexity {
        /// Reference model: HuggingFace id or local snapshot directory
        #[arg(short, long)]
        model: Option<String>,

        /// Text to score
        #[arg(short, long, conflicts_with = "text_file")]
        text: Option<String>,

        /// File containing the text to score
        #[arg(long)]
        text_file: Option<PathBuf>,

        /// Maximum acceptable perplexity
        #[arg(long)]
        max_perplexity: Option<f64>,

        /// Hub revision of the reference model
        #[arg(long)]
        revision: Option<String>,

        /// Place the reference model on GPU when available
        #[arg(long)]
        gpu: bool,
    },

    /// Compare eager and exported output dumps (safetensors file or .npy directory)
    Compare {
        /// Eager (reference) outputs
        eager: PathBuf,

        /// Exported outputs
        exported: PathBuf,

        /// Absolute tolerance (top-level tensor; nested outputs use the default)
        #[arg(long)]
        atol: Option<f64>,

        /// Relative tolerance (top-level tensor; nested outputs use the default)
        #[arg(long)]
        rtol: Option<f64>,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn create_progress_bar(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    info!("oracle v{}", VERSION);

    let mut config = match &cli.config {
        Some(path) => OracleConfig::load(path)?,
        None => OracleConfig::default(),
    };

    match cli.command {
        Commands::Perplexity {
            model,
            text,
            text_file,
            max_perplexity,
            revision,
            gpu,
        } => {
            if let Some(model) = model {
                config.reference_model = Some(model);
            }
            if let Some(max_perplexity) = max_perplexity {
                config.max_perplexity = max_perplexity;
            }
            if revision.is_some() {
                config.revision = revision;
            }
            config.use_gpu |= gpu;
            config.validate()?;

            let model_id = config
                .reference_model
                .clone()
                .context("No reference model given (use --model or the config file)")?;
            let text = match (text, text_file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read text file: {:?}", path))?,
                (None, None) => anyhow::bail!("Provide --text or --text-file"),
            };

            info!("Starting perplexity check with model '{}' ...", model_id);
            let pb = create_progress_bar("Loading reference model...");
            let mut evaluator =
                PerplexityEvaluator::from_pretrained(&model_id, &LoadOptions::from_config(&config)?)?;
            pb.finish_with_message("Reference model loaded!");

            let verdict = evaluator.evaluate(&text, config.max_perplexity)?;
            println!("{}", verdict);

            if !verdict.passed {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Compare {
            eager,
            exported,
            atol,
            rtol,
        } => {
            if let Some(atol) = atol {
                config.atol = atol;
            }
            if let Some(rtol) = rtol {
                config.rtol = rtol;
            }
            config.validate()?;

            let device = select_device(false)?;
            let eager = Outputs::load(&eager, &device)?;
            let exported = Outputs::load(&exported, &device)?;
            info!(
                "Comparing {} eager tensor(s) against {} exported tensor(s)",
                eager.num_tensors(),
                exported.num_tensors()
            );

            match check_close_recursively(&eager, &exported, config.atol, config.rtol) {
                Ok(true) => {
                    println!("[PASS] outputs are close (atol={}, rtol={})", config.atol, config.rtol);
                    Ok(())
                }
                Ok(false) => {
                    println!("[FAIL] no tensor pair was compared");
                    std::process::exit(1);
                }
                Err(err) if err.downcast_ref::<CloseError>().is_some() => {
                    println!("[FAIL] {:#}", err);
                    std::process::exit(1);
                }
                Err(err) => Err(err),
            }
        }
    }
}
