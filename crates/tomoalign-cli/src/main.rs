//! Tomoalign command-line interface.
//!
//! Convert tilt-series alignments directly or from TOML job files:
//! ```sh
//! tomoalign convert TS_01.aln out/TS_01 --to imod
//! tomoalign convert TS_01 TS_01.json --pixel-spacing 1.54 --mrc TS_01.mrc
//! tomoalign run job.toml
//! tomoalign validate job.toml
//! tomoalign inspect TS_01.aln --json
//! tomoalign formats
//! ```

mod config;
mod runner;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use tomoalign_core::{ConversionContext, Format, LossyPolicy};

use crate::runner::ConversionJob;

#[derive(Parser)]
#[command(name = "tomoalign")]
#[command(about = "Convert cryo-ET tilt-series alignments between IMOD, AreTomo3 and the cryoET Data Portal")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Context flags shared by `convert` and `inspect`.
#[derive(Args)]
struct ContextArgs {
    /// Raw tilt-series size: frame width, frame height, number of tilts.
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"])]
    ts_size: Option<Vec<usize>>,
    /// Pixel spacing in Å per pixel.
    #[arg(long)]
    pixel_spacing: Option<f64>,
    /// MRC stack whose header fills in size and spacing not given explicitly.
    #[arg(long)]
    mrc: Option<PathBuf>,
}

impl ContextArgs {
    fn explicit(&self) -> anyhow::Result<ConversionContext> {
        let mut ctx = ConversionContext::new();
        if let Some(size) = &self.ts_size {
            if let &[x, y, z] = size.as_slice() {
                ctx = ctx.with_ts_size(x, y, z);
            } else {
                anyhow::bail!("--ts-size takes exactly three values");
            }
        }
        if let Some(spacing) = self.pixel_spacing {
            anyhow::ensure!(spacing > 0.0, "--pixel-spacing must be positive");
            ctx = ctx.with_pixel_spacing(spacing);
        }
        Ok(ctx)
    }

    fn resolve(&self) -> anyhow::Result<ConversionContext> {
        runner::resolve_context(self.explicit()?, self.mrc.as_deref())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one alignment into another format.
    Convert {
        /// Input file (IMOD: basename or .xf path).
        input: PathBuf,
        /// Output file (IMOD: basename).
        output: PathBuf,
        /// Input format (inferred from the extension when omitted).
        #[arg(long)]
        from: Option<Format>,
        /// Output format (inferred from the extension when omitted).
        #[arg(long)]
        to: Option<Format>,
        #[command(flatten)]
        context: ContextArgs,
        /// Write even when the target cannot represent the alignment exactly.
        #[arg(long)]
        accept_lossy: bool,
    },
    /// Run a conversion from a TOML job file.
    Run {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// Check a job file and the conversion it describes without writing.
    Validate {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// Summarise an alignment in the canonical model.
    Inspect {
        input: PathBuf,
        #[arg(long)]
        from: Option<Format>,
        #[command(flatten)]
        context: ContextArgs,
        /// Dump the canonical alignment as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List the supported formats and the context each needs.
    Formats,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            input,
            output,
            from,
            to,
            context,
            accept_lossy,
        } => {
            let job = ConversionJob {
                input,
                input_format: from,
                output,
                output_format: to,
                context: context.explicit()?,
                mrc: context.mrc.clone(),
                policy: if accept_lossy {
                    LossyPolicy::Accept
                } else {
                    LossyPolicy::Reject
                },
            };
            convert(&job)
        }
        Commands::Run { config } => {
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());
            convert(&ConversionJob::from_config(&job))
        }
        Commands::Validate { config } => {
            let job = config::load_config(&config)?;
            let outcome = runner::run_conversion(&ConversionJob::from_config(&job), true)?;
            println!("Configuration is valid: {}", config.display());
            println!(
                "  {} → {}, {} projections",
                outcome.source, outcome.target, outcome.projections
            );
            for file in &outcome.files {
                println!("  would write {}", file.display());
            }
            runner::print_report(&outcome.report);
            Ok(())
        }
        Commands::Inspect {
            input,
            from,
            context,
            json,
        } => {
            let (native, canonical) = runner::load_canonical(&input, from, context.resolve()?)?;
            if json {
                let text = serde_json::to_string_pretty(&canonical)
                    .context("Failed to serialise the canonical alignment")?;
                println!("{}", text);
            } else {
                println!("{} ({})", input.display(), native.format());
                println!("{}", runner::summarize(&canonical));
            }
            Ok(())
        }
        Commands::Formats => {
            println!("Supported formats:");
            println!();
            for line in runner::format_table() {
                println!("{}", line);
            }
            Ok(())
        }
    }
}

fn convert(job: &ConversionJob) -> anyhow::Result<()> {
    let outcome = runner::run_conversion(job, false)?;
    println!(
        "Converted {} projections: {} → {}",
        outcome.projections, outcome.source, outcome.target
    );
    runner::print_report(&outcome.report);
    for file in &outcome.files {
        println!("  wrote {}", file.display());
    }
    Ok(())
}
