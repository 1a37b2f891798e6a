//! helmcue CLI - convert Helm charts and Go templates to CUE

use clap::{Parser, Subcommand};
use miette::Result;
use std::path::PathBuf;

mod commands;
mod display;
mod exit_codes;

#[derive(Parser)]
#[command(name = "helmcue")]
#[command(author = "helmcue contributors")]
#[command(version)]
#[command(about = "Convert Helm charts and Go templates to CUE", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Dump raw emitted CUE when validation rejects it
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a Helm chart directory to a CUE module
    Chart {
        /// Chart directory (contains Chart.yaml)
        chart_dir: PathBuf,

        /// Output directory for the CUE module
        out_dir: PathBuf,

        /// Allow conflicting helper definitions (last wins)
        #[arg(long)]
        allow_duplicate_helpers: bool,
    },

    /// Convert a single template file (or stdin) to CUE
    Template {
        /// Helper files (.tpl) and at most one template file; stdin is
        /// read when no template file is given
        files: Vec<PathBuf>,

        /// Enable the Helm/Sprig function set instead of plain
        /// text/template builtins
        #[arg(long)]
        helm: bool,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    miette::set_panic_hook();

    let cli = Cli::parse();

    if cli.debug {
        // SAFETY: single-threaded at this point (start of main).
        unsafe { std::env::set_var("HELMCUE_DEBUG", "1") };
    }

    match cli.command {
        Commands::Chart {
            chart_dir,
            out_dir,
            allow_duplicate_helpers,
        } => commands::chart::run(&chart_dir, &out_dir, allow_duplicate_helpers),

        Commands::Template { files, helm } => commands::template::run(&files, helm),

        Commands::Version => {
            commands::version::run();
            Ok(())
        }
    }
}
