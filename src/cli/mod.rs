//! CLI command definitions and handlers

mod combine;
mod list;
mod run;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lineage - commit-graph analysis of git repositories
#[derive(Parser, Debug)]
#[command(name = "lineage")]
#[command(
    version,
    about = "Run pluggable analyses over the full commit graph of a git repository",
    after_help = "\
Examples:
  lineage run . --devs                     Developer activity per day
  lineage run . -a couples -a devs         Several analyses in one pass
  lineage run . --all --format binary -o a.bin
  lineage combine a.bin b.bin              Merge results of separate runs
  lineage list                             Show analyses and their options"
)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info", value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze the history of a repository
    #[command(after_help = "\
Examples:
  lineage run . -a devs                          Commits and lines per developer
  lineage run . -a devs --set TicksSinceStart.TickSize=168
  lineage run . --imports-per-dev                Enables the code-structure feature
  lineage run . --all --first-parent             Ignore merged branches
  lineage run . -a couples --head v1.0 --max-commits 500")]
    Run {
        /// Path to repository (default: current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Analysis to run, by flag (repeatable)
        #[arg(long = "analysis", short = 'a', value_name = "FLAG")]
        analyses: Vec<String>,

        /// Run every registered analysis
        #[arg(long)]
        all: bool,

        /// Shorthand for -a devs
        #[arg(long)]
        devs: bool,

        /// Shorthand for -a couples
        #[arg(long)]
        couples: bool,

        /// Shorthand for -a imports-per-dev
        #[arg(long)]
        imports_per_dev: bool,

        /// Shorthand for -a shotness
        #[arg(long)]
        shotness: bool,

        /// Enable a feature tag (repeatable)
        #[arg(long = "feature", value_name = "NAME")]
        features: Vec<String>,

        /// Set a component option, e.g. TicksSinceStart.TickSize=12 (repeatable)
        #[arg(long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,

        /// Follow only the first parent of every commit
        #[arg(long)]
        first_parent: bool,

        /// Revision to analyze up to (default: HEAD)
        #[arg(long)]
        head: Option<String>,

        /// Analyze at most this many commits, oldest first
        #[arg(long)]
        max_commits: Option<usize>,

        /// Output format: text or binary
        #[arg(long, short = 'f', default_value = "text", value_parser = ["text", "binary"])]
        format: String,

        /// Output file path (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Configuration file (default: lineage.toml in the repository)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Neither read nor store cached results
        #[arg(long)]
        no_cache: bool,
    },

    /// Merge binary reports produced by separate runs
    Combine {
        /// Binary reports to merge
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Only merge this analysis (component name)
        #[arg(long)]
        only: Option<String>,

        /// Output file path (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// List analyses, plumbing and configuration options
    List,
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            path,
            mut analyses,
            all,
            devs,
            couples,
            imports_per_dev,
            shotness,
            features,
            set,
            first_parent,
            head,
            max_commits,
            format,
            output,
            config,
            no_cache,
        } => {
            for (enabled, flag) in [
                (devs, "devs"),
                (couples, "couples"),
                (imports_per_dev, "imports-per-dev"),
                (shotness, "shotness"),
            ] {
                if enabled {
                    analyses.push(flag.to_string());
                }
            }
            run::run(run::RunArgs {
                path,
                analyses,
                all,
                features,
                set,
                first_parent,
                head,
                max_commits,
                format: format.parse()?,
                output,
                config,
                no_cache,
            })
        }

        Commands::Combine {
            files,
            only,
            output,
        } => combine::run(&files, only.as_deref(), output.as_deref()),

        Commands::List => list::run(),
    }
}
