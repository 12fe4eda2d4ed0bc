use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

mod cmd;

#[derive(Parser)]
#[command(name = "mend")]
#[command(version, about = "Self-healing refactoring pipeline: detect, correct, verify")]
pub struct Cli {
    /// More detailed logs and per-transition output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline against a target directory
    Run {
        /// Directory holding the artifacts to process
        target: PathBuf,

        /// Retry budget: the number of correct/verify cycles allowed
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Detect and report only; never invoke the corrector or verifier
        #[arg(long)]
        dry_run: bool,

        /// Dispatch through the declarative execution graph instead of the relay loop
        #[arg(long)]
        graph: bool,

        /// Path to a mend.toml (defaults to <TARGET>/.mend/mend.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the run report as JSON to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Render the execution graph generated from the transition table
    Graph {
        #[arg(long, value_enum, default_value_t = GraphFormat::Mermaid)]
        format: GraphFormat,
    },
    /// Summarize persisted telemetry for a target
    Telemetry {
        #[arg(default_value = ".")]
        target: PathBuf,

        /// A specific run file instead of the latest run
        #[arg(long)]
        run: Option<PathBuf>,

        /// Check the event stream for data-quality problems
        #[arg(long)]
        validate: bool,
    },
    /// View, validate or create configuration
    Config {
        #[arg(long, default_value = ".")]
        target: PathBuf,

        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Mermaid,
    Dot,
    Table,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default mend.toml
    Init,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Run {
            target,
            max_iterations,
            dry_run,
            graph,
            config,
            output,
        } => {
            cmd::cmd_run(cmd::RunArgs {
                target: target.clone(),
                max_iterations: *max_iterations,
                dry_run: *dry_run,
                graph: *graph,
                config: config.clone(),
                output: output.clone(),
                verbose: cli.verbose,
            })
            .await
        }
        Commands::Graph { format } => cmd::cmd_graph(*format),
        Commands::Telemetry {
            target,
            run,
            validate,
        } => cmd::cmd_telemetry(target, run.as_deref(), *validate, cli.verbose),
        Commands::Config { target, command } => {
            cmd::cmd_config(target, command.clone(), cli.verbose)
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("{} {err:#}", console::style("error:").red().bold());
            ExitCode::from(cmd::exit_code_for(&err))
        }
    }
}
