// Flowscript command-line runner
// Parses a program, binds `main` to the given input and prints the result as JSON

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use flowscript::config::{BackendKind, FlowConfig};
use flowscript::{Workflow, WorkflowError, WorkflowRunner};

#[derive(Parser)]
#[command(name = "flowscript")]
#[command(version)]
#[command(about = "Run flowscript agent-orchestration programs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a program's `main` with the given input
    Run {
        /// Program source file
        program: PathBuf,

        /// Input as a JSON document (a bare word is taken as a string)
        #[arg(long, conflicts_with = "input_file")]
        input: Option<String>,

        /// Read the JSON input from a file
        #[arg(long, value_name = "PATH")]
        input_file: Option<PathBuf>,

        /// TOML configuration file
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Override the configured backend
        #[arg(long, value_enum)]
        backend: Option<BackendArg>,
    },
    /// Parse and statically validate a program
    Check {
        program: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Echo,
    Http,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Echo => BackendKind::Echo,
            BackendArg::Http => BackendKind::Http,
        }
    }
}

fn read_source(path: &PathBuf) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

fn parse_input(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

async fn run(
    program: PathBuf,
    input: Option<String>,
    input_file: Option<PathBuf>,
    config: Option<PathBuf>,
    backend: Option<BackendArg>,
) -> anyhow::Result<()> {
    let mut settings = match &config {
        Some(path) => FlowConfig::load(path)?,
        None => FlowConfig::default(),
    };
    if let Some(kind) = backend {
        settings.backend.kind = kind.into();
    }

    let input = match (input, input_file) {
        (Some(raw), _) => parse_input(&raw),
        (None, Some(path)) => serde_json::from_str(&read_source(&path)?)
            .with_context(|| format!("{} is not valid JSON", path.display()))?,
        (None, None) => serde_json::Value::Null,
    };

    let workflow = Workflow::from_source(&read_source(&program)?)?;
    let dispatcher = Arc::new(settings.dispatcher()?);
    info!(
        program = %program.display(),
        backend = ?settings.backend.kind,
        "running workflow"
    );
    let runner = WorkflowRunner::new(workflow, dispatcher, settings.evaluator_config());

    match runner.run_json(input).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(err) => {
            if let Some(history) = err.partial_history() {
                eprintln!("partial history:\n{}", history);
            }
            Err(report(err))
        }
    }
}

fn report(err: WorkflowError) -> anyhow::Error {
    match err {
        WorkflowError::Runtime { cause, .. } => {
            anyhow::anyhow!("{} ({:?})", cause.root_cause(), cause.kind())
        }
        other => other.into(),
    }
}

fn check(program: PathBuf) -> anyhow::Result<()> {
    let workflow = Workflow::from_source(&read_source(&program)?)?;
    let names: Vec<String> = workflow
        .program()
        .definitions
        .iter()
        .filter_map(|def| def.name.as_ref().map(|n| n.to_string()))
        .collect();
    if let Err(err) = workflow.entry() {
        bail!("{}: {}", program.display(), err);
    }
    println!("{}: ok ({} functions: {})", program.display(), names.len(), names.join(", "));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("flowscript=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Run {
            program,
            input,
            input_file,
            config,
            backend,
        } => run(program, input, input_file, config, backend).await,
        Command::Check { program } => check(program),
    }
}
