use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use invoice_flow::admission::AdmissionGate;
use invoice_flow::batch::{build_report_summary, BatchProcessor, BatchProgress};
use invoice_flow::config::{self, AppConfig};
use invoice_flow::pipeline::{ensure_model_available, OllamaClient};
use invoice_flow::workflow::{Collaborators, Workflow};

#[derive(Parser)]
#[command(
    name = "invoice-flow",
    version,
    about = "Dual-extraction invoice checker"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Run timeout in seconds (default 300)
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Compare and classify through a local Ollama model instead of the rule-based collaborators
    #[arg(long, global = true)]
    llm: bool,

    /// Log every step dispatch
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a single document and print the run result as JSON
    Run {
        /// Path to the invoice
        file: PathBuf,
        /// Also print the execution trace as a Mermaid chart
        #[arg(long)]
        trace: bool,
    },
    /// Process every file of a folder, one at a time, and print a summary table
    Batch {
        /// Input folder (default: $INVOICE_FLOW_INPUT_DIR or the app data folder)
        dir: Option<PathBuf>,
        /// Folder for per-document JSON results (cleaned first)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the pipeline graph as a Mermaid chart
    Graph,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    invoice_flow::init_tracing(cli.log_level.as_deref());
    tracing::info!("{} v{}", config::APP_NAME, config::APP_VERSION);

    let mut app = AppConfig::from_env();
    if let Some(secs) = cli.timeout {
        app.workflow = app.workflow.with_timeout(Duration::from_secs(secs));
    }
    app.workflow = app.workflow.verbose(cli.verbose);

    let collaborators = if cli.llm {
        // Blocking HTTP: done before the runtime exists.
        let client = OllamaClient::new(&app.ollama_host, config::LLM_PROBE_TIMEOUT_SECS)?;
        ensure_model_available(&client, &app.model)
            .with_context(|| format!("model check against {}", app.ollama_host))?;
        Collaborators::with_llm(app.ollama_host.clone(), app.model.clone(), app.workflow.run_timeout.as_secs())
    } else {
        Collaborators::reference()
    };
    let workflow = Arc::new(Workflow::new(collaborators, app.workflow.clone())?);

    // Not #[tokio::main]: its runtime drop would wait on step bodies an
    // abandoned run left on the blocking pool.
    invoice_flow::block_on_detached(execute(cli.command, workflow, app))?
}

async fn execute(command: Commands, workflow: Arc<Workflow>, app: AppConfig) -> anyhow::Result<()> {
    match command {
        Commands::Run { file, trace } => {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .context("input path has no file name")?;
            let done = workflow.run_traced(&file, name).await?;
            println!("{}", serde_json::to_string_pretty(&done.result)?);
            if trace {
                println!("{}", done.trace.render_mermaid());
            }
        }
        Commands::Batch { dir, output } => {
            let dir = dir.unwrap_or(app.input_dir);
            let processor = BatchProcessor::new(workflow, Arc::new(AdmissionGate::new()))
                .with_output_dir(output.unwrap_or(app.output_dir));

            let progress = |event: BatchProgress| {
                if let BatchProgress::Progress { completed, total, current_file } = event {
                    eprintln!("[{}/{}] {current_file}", completed + 1, total);
                }
            };
            let report = processor
                .process_folder(&dir, Some(&progress))
                .await
                .with_context(|| format!("batch over {}", dir.display()))?;

            if report.entries.is_empty() {
                println!("No files found in {}.", dir.display());
            } else {
                println!("{}", build_report_summary(&report));
            }
        }
        Commands::Graph => println!("{}", workflow.render_graph()),
    }
    Ok(())
}
