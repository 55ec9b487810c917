use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use resumind_core::config::{AppConfig, ConfigOverlay};
use resumind_core::types::ScopeKey;
use resumind_flow::graph::{FlowState, RunState};
use resumind_flow::{Capabilities, DocumentInput, Invocation, Pipelines, RunLogger};
use resumind_llm::{create_generator, StructuredClassifier, StructuredExtractor};
use resumind_memory::{EmbeddingProvider, FsDocumentSource, HttpEmbeddingProvider, SqliteIndex};

#[derive(Parser)]
#[command(name = "resumind", version, about = "Resume parsing and interview prep pipelines")]
struct Cli {
    /// Path to config file (default: ~/.resumind/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Identity the run acts for. Scopes every read and write.
    #[arg(short, long, global = true, env = "RESUMIND_USER")]
    user: Option<String>,

    /// Override a run option for this invocation (repeatable), e.g. --set max_retries=4
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    overrides: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify, extract and index a resume
    Parse {
        /// Document reference, `<owner>/<path>` under the documents root
        #[arg(required_unless_present = "file")]
        reference: Option<String>,
        /// Read the document from a local file instead
        #[arg(long, conflicts_with = "reference")]
        file: Option<PathBuf>,
    },
    /// Generate interview questions from indexed documents
    Questions {
        /// Id of the indexed candidate profile document
        #[arg(long)]
        profile_id: String,
        /// Id of the indexed career or project document
        #[arg(long)]
        experience_id: String,
    },
    /// Ask a question about your indexed documents
    Chat {
        #[arg(trailing_var_arg = true, required = true)]
        question: Vec<String>,
    },
    /// Show the configuration, or the resolved run options with --user
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("resumind=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "resumind", &mut std::io::stdout());
        return Ok(());
    }

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_or_default(&config_path)?,
    };
    let overlay = ConfigOverlay::from_assignments(&cli.overrides)?;

    if let Commands::Config = &cli.command {
        match &cli.user {
            Some(user) => {
                let resolved = config.run.resolve(&ScopeKey::new(user.as_str()), &overlay)?;
                println!("{}", toml::to_string_pretty(&resolved)?);
            }
            None => println!("{}", toml::to_string_pretty(&config)?),
        }
        return Ok(());
    }

    let Some(user) = cli.user.clone() else {
        anyhow::bail!("no identity: pass --user or set RESUMIND_USER");
    };

    let pipelines = build_pipelines(&config)?;

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        warn!("Interrupted, cancelling run");
        cancel_clone.cancel();
    });

    let invocation = Invocation::new(user)
        .with_overlay(overlay)
        .with_cancel(cancel.clone());

    let logger = RunLogger::from_config(&config).map(|logger| {
        info!(path = %logger.path_for(&invocation.run_id).display(), "Logging run");
        logger.spawn(pipelines.events(), invocation.run_id.clone(), cancel.child_token())
    });

    let failed = match cli.command {
        Commands::Parse { reference, file } => {
            let input = match (reference, file) {
                (_, Some(path)) => {
                    let bytes = tokio::fs::read(&path).await?;
                    DocumentInput::Content(Arc::from(bytes))
                }
                (Some(reference), None) => DocumentInput::Reference(reference),
                (None, None) => anyhow::bail!("a document reference or --file is required"),
            };
            report(&pipelines.parse(&invocation, input).await?)?
        }
        Commands::Questions {
            profile_id,
            experience_id,
        } => report(
            &pipelines
                .questions(&invocation, profile_id, experience_id)
                .await?,
        )?,
        Commands::Chat { question } => {
            let run = pipelines.chat(&invocation, question.join(" ")).await?;
            if let Some(answer) = &run.slots.answer {
                println!("{}", answer);
            }
            run.error_message()
        }
        Commands::Config | Commands::Completions { .. } => unreachable!("handled before pipelines"),
    };

    if let Some(handle) = logger {
        handle.await.ok();
    }

    match failed {
        Some(message) => anyhow::bail!(message),
        None => Ok(()),
    }
}

/// Wire the configured capabilities into the pipelines.
fn build_pipelines(config: &AppConfig) -> anyhow::Result<Pipelines> {
    let generator = create_generator(&config.model);
    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(HttpEmbeddingProvider::from_config(&config.embedding));
    let index = Arc::new(SqliteIndex::open(&config.index_path(), embedder)?);

    let caps = Capabilities {
        source: Arc::new(FsDocumentSource::new(config.documents_root())),
        classifier: Arc::new(StructuredClassifier::new(generator.clone())),
        extractor: Arc::new(StructuredExtractor::new(generator.clone())),
        generator,
        documents: Arc::new(index.collection(&config.index.documents_collection)),
        questions: Arc::new(index.collection(&config.index.questions_collection)),
    };
    Ok(Pipelines::new(
        caps,
        config.run.clone(),
        config.engine.clone(),
    )?)
}

#[derive(Serialize)]
struct Report<'a, S: FlowState> {
    #[serde(flatten)]
    run: &'a RunState<S>,
    error_message: Option<String>,
}

/// Print the final state as JSON and hand back the failure, if any.
fn report<S: FlowState>(run: &RunState<S>) -> anyhow::Result<Option<String>> {
    let report = Report {
        run,
        error_message: run.error_message(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(run.error_message())
}
