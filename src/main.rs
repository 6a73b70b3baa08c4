//! Dialog Engine command line: console conversations and the HTTP server

use clap::Parser;
use dialog_engine::api::{create_router, AppState};
use dialog_engine::compiler::compile;
use dialog_engine::config::Configuration;
use dialog_engine::engine::Engine;
use dialog_engine::llm::{LlmConfig, ModelRegistry};
use dialog_engine::runtime::{ConsoleChannel, ConsoleInput, Services};
use dialog_engine::spec::ChatbotModel;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Run a declarative chatbot.
#[derive(Parser, Debug)]
#[command(name = "dialog-engine", version, about = "Run a declarative chatbot")]
struct Cli {
    /// Chatbot document, or a directory of documents
    #[arg(long)]
    chatbot: PathBuf,

    /// Configuration file (defaults to <chatbot>/configuration/default.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the console conversation's recording to this file on exit
    #[arg(long)]
    dump: Option<PathBuf>,

    /// Serve the HTTP API on this port instead of chatting on the console
    #[arg(long, value_name = "PORT")]
    serve: Option<u16>,

    /// Export the compiled state machine as Graphviz DOT and exit
    #[arg(long, value_name = "FILE")]
    dot: Option<PathBuf>,
}

fn init_logging(serving: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "dialog_engine=info,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if serving {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_list(false),
            )
            .init();
    } else {
        // stdout carries the conversation
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.serve.is_some());

    let model = ChatbotModel::load(&cli.chatbot)?;
    let configuration =
        Configuration::discover(&cli.chatbot, cli.config.as_deref())?.with_env_overrides();
    let chatbot = Arc::new(compile(&model, &configuration)?);

    if let Some(path) = &cli.dot {
        std::fs::write(path, chatbot.to_dot())?;
        tracing::info!(path = %path.display(), "State machine exported");
        return Ok(());
    }

    let llm_registry = ModelRegistry::new(&LlmConfig::from_env(), &configuration);
    if llm_registry.has_models() {
        tracing::info!(
            models = ?llm_registry.available_models(),
            default = %llm_registry.default_model_id(),
            "LLM registry initialized"
        );
    } else {
        tracing::warn!("No LLM API key configured. Set OPENAI_API_KEY.");
    }
    let services = Arc::new(Services::new(Arc::new(llm_registry), &configuration));

    if let Some(port) = cli.serve {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        let app = create_router(AppState::new(chatbot, services))
            .layer(cors)
            .layer(TraceLayer::new_for_http());

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        tracing::info!("Dialog engine listening on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        return Ok(());
    }

    let mut engine = Engine::new(chatbot, services, Box::new(ConsoleChannel));
    let mut input = ConsoleInput::new();
    let result = engine.run_all(&mut input).await;

    let recording = engine.recording();
    if let Some(average) = recording.average_response_time() {
        tracing::info!(average_ms = %average.as_millis(), "Average response time");
    }
    if let Some(path) = &cli.dump {
        recording.dump(path)?;
        tracing::info!(path = %path.display(), "Recording written");
    }
    result?;
    Ok(())
}
