use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use serde_json::Value;
use traceguard_core::{
    call::{CallArgs, CallOutput},
    config::Config,
    instrumentor::init_openai_instrumentor,
    method::{EchoMethod, LlmMethod, wrapped_methods},
    model::{ChatCompletionRequest, ChatMessage, CompletionRequest, Prompt, Role},
    payload::Payload,
    providers::openai::OpenAI,
    registry::MethodRegistry,
    telemetry::RecordingTracer,
    version::{PackageVersions, is_v1_version},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "traceguard CLI smoke tool", long_about = None)]
struct Cli {
    /// Config file (JSON or TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Use the built-in echo target instead of the OpenAI API
    #[arg(long, global = true)]
    offline: bool,
    /// Request a streamed response
    #[arg(long, global = true)]
    stream: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a chat completion request
    Chat {
        #[arg(long)]
        model: String,
        #[arg(short, long, help = "Message from the user")]
        message: String,
    },
    /// Send a text completion request
    Completion {
        #[arg(long)]
        model: String,
        #[arg(short, long, help = "Prompt text")]
        prompt: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };

    let registry = Arc::new(MethodRegistry::new());
    let online = if cli.offline { None } else { OpenAI::from_config(&cfg)? };
    match online {
        Some(client) => {
            // The HTTP client speaks the version-1 API.
            cfg.library.version.get_or_insert_with(|| "1.0.0".into());
            cfg.api.base_url.get_or_insert_with(|| traceguard_core::providers::openai::DEFAULT_BASE_URL.into());
            Arc::new(client).register(&registry);
        }
        None => {
            tracing::info!("no API key or --offline given, using echo target");
            let version = cfg.library.version.get_or_insert_with(|| "1.0.0".into());
            for m in wrapped_methods(is_v1_version(version)) {
                let method: Arc<dyn LlmMethod> = if m.span_name == "openai.chat" {
                    Arc::new(EchoMethod::chat())
                } else {
                    Arc::new(EchoMethod::completion())
                };
                registry.register(m.key(), method);
            }
        }
    }

    let tracer = RecordingTracer::new();
    let instrumentor = init_openai_instrumentor(
        registry.clone(),
        Arc::new(tracer.clone()),
        Arc::new(PackageVersions::from_config(&cfg.library)),
        &cfg,
    )?;
    let table = wrapped_methods(instrumentor.context().version.is_v1()?);

    let (key, args) = match cli.command {
        Commands::Chat { model, message } => (
            table[0].key(),
            CallArgs::from_request(&ChatCompletionRequest {
                model,
                messages: vec![ChatMessage::new(Role::User, message)],
                stream: cli.stream,
                ..Default::default()
            })?,
        ),
        Commands::Completion { model, prompt } => (
            table[1].key(),
            CallArgs::from_request(&CompletionRequest {
                model,
                prompt: Prompt::Text(prompt),
                stream: cli.stream,
                ..Default::default()
            })?,
        ),
    };

    match registry.call(&key, args).await? {
        CallOutput::Value(response) => println!("{}", answer_text(&response, false)),
        CallOutput::Stream(mut chunks) => {
            while let Some(chunk) = chunks.next().await {
                print!("{}", answer_text(&chunk?, true));
                io::stdout().flush().ok();
            }
            println!();
        }
    }

    instrumentor.uninstrument()?;
    let spans: Vec<Value> = tracer.spans().iter().map(|s| s.to_json()).collect();
    println!("{}", serde_json::to_string_pretty(&spans)?);
    Ok(())
}

/// Text of the first choice of a response or chunk.
fn answer_text(payload: &Payload, delta: bool) -> String {
    let Ok(fields) = payload.fields() else {
        return String::new();
    };
    let value = fields.into_value();
    let choice = &value["choices"][0];
    let text = if delta {
        choice["delta"]["content"].as_str()
    } else {
        choice["message"]["content"].as_str()
    };
    text.or_else(|| choice["text"].as_str())
        .unwrap_or_default()
        .to_string()
}
