use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use openlovable::apply::installer::{HttpPackageInstaller, PackageInstaller, SandboxPackageInstaller};
use openlovable::apply::CodeApplyPipeline;
use openlovable::config::{self, Config};
use openlovable::gateway::{self, AppState};
use openlovable::generation::GenerationClient;
use openlovable::sandbox::e2b::E2bProvider;
use openlovable::sandbox::memory::InMemoryProvider;
use openlovable::sandbox::{CreateOptions, EnvironmentProvider, SandboxLifecycleManager};
use openlovable::state::{ConversationState, FileCache};
use openlovable::store::SessionStore;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "openlovable", version, about = "Sandbox lifecycle and code-apply engine")]
struct Cli {
    /// Config file (default: ./openlovable.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, value_enum, default_value_t = ProviderKind::E2b)]
        provider: ProviderKind,
    },
    /// Parse an AI response and print the result as JSON
    Parse {
        /// File to read, or `-` for stdin
        input: String,
    },
    /// Print the JSON Schema of the config file
    ConfigSchema,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderKind {
    E2b,
    Memory,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("openlovable=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::ConfigSchema => {
            let schema = schemars::schema_for!(Config);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
        Command::Parse { input } => {
            let text = if input == "-" {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("Failed to read stdin")?;
                buf
            } else {
                std::fs::read_to_string(&input).with_context(|| format!("Failed to read {input}"))?
            };
            let parsed = openlovable::parser::parse(&text);
            println!("{}", serde_json::to_string_pretty(&parsed)?);
            Ok(())
        }
        Command::Serve {
            host,
            port,
            provider,
        } => {
            init_tracing();
            let mut cfg = config::load(cli.config.as_deref())?;
            if let Some(host) = host {
                cfg.gateway.host = host;
            }
            if let Some(port) = port {
                cfg.gateway.port = port;
            }
            serve(cfg, provider).await
        }
    }
}

async fn serve(cfg: Config, kind: ProviderKind) -> anyhow::Result<()> {
    let provider: Arc<dyn EnvironmentProvider> = match kind {
        ProviderKind::E2b => {
            cfg.validate_for_e2b()?;
            Arc::new(E2bProvider::new(&cfg.e2b)?)
        }
        ProviderKind::Memory => Arc::new(InMemoryProvider::new()),
    };
    tracing::info!("Using {} sandbox provider", provider.name());

    let mut manager = SandboxLifecycleManager::new(
        provider,
        &cfg.sandbox,
        CreateOptions {
            template: cfg.e2b.template.clone(),
            timeout_ms: cfg.e2b.timeout_ms,
        },
    );
    if let Some(db_path) = cfg.db_path() {
        let store = SessionStore::open(&db_path)
            .with_context(|| format!("Failed to open session store {}", db_path.display()))?;
        manager = manager.with_session_store(Arc::new(store));
    }
    let manager = Arc::new(manager);

    if let Some(info) = manager.restore().await {
        tracing::info!("Restored sandbox {} at {}", info.sandbox_id, info.url);
    }

    let installer: Arc<dyn PackageInstaller> = match cfg.installer.endpoint.as_deref() {
        Some(endpoint) if !endpoint.trim().is_empty() => Arc::new(HttpPackageInstaller::new(
            endpoint,
            Duration::from_millis(cfg.sandbox.install_timeout_ms),
        )?),
        _ => Arc::new(SandboxPackageInstaller::new(
            manager.clone(),
            cfg.sandbox.install_timeout_ms,
        )),
    };

    let generation = match GenerationClient::new(&cfg.generation) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::info!("Code generation disabled: {e}");
            None
        }
    };

    let state = AppState {
        pipeline: Arc::new(CodeApplyPipeline::new(
            manager.clone(),
            installer,
            Arc::new(FileCache::new()),
        )),
        manager,
        conversation: Arc::new(ConversationState::new()),
        generation,
    };

    gateway::run_gateway(&cfg.gateway, state).await
}
