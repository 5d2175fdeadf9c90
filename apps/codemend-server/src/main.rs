use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use codemend_api::{router, AppState};
use codemend_config::{load_config, ControlConfig};
use codemend_core::store::ControlStore;
use codemend_engine::agent::SystemPrompts;
use codemend_engine::{AgentLoop, AgentLoopConfig, JobService, SchedulerConfig, StepScheduler};
use codemend_exec::HttpWorkspaceClient;
use codemend_llm::{AnthropicClient, AnthropicConfig};
use codemend_skills::SkillRegistry;
use codemend_stores::{InMemoryControlStore, PgControlStore};

#[derive(Debug, Parser)]
#[command(name = "codemend-server")]
struct Args {
    #[arg(long, default_value = "config/codemend.yaml")]
    config: PathBuf,
    /// Overrides server.listen from the config file.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = if args.config.exists() {
        load_config(&args.config)
            .with_context(|| format!("load config {}", args.config.display()))?
    } else {
        info!(path = %args.config.display(), "config file not found, using defaults");
        ControlConfig::default()
    };

    let store = build_store(&config).await?;
    let workspace = Arc::new(
        HttpWorkspaceClient::new(config.executor.base_url.clone())
            .context("build workspace client")?,
    );

    let api_key = std::env::var(&config.llm.api_key_env).unwrap_or_else(|_| {
        warn!(
            env = %config.llm.api_key_env,
            "LLM API key variable not set, calls will be rejected"
        );
        String::new()
    });
    let llm = Arc::new(
        AnthropicClient::new(AnthropicConfig {
            endpoint: config.llm.endpoint.clone(),
            api_key,
            request_timeout_secs: config.llm.request_timeout_secs,
        })
        .context("build llm client")?,
    );

    let registry = SkillRegistry::with_builtins().context("build skill registry")?;
    let prompts = SystemPrompts::new(&registry);

    let jobs = Arc::new(JobService::new(store, workspace.clone()));
    let agent = Arc::new(AgentLoop::new(
        jobs.clone(),
        llm,
        workspace,
        prompts,
        AgentLoopConfig {
            model: config.llm.model.clone(),
            max_turns: config.agent.max_turns,
            max_observation_chars: config.agent.max_observation_chars,
            code_timeout_secs: config.agent.code_timeout_secs,
            ..AgentLoopConfig::default()
        },
    ));

    let scheduler = Arc::new(StepScheduler::new(
        jobs.clone(),
        agent,
        SchedulerConfig {
            tick: Duration::from_millis(config.scheduler.tick_ms),
            reap_interval: Duration::from_secs(config.scheduler.reap_interval_secs),
            workers: config.scheduler.workers,
        },
    ));
    let handles = scheduler.spawn();

    let listen: SocketAddr = match args.listen {
        Some(listen) => listen,
        None => config
            .server
            .listen
            .parse()
            .with_context(|| format!("parse listen address '{}'", config.server.listen))?,
    };
    let app = router(AppState { jobs });
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .context("bind server listener")?;
    info!(%listen, "codemend-server listening");
    axum::serve(listener, app)
        .await
        .context("server terminated with error")?;

    handles.claimer.abort();
    handles.reaper.abort();
    Ok(())
}

async fn build_store(config: &ControlConfig) -> anyhow::Result<Arc<dyn ControlStore>> {
    match config.store.backend.trim().to_ascii_lowercase().as_str() {
        "memory" | "in_memory" => {
            warn!("using the in-memory store, state will not survive a restart");
            Ok(Arc::new(InMemoryControlStore::new()))
        }
        "postgres" | "postgresql" | "pgsql" => {
            let url = config
                .store
                .connection_url
                .as_deref()
                .context("store.connection_url is required for postgres")?;
            let store = PgControlStore::connect(url)
                .await
                .context("connect postgres store")?;
            Ok(Arc::new(store))
        }
        backend => anyhow::bail!("unsupported store backend '{backend}'"),
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
