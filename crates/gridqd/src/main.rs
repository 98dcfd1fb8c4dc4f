//! gridqd — the gridq lease scheduler daemon.
//!
//! Single binary that assembles the lease subsystems:
//! - State store (redb) with schema registry
//! - Priority resource accountants + leased-report aggregator
//! - Lease lifecycle manager with background expiry sweep
//! - Fairness oracle (backlog default)
//! - gRPC lease service (tonic)
//!
//! # Usage
//!
//! ```text
//! gridqd serve --listen 0.0.0.0:50071 --data-dir /var/lib/gridq
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use gridq_accounting::{AccountantRegistry, LeasedReportAggregator};
use gridq_auth::{AuthResult, AuthService, Principal, TokenReviewer};
use gridq_core::ServerConfig;
use gridq_server::{BacklogOracle, LeaseLifecycleManager, LeaseServer, SessionContext};
use gridq_state::{JobSetMapper, SchemaRegistry, StateStore};

#[derive(Parser)]
#[command(name = "gridqd", about = "gridq lease scheduler daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the lease scheduler server.
    Serve {
        /// gRPC listen address.
        #[arg(long)]
        listen: Option<String>,

        /// Data directory for persistent state.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Path to a gridq.toml configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Accepted executor bearer token; repeatable. Auth is disabled
        /// when none are given.
        #[arg(long = "auth-token")]
        auth_tokens: Vec<String>,
    },
}

/// Reviewer over a fixed token set. Credential verification proper is an
/// external collaborator; this covers static fleet tokens.
struct StaticTokenReviewer {
    tokens: Vec<String>,
}

#[tonic::async_trait]
impl TokenReviewer for StaticTokenReviewer {
    async fn review(&self, token: &str) -> AuthResult<Option<Principal>> {
        if self.tokens.iter().any(|t| t == token) {
            Ok(Some(Principal {
                name: "executor".to_string(),
                groups: vec!["executors".to_string()],
            }))
        } else {
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gridqd=debug,gridq=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            listen,
            data_dir,
            config,
            auth_tokens,
        } => {
            let mut config = match config {
                Some(path) => ServerConfig::from_file(&path)?,
                None => ServerConfig::default(),
            };
            // Flags override the file.
            if let Some(listen) = listen {
                config.listen_addr = listen;
            }
            if let Some(data_dir) = data_dir {
                config.data_dir = data_dir;
            }
            serve(config, auth_tokens).await
        }
    }
}

async fn serve(config: ServerConfig, auth_tokens: Vec<String>) -> anyhow::Result<()> {
    info!("gridq daemon starting");

    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.data_dir.join("gridq.redb");

    // ── Initialize subsystems ──────────────────────────────────

    // Schema registry, built once and passed by reference.
    let schema = SchemaRegistry::new();
    let store = StateStore::open(&db_path, &schema)?;
    info!(path = ?db_path, "state store opened");

    let accountants = Arc::new(AccountantRegistry::new());
    let aggregator = Arc::new(LeasedReportAggregator::new());

    let lifecycle = Arc::new(LeaseLifecycleManager::new(
        store.clone(),
        accountants.clone(),
        Duration::from_secs(config.lease.ttl_secs),
    ));
    lifecycle.recover()?;

    let oracle = Arc::new(BacklogOracle::new(store.clone(), aggregator.clone()));

    let job_sets = Arc::new(JobSetMapper::new(
        store.clone(),
        config.job_set_cache_capacity,
    ));

    let ctx = Arc::new(SessionContext {
        store,
        lifecycle: lifecycle.clone(),
        oracle,
        aggregator,
        accountants,
        job_sets,
        max_batch_size: config.lease.max_batch_size,
    });

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    // ── Background expiry sweep ────────────────────────────────

    let sweep_lifecycle = lifecycle.clone();
    let mut sweep_shutdown = shutdown_rx.clone();
    let sweep_interval = Duration::from_secs(config.lease.expiry_sweep_secs);
    let sweep_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match sweep_lifecycle.expire_overdue() {
                        Ok(expired) if !expired.is_empty() => {
                            info!(count = expired.len(), "expiry sweep reclaimed leases");
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "expiry sweep failed"),
                    }
                }
                _ = sweep_shutdown.changed() => break,
            }
        }
    });

    // ── Start gRPC server ──────────────────────────────────────

    let mut server = LeaseServer::new(ctx);
    if !auth_tokens.is_empty() {
        let reviewer = Arc::new(StaticTokenReviewer {
            tokens: auth_tokens,
        });
        server = server.with_auth(Arc::new(AuthService::new(
            reviewer,
            Duration::from_secs(config.auth.token_ttl_secs),
            Duration::from_secs(config.auth.invalid_token_ttl_secs),
        )));
        info!("bearer-token authentication enabled");
    }

    let addr = config.listen_addr.parse()?;
    info!(%addr, "lease server starting");

    tonic::transport::Server::builder()
        .add_service(server.into_service())
        .serve_with_shutdown(addr, async move {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("failed to install ctrl-c handler");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = shutdown_rx.changed().await;
    let _ = sweep_handle.await;

    info!("gridq daemon stopped");
    Ok(())
}
