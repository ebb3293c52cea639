use axum::{
    Router,
    http::{Method, header},
    routing::get,
};
use clap::{Parser, Subcommand};
use hocuspocus_gateway::{
    AllowAll, LocalQueue, TaskWorker,
    config::Config,
    db::{CollabRepo, init_database},
    gateway::GatewayState,
    handlers::webhook_routes,
    models::ModelRegistry,
    signature::SIGNATURE_HEADER,
    snapshot::SnapshotStore,
};
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "hocuspocus_gateway", version)]
#[command(about = "Webhook gateway persisting Hocuspocus document state")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the webhook server (default)
    Serve,
    /// Issue an access token for an identity entity
    IssueToken {
        /// Registered model type of the identity entity
        #[arg(long)]
        model_type: String,
        /// Id of the identity entity
        #[arg(long)]
        model_id: i64,
    },
    /// Revoke a token and delete its snapshots
    RevokeToken { token: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hocuspocus_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize database
    let conn = match Connection::open(&config.database_path) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_database(&conn) {
        error!("Failed to initialize database: {}", e);
        std::process::exit(1);
    }

    let repo = Arc::new(CollabRepo::new(conn));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, repo).await,
        Command::IssueToken {
            model_type,
            model_id,
        } => match repo.create_collaborator(&model_type, model_id) {
            Ok(collaborator) => println!("{}", collaborator.token),
            Err(e) => {
                error!("Failed to issue token: {}", e);
                std::process::exit(1);
            }
        },
        Command::RevokeToken { token } => match repo.delete_collaborator_by_token(&token) {
            Ok(true) => info!("Token revoked"),
            Ok(false) => {
                warn!("No collaborator owns that token");
                std::process::exit(1);
            }
            Err(e) => {
                error!("Failed to revoke token: {}", e);
                std::process::exit(1);
            }
        },
    }
}

async fn serve(config: Arc<Config>, repo: Arc<CollabRepo>) {
    if let Err(e) = config.require_secret() {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("Starting Hocuspocus Gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Database path: {:?}", config.database_path);
    info!("Webhook route: {}", config.hocuspocus.route);
    info!("Accepted events: {:?}", config.hocuspocus.events);
    info!("CORS origins: {:?}", config.cors_origins);

    let registry = match ModelRegistry::from_specs(&config.models, repo.clone()) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            error!("Failed to build model registry: {}", e);
            std::process::exit(1);
        }
    };
    if registry.is_empty() {
        warn!("No model types registered; every document name will be rejected");
    } else {
        info!("Registered {} model types", registry.len());
    }
    warn!("Access gate allows every authenticated collaborator");

    // Start task worker
    let (queue, receiver) = LocalQueue::new(config.queue.capacity);
    let worker = TaskWorker::new(
        receiver,
        SnapshotStore::new(repo.clone()),
        config.queue.max_attempts,
        Duration::from_millis(config.queue.retry_backoff_ms),
    );
    let worker_handle = tokio::spawn(worker.run());

    let state = GatewayState::new(
        config.hocuspocus.clone(),
        repo.clone(),
        registry,
        Arc::new(queue),
        Arc::new(AllowAll),
    );

    // Build CORS layer
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-hocuspocus-signature-256"),
        ])
        .allow_origin(AllowOrigin::list(origins));

    // Build the router
    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(webhook_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Create listener
    let addr = config.server_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Server listening on http://{}", addr);
    info!("Expecting signatures in {}", SIGNATURE_HEADER);

    // Run server with graceful shutdown
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    // Dropping the router closed the queue; wait for the worker to drain it.
    if let Err(e) = worker_handle.await {
        error!("Task worker failed: {}", e);
    }

    info!("Server shut down gracefully");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
