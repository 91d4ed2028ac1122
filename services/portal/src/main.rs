use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use common::database::{DatabaseConfig, health_check, init_pool};
use common::{RedisConfig, RedisPool};
use portal::{
    AppState, Collaborators, Infrastructure, PortalConfig, create_router,
    gates::RateLimitGate,
    logging,
    permissions::PermissionTable,
    repositories::{SettingsRepository, UserRepository},
    session::RedisSessionStore,
    settings::DEBUG_MODE,
};

#[tokio::main]
async fn main() {
    let log_control = match logging::init_tracing(false) {
        Ok(control) => control,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(log_control).await {
        error!("Portal service failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(log_control: logging::LogControl) -> Result<()> {
    info!("Starting portal service");

    let config = PortalConfig::from_env().context("loading configuration")?;

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    // Check database connectivity
    if health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    // Initialize Redis connection pool
    let redis_config = RedisConfig::from_env()?;
    let redis_pool = RedisPool::new(&redis_config).await?;

    let permissions = PermissionTable::load(config.permissions_file.as_deref())
        .context("loading permission table")?;

    let users = UserRepository::new(pool.clone());
    let collaborators = Collaborators {
        users: Arc::new(users.clone()),
        grants: Arc::new(users),
        settings: Arc::new(SettingsRepository::new(pool.clone())),
        sessions: Arc::new(RedisSessionStore::new(redis_pool.clone())),
        counters: Some(Arc::new(redis_pool.clone())),
        permissions,
    };

    let state = AppState::new(config, collaborators, log_control).with_infrastructure(
        Infrastructure {
            db_pool: pool,
            redis_pool,
        },
    );

    if std::env::var_os("RUST_LOG").is_none() && state.settings.flag(DEBUG_MODE).await {
        state.log_control.set_debug(true);
    }

    if let Some(limiter) = state.rate_limiter.clone() {
        spawn_counter_purge(limiter);
    }

    info!("Portal service initialized successfully");

    // Start the web server
    let address = state.config.bind_address();
    let app = create_router(state);

    let listener = TcpListener::bind(&address).await?;
    info!("Portal service listening on {}", address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Drop expired in-process rate limit windows once per window length
fn spawn_counter_purge(limiter: RateLimitGate) {
    let every = Duration::from_secs(limiter.config().window_seconds.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let purged = limiter.fallback_store().purge_expired().await;
            if purged > 0 {
                debug!(purged, "Purged expired rate limit counters");
            }
        }
    });
}
