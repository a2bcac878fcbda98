//! API Server Entry Point
//!
//! Application entry point and server initialization.
//! Uses `anyhow` for startup errors, but application-level
//! errors are `auth::AuthError` / `auth::AppError`.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use auth::application::SessionAdminUseCase;
use auth::store::AuthStore;
use auth::{AuthConfig, InMemoryAuthRepository, PgAuthRepository, auth_router, auth_router_generic};
use axum::{
    Router, http,
    http::{Method, header},
};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Interval between expired session / challenge / audit sweeps
const CLEANUP_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api=info,auth=info,platform=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let auth_config = if cfg!(debug_assertions) && env::var("JWT_SECRET").is_err() {
        tracing::warn!("JWT_SECRET not set, using random development secrets");
        AuthConfig::development()
    } else {
        AuthConfig::from_env()?
    };

    let auth = match env::var("AUTH_STORE").as_deref() {
        Ok("memory") => {
            tracing::warn!("Using in-memory auth store, data is lost on restart");
            let repo = InMemoryAuthRepository::new();
            start_cleanup(repo.clone(), auth_config.audit_retention).await;
            auth_router_generic(repo, auth_config)
        }
        _ => {
            let database_url = env::var("DATABASE_URL")?;

            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&database_url)
                .await?;

            tracing::info!("Connected to database");

            // Run migrations
            sqlx::migrate!("../../../database/migrations")
                .run(&pool)
                .await?;

            tracing::info!("Migrations completed");

            let repo = PgAuthRepository::new(pool);
            start_cleanup(repo.clone(), auth_config.audit_retention).await;
            auth_router(repo, auth_config)
        }
    };

    // CORS configuration
    let frontend_origins = env::var("FRONTEND_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:40922,http://127.0.0.1:40922".to_string());

    let allowed_origins: Vec<http::HeaderValue> = frontend_origins
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]))
        .allow_credentials(true);

    // Build router
    let app = Router::new()
        .nest("/api/auth", auth)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr: SocketAddr = env::var("BIND_ADDR")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 31113)));
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Run one cleanup pass now, then every [`CLEANUP_INTERVAL`] in the background
async fn start_cleanup<R: AuthStore>(repo: R, audit_retention: chrono::Duration) {
    let use_case = SessionAdminUseCase::new(Arc::new(repo));

    // Startup cleanup; errors here should not prevent server startup
    run_cleanup(&use_case, audit_retention, "Startup").await;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            run_cleanup(&use_case, audit_retention, "Periodic").await;
        }
    });
}

async fn run_cleanup<R: AuthStore>(
    use_case: &SessionAdminUseCase<R>,
    audit_retention: chrono::Duration,
    pass: &'static str,
) {
    match use_case.cleanup_expired(chrono::Utc::now(), audit_retention).await {
        Ok(report) => tracing::info!(
            pass,
            sessions_expired = report.expired_sessions,
            challenges_deleted = report.purged_challenges,
            audit_events_purged = report.purged_audit_events,
            "Auth cleanup completed"
        ),
        Err(e) => tracing::warn!(pass, error = %e, "Auth cleanup failed, continuing anyway"),
    }
}
