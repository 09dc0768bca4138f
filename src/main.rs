use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use campus::config::AppConfig;
use campus::openapi::ApiDoc;
use campus::rate_limit::{InMemoryRateLimiter, RateLimiterFacade};
use campus::repo::Repo;
use campus::storage::build_object_store;
use campus::uploads::LocalUploads;
use campus::{config, AppState, SecurityHeaders};

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use campus::repo::inmem::InMemRepo;
    let repo = match &cfg.data_dir {
        Some(dir) => {
            info!("in-memory repository with snapshots in '{}'", dir.display());
            InMemRepo::with_snapshot_dir(dir)
        }
        None => {
            info!("in-memory repository (no persistence)");
            InMemRepo::new()
        }
    };
    Ok(Arc::new(repo))
}

#[cfg(feature = "postgres-store")]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use anyhow::Context;
    use campus::repo::pg::PgRepo;
    use sqlx::postgres::PgPoolOptions;

    let url = cfg.database_url.as_deref().context("DATABASE_URL must be set for postgres-store")?;
    let pool = PgPoolOptions::new().max_connections(5).connect_lazy(url)?;
    let repo = PgRepo::new(pool);
    repo.migrate().await?;
    info!("Postgres repository ready");
    Ok(Arc::new(repo))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // .env is a development convenience only
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = match AppConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("configuration error: {e}");
            eprintln!("{e}\nPlease copy .env.example to .env and configure it");
            std::process::exit(1);
        }
    };
    info!("Bootstrapping campus server");
    info!("Frontend URL: {}", cfg.frontend_url);

    let repo = build_repo(&cfg).await.map_err(std::io::Error::other)?;
    let objects = build_object_store(&cfg).await.map_err(std::io::Error::other)?;
    tokio::fs::create_dir_all(&cfg.upload_dir).await?;
    let uploads = LocalUploads::new(&cfg.upload_dir, cfg.max_upload_bytes);

    let mut state = AppState::new(repo, objects, uploads);
    if cfg.rate_limit_enabled {
        state = state.with_rate_limiter(RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg.rate_limits.clone()));
    } else {
        info!("rate limiting disabled");
    }

    let openapi = ApiDoc::openapi();
    let security = SecurityHeaders::from_env().with_hsts(cfg.enable_hsts);
    let frontend = cfg.frontend_url.clone();

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend)
            .allowed_origin("http://localhost:5173")
            .allowed_origin("http://127.0.0.1:5173")
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(security.clone())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(&cfg.bind_addr)?;

    info!("Listening on http://{}", cfg.bind_addr);
    server.run().await
}
