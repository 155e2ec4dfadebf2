use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use sea_orm::DatabaseConnection;
use sea_orm_migration::MigratorTrait;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::cache::CacheService;
use crate::config::Config;
use crate::controllers::AppState;
use crate::engine::{Clock, PlanFeatures};
use crate::error::BastionError;
use crate::middleware::{identity_from_headers, require_route_access};
use crate::migrations::Migrator;
use crate::openapi::ApiDoc;
use crate::response::ApiResponse;
use crate::routing;

/// The bastion application: database, cache and HTTP surface.
pub struct App {
    pub config: Config,
    pub db: DatabaseConnection,
    pub cache: CacheService,
    plan_features: Option<Arc<dyn PlanFeatures>>,
    clock: Option<Arc<dyn Clock>>,
    api_docs_path: String,
}

impl App {
    /// Create the application from environment configuration.
    pub async fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Config::from_env()?;
        Self::with_config(config).await
    }

    /// Create the application with a given config. Pending migrations are
    /// applied on startup.
    pub async fn with_config(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let db = crate::db::connect(&config).await?;

        tracing::info!("Running pending database migrations...");
        Migrator::up(&db, None).await?;
        tracing::info!("Migrations complete.");

        let cache = Self::init_cache(&config).await;

        Ok(App {
            config,
            db,
            cache,
            plan_features: None,
            clock: None,
            api_docs_path: "/api-docs".to_string(),
        })
    }

    /// Initialize the cache backend based on config.
    async fn init_cache(config: &Config) -> CacheService {
        #[cfg(feature = "redis")]
        if let Some(ref redis_url) = config.redis_url {
            match crate::cache::RedisCache::new(redis_url).await {
                Ok(redis_cache) => {
                    tracing::info!("Redis cache connected");
                    return CacheService::new(redis_cache);
                }
                Err(e) => {
                    tracing::warn!(
                        "Redis connection failed, falling back to in-memory cache: {}",
                        e
                    );
                }
            }
        }
        #[cfg(not(feature = "redis"))]
        if config.redis_url.is_some() {
            tracing::warn!("REDIS_URL is set but the redis feature is disabled");
        }
        tracing::info!("Using in-memory cache");
        CacheService::in_memory()
    }

    /// Use `plans` for feature gating instead of the configured plan service.
    pub fn plan_features(mut self, plans: Arc<dyn PlanFeatures>) -> Self {
        self.plan_features = Some(plans);
        self
    }

    /// Evaluate time restrictions with `clock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Serve the API reference at `path` instead of `/api-docs`.
    pub fn api_docs(mut self, path: impl Into<String>) -> Self {
        self.api_docs_path = path.into();
        self
    }

    /// Build the shared handler state.
    pub fn state(&self) -> Result<AppState, BastionError> {
        let state = AppState::build(
            self.db.clone(),
            Arc::new(self.config.clone()),
            self.cache.clone(),
        )?;
        if self.plan_features.is_none() && self.clock.is_none() {
            return Ok(state);
        }

        let mut engine = (*state.engine).clone();
        if let Some(plans) = &self.plan_features {
            engine = engine.with_plan_features(plans.clone());
        }
        if let Some(clock) = &self.clock {
            engine = engine.with_clock(clock.clone());
        }
        Ok(state.with_engine(engine))
    }

    /// Build the axum router with docs, identity and route-access layers.
    pub fn router(&self) -> Result<Router, BastionError> {
        Ok(self.router_for(self.state()?))
    }

    /// [`router`](Self::router) over an existing state, so callers can keep
    /// using the same services the handlers see.
    pub fn router_for(&self, state: AppState) -> Router {
        let config = state.config.clone();
        let engine = state.engine.clone();

        let openapi_spec = ApiDoc::openapi();
        let openapi_json = openapi_spec.clone();
        let docs_path = self.api_docs_path.clone();
        let json_path = format!("{docs_path}/openapi.json");

        let x_request_id = axum::http::HeaderName::from_static("x-request-id");
        Router::new()
            .route("/", get(welcome))
            .route("/health", get(health))
            .merge(routing::build_routes().with_state(state))
            .merge(Scalar::with_url(docs_path, openapi_spec))
            .route(
                &json_path,
                get(move || {
                    let doc = openapi_json.clone();
                    async move { axum::Json(doc) }
                }),
            )
            .layer(from_fn(require_route_access))
            .layer(from_fn(identity_from_headers))
            .layer(axum::Extension(engine))
            .layer(axum::Extension(config))
            .layer(CorsLayer::permissive())
            .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
                    .on_request(DefaultOnRequest::new().level(tracing::Level::DEBUG))
                    .on_response(
                        DefaultOnResponse::new()
                            .level(tracing::Level::INFO)
                            .latency_unit(LatencyUnit::Millis),
                    ),
            )
            .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
    }

    /// Serve on an already-bound listener until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.router()?;
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;
        Ok(())
    }

    /// Bind the configured address and serve until Ctrl+C.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.config.server_addr();
        let listener = TcpListener::bind(&addr).await?;

        println!("\nBastion is running!");
        println!("   → Server:   http://{}", addr);
        println!("   → API docs: http://{}{}", addr, self.api_docs_path);
        println!();
        tracing::info!("Bastion server running on http://{}", addr);

        self.serve(listener, shutdown_signal()).await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down bastion server...");
}

#[derive(Serialize)]
struct WelcomeMessage {
    message: &'static str,
    docs: &'static str,
    status: &'static str,
}

/// Welcome page at `/`.
async fn welcome() -> impl IntoResponse {
    axum::Json(WelcomeMessage {
        message: "Bastion access control service",
        docs: "/api-docs",
        status: "running",
    })
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

async fn health() -> ApiResponse<Health> {
    ApiResponse::success(Health { status: "ok" })
}
