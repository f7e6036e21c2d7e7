//! HTTP surface
//!
//! `POST /lg` runs a diagnostic, `GET /` identifies the service and, when
//! enabled, `/files/*` serves static files. Every route goes through the
//! per-client rate limiter, CORS and request tracing.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Request as HttpRequest, State},
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, StatusCode,
    },
    middleware::{self, Next},
    response::{IntoResponse, Json, Response as HttpResponse},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

use crate::config::{ConfigError, ConfigLookup, Settings};
use crate::dispatch::{Dispatcher, Response};
use crate::executor::CommandExecutor;
use crate::rate_limit::RateLimiter;

const PROJECT_URL: &str = "https://github.com/ccatss/smoked";
const CORS_MAX_AGE: Duration = Duration::from_secs(300);

/// HTTP-layer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    pub listen: SocketAddr,
    pub rate_limit: u32,
    pub rate_timeframe: Duration,
    /// Empty allows any origin.
    pub cors_origin: String,
    /// Root for `/files/*`, when file serving is on.
    pub files_root: Option<PathBuf>,
}

impl ServerOptions {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let raw_listen = settings.get_string("server.listen");
        let listen = raw_listen
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: "server.listen".into(),
                value: raw_listen.clone(),
                expected: "a socket address such as 0.0.0.0:8080",
            })?;
        let rate_limit = settings.get_u64("rate.limit")?;
        let rate_limit = u32::try_from(rate_limit).map_err(|_| ConfigError::InvalidValue {
            key: "rate.limit".into(),
            value: rate_limit.to_string(),
            expected: "a request count below 2^32",
        })?;

        Ok(Self {
            listen,
            rate_limit,
            rate_timeframe: settings.get_duration("rate.timeframe")?,
            cors_origin: settings.get_string("cors.origin"),
            files_root: settings
                .feature_enabled("files")
                .then(|| PathBuf::from(settings.get_string("feature.files.path"))),
        })
    }
}

struct AppState<E> {
    dispatcher: Arc<Dispatcher<E>>,
}

impl<E> Clone for AppState<E> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
        }
    }
}

/// Build the full application router.
pub fn router<E>(
    dispatcher: Arc<Dispatcher<E>>,
    options: &ServerOptions,
) -> Result<Router, ConfigError>
where
    E: CommandExecutor + 'static,
{
    let mut app = Router::new()
        .route("/", get(index))
        .route("/lg", post(looking_glass::<E>))
        .with_state(AppState { dispatcher });

    if let Some(root) = &options.files_root {
        info!("Enabling file server at {}", root.display());
        app = app.nest_service("/files", ServeDir::new(root));
    }

    let limiter = Arc::new(RateLimiter::new(options.rate_limit, options.rate_timeframe));
    if !limiter.is_enabled() {
        warn!("Rate limiting disabled");
    }

    Ok(app
        .layer(middleware::from_fn_with_state(limiter, rate_limit))
        .layer(cors_layer(&options.cors_origin)?)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        ))
}

/// Serve until ctrl-c.
pub async fn serve(listener: tokio::net::TcpListener, app: Router) -> std::io::Result<()> {
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

fn cors_layer(origin: &str) -> Result<CorsLayer, ConfigError> {
    let allow_origin = if origin.is_empty() || origin == "*" {
        AllowOrigin::any()
    } else {
        let value = HeaderValue::from_str(origin).map_err(|_| ConfigError::InvalidValue {
            key: "cors.origin".into(),
            value: origin.to_string(),
            expected: "an origin such as https://lg.example.com",
        })?;
        AllowOrigin::exact(value)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            HeaderName::from_static("x-requested-with"),
        ])
        .allow_credentials(false)
        .max_age(CORS_MAX_AGE))
}

// --- Handlers ---

async fn index() -> Json<Value> {
    Json(json!({ "message": PROJECT_URL }))
}

/// The body is decoded by the dispatcher so that malformed JSON comes back
/// as an ordinary error response.
async fn looking_glass<E: CommandExecutor + 'static>(
    State(state): State<AppState<E>>,
    body: Bytes,
) -> Json<Response> {
    Json(state.dispatcher.handle_json(&body).await)
}

async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: HttpRequest,
    next: Next,
) -> HttpResponse {
    let client = client_ip(&request);
    if limiter.check(&client) {
        next.run(request).await
    } else {
        warn!("Rate limit exceeded for {client}");
        (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response()
    }
}

/// Client address: proxy headers first, then the socket peer.
fn client_ip(request: &HttpRequest) -> String {
    let headers = request.headers();
    let from_header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    from_header("true-client-ip")
        .or_else(|| from_header("x-real-ip"))
        .or_else(|| from_header("x-forwarded-for"))
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}
