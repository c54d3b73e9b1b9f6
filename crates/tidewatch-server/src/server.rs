//! `BootstrapServer`: binds first, then serves the bundle or the placeholder.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::build::{BuildRunner, spawn_build};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::placeholder::{placeholder_html, placeholder_response};
use crate::readiness::Readiness;

/// Shared state accessible from the fallback handler.
#[derive(Clone)]
pub struct AppState {
    /// Readiness flag, read per request.
    pub readiness: Readiness,
    /// Static file service with SPA fallback to the entry document.
    pub bundle: ServeDir<ServeFile>,
    /// Rendered placeholder page.
    pub placeholder: Arc<str>,
}

impl AppState {
    /// Build state for `config` around an existing readiness handle.
    pub fn new(config: &ServerConfig, readiness: Readiness) -> Self {
        let bundle = ServeDir::new(&config.bundle_dir).fallback(ServeFile::new(config.entry_path()));
        Self {
            readiness,
            bundle,
            placeholder: placeholder_html(config.reload_delay).into(),
        }
    }
}

/// Build the Axum router. Every path goes through [`serve_app`].
pub fn router(state: AppState) -> Router {
    Router::new()
        .fallback(serve_app)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Route to the bundle or the placeholder based on readiness *now*.
async fn serve_app(State(state): State<AppState>, req: Request) -> Response {
    if !state.readiness.is_ready() {
        return placeholder_response(&state.placeholder);
    }
    match state.bundle.oneshot(req).await {
        Ok(resp) => resp.into_response(),
        Err(never) => match never {},
    }
}

/// Handle returned by [`BootstrapServer::start`]. Keeps background tasks alive.
pub struct ServerHandle {
    local_addr: SocketAddr,
    readiness: Readiness,
    _server: JoinHandle<()>,
    _build: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Address actually bound (useful with port `0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Readiness handle shared with the request path.
    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }
}

/// The bootstrap server.
pub struct BootstrapServer;

impl BootstrapServer {
    /// Bind, decide readiness, kick off the build if needed, and serve.
    ///
    /// Only a bind failure is returned as an error; the build runs in the
    /// background and reports through the readiness flag.
    pub async fn start(
        config: ServerConfig,
        runner: Arc<dyn BuildRunner>,
    ) -> Result<ServerHandle, ServerError> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "bootstrap server listening");

        let entry_path = config.entry_path();
        let bundle_present = tokio::fs::try_exists(&entry_path).await.unwrap_or(false);

        let (readiness, build_task) = if bundle_present {
            info!(bundle = %config.bundle_dir.display(), "bundle found, serving app");
            (Readiness::ready(), None)
        } else {
            let readiness = Readiness::building();
            let task = match config.build.clone() {
                Some(build) => Some(spawn_build(
                    runner,
                    build,
                    readiness.clone(),
                    entry_path.clone(),
                )),
                None => {
                    warn!(
                        entry = %entry_path.display(),
                        "bundle missing and no build command configured, serving placeholder"
                    );
                    None
                }
            };
            (readiness, task)
        };

        let app = router(AppState::new(&config, readiness.clone()));
        let server_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "bootstrap server stopped");
            }
        });

        Ok(ServerHandle {
            local_addr,
            readiness,
            _server: server_task,
            _build: build_task,
        })
    }
}
