//! Gateway HTTP server: command routes, health check, graceful shutdown.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::exec::{CancelSignal, CommandExecutor, ExecOutcome, PreparedCommand, ProcessExecutor};
use crate::gateway::request;
use crate::gateway::response::{self, GatewayError};
use crate::invocation::{sanitize_args, Invocation};

/// Shared state for the gateway. Everything here is read-only after startup.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub executor: Arc<dyn CommandExecutor>,
    /// Fires on shutdown; running children are killed.
    pub cancel: CancelSignal,
}

/// Routes:
/// - `GET /` health
/// - `GET /{command}/{args...}?flag=value` run `command [--flag value] [args]`
/// - `POST /` run the JSON-described command
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http).post(post_handler))
        .route("/*path", get(get_handler))
        .with_state(state)
}

/// Run the gateway server; binds to `config.http`.
/// Fails when the whitelist is empty. Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config) -> Result<()> {
    config.validate()?;
    let listener = TcpListener::bind(&config.http)
        .await
        .with_context(|| format!("binding to {}", config.http))?;
    log::info!(
        "cligateway listening on {}; allowed commands: {:?}; response in {}",
        config.http,
        config.whitelist.commands(),
        config.response.as_str()
    );
    if config.timeout().is_none() {
        log::debug!("no execution timeout configured");
    }
    let executor = Arc::new(ProcessExecutor::new(config.timeout()).with_verbose(config.verbose));
    serve(listener, config, executor, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` completes; then cancel running commands
/// and drain connections.
pub async fn serve<F>(
    listener: TcpListener,
    config: Config,
    executor: Arc<dyn CommandExecutor>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (cancel_handle, cancel) = CancelSignal::channel();
    let state = GatewayState {
        config: Arc::new(config),
        executor,
        cancel,
    };
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            log::info!("shutdown signal received, cancelling running commands");
            cancel_handle.cancel();
        })
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// GET / returns a simple health JSON.
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "response": state.config.response.as_str(),
        "commands": state.config.whitelist.len(),
    }))
}

/// GET /{command}/{args...}?flag=value
async fn get_handler(
    State(state): State<GatewayState>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Response {
    let (Path(path), Query(query)) = match (path, query) {
        (Ok(path), Ok(query)) => (path, query),
        (Err(rej), _) => return bad_request(rej.body_text()),
        (_, Err(rej)) => return bad_request(rej.body_text()),
    };
    let path = path.strip_prefix('/').unwrap_or(&path);
    match request::from_get(path, &query) {
        Ok(inv) => run(&state, inv).await,
        Err(e) => e.into_response(),
    }
}

/// POST / with `{command, flags, args, envs}`.
async fn post_handler(
    State(state): State<GatewayState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rej) => return bad_request(rej.body_text()),
    };
    match request::from_post(&body) {
        Ok(inv) => run(&state, inv).await,
        Err(e) => e.into_response(),
    }
}

/// Extractor rejections answer with the same `{"error": ...}` body as every other failure.
fn bad_request(reason: String) -> Response {
    log::debug!("rejected request: {}", reason);
    GatewayError::BadRequest(reason).into_response()
}

/// Whitelist check, sanitize, execute, format. No process is spawned for a rejected command.
pub async fn run(state: &GatewayState, inv: Invocation) -> Response {
    let config = &state.config;
    let opts = config.arg_options();
    if inv.command.is_empty() {
        return GatewayError::BadRequest("no command given".to_string()).into_response();
    }
    let args = inv.full_args(opts);
    if !config.whitelist.is_allowed(&inv.command) {
        if config.verbose {
            log::info!(
                "run {} forbidden: not in whitelist, args={:?}",
                inv.command,
                args
            );
        }
        return GatewayError::Forbidden.into_response();
    }

    let cmd = PreparedCommand {
        args: sanitize_args(args),
        env: inv.env_strings(opts),
        program: inv.command,
    };
    log::info!("running {}: args={:?}", cmd.program, cmd.args);
    if config.verbose {
        log::info!("env for {}: {:?}", cmd.program, cmd.env);
    }

    let program = cmd.program.clone();
    let args = cmd.args.clone();
    let outcome = state
        .executor
        .execute(cmd, config.response.capture_mode(), state.cancel.clone())
        .await;
    if let ExecOutcome::Failure { reason } = &outcome {
        log::warn!("run {:?} failed: args={:?} error={:?}", program, args, reason);
    }
    response::format_outcome(outcome, config.response)
}
