use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{AppError, AppResult, CompileError};
use crate::service::CompileService;

#[derive(Debug, Deserialize)]
struct CompileForm {
    #[serde(default)]
    code: String,
}

pub fn router(service: Arc<CompileService>) -> Router {
    Router::new()
        .route("/compile", post(compile))
        .route("/healthz", get(healthz))
        .with_state(service)
}

/// Serve until Ctrl-C or `SIGTERM`, then let in-flight requests finish.
pub async fn serve(listen: SocketAddr, service: Arc<CompileService>) -> AppResult<()> {
    let listener = TcpListener::bind(listen)
        .await
        .map_err(|e| AppError::Server(format!("bind {listen}: {e}")))?;
    info!(listen = %listen, "http server listening");

    axum::serve(
        listener,
        router(service).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| AppError::Server(e.to_string()))?;

    info!("http server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn compile(
    State(service): State<Arc<CompileService>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Form(form): Form<CompileForm>,
) -> Response {
    if form.code.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "code is required").into_response();
    }
    let identity = client_ip(&headers, peer);
    // Detached so a client disconnect cannot drop the sandbox lifecycle
    // half-way; the submission always runs to teardown and history.
    let task = tokio::spawn(async move { service.submit(&form.code, &identity).await });
    let submission = match task.await {
        Ok(submission) => submission,
        Err(e) => {
            error!(error = %e, "submission task failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "error: internal failure")
                .into_response();
        }
    };
    match submission.result {
        Ok(()) => (StatusCode::OK, submission.output).into_response(),
        Err(CompileError::RateLimited) => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, HeaderValue::from_static("1"))],
            CompileError::RateLimited.to_string(),
        )
            .into_response(),
        Err(e @ CompileError::TooLong { .. }) => {
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => {
            let mut body = format!("error: {e}");
            if !submission.output.is_empty() {
                body.push_str("\n\n");
                body.push_str(&submission.output);
            }
            (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
        }
    }
}

/// Requester identity: first `X-Forwarded-For` entry, then `X-Real-IP`,
/// then the peer address.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    if let Some(first) = header_value("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real_ip) = header_value("x-real-ip") {
        return real_ip.to_string();
    }
    peer.ip().to_string()
}
