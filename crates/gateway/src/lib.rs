#![forbid(unsafe_code)]

//! The local RPC endpoint: TLS JSON-RPC 2.0 on loopback.
//!
//! The browser UI speaks the same method table the consensus topics use;
//! every method except the sign-up path requires the `renderhive-session`
//! cookie minted at sign-in.

pub mod dispatch;
mod tls;

pub use dispatch::{dispatch, GatewayContext};

use renderhive_types::command::{JsonRpcRequest, JsonRpcResponse, RequestId};
use renderhive_types::config::RpcConfig;
use renderhive_types::error::{ConfigError, CoreError};
use renderhive_types::paths;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use warp::http::header::{HeaderValue, SET_COOKIE};
use warp::hyper::body::Bytes;
use warp::{Filter, Reply};

/// Runs the endpoint until the quit broadcast fires.
pub async fn run_server(
    rpc: &RpcConfig,
    config_dir: &Path,
    ctx: Arc<GatewayContext>,
    mut quit: watch::Receiver<bool>,
) -> Result<(), CoreError> {
    let (cert_path, key_path) = tls::resolve_certificate(rpc, config_dir)?;
    let timeout = Duration::from_secs(rpc.request_timeout_secs);

    let ctx_filter = warp::any().map(move || ctx.clone());
    let route = warp::post()
        .and(warp::path::end())
        .and(warp::body::content_length_limit(rpc.body_limit_kib * 1024))
        .and(warp::body::bytes())
        .and(warp::header::optional::<String>("cookie"))
        .and(ctx_filter)
        .then(move |body, cookie, ctx| handle(body, cookie, ctx, timeout));

    let addr: SocketAddr = format!("{}:{}", rpc.bind_address, rpc.port)
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("rpc bind address: {e}")))?;

    let shutdown = async move {
        if !*quit.borrow_and_update() {
            let _ = quit.changed().await;
        }
    };
    let (bound, server) = warp::serve(route)
        .tls()
        .cert_path(&cert_path)
        .key_path(&key_path)
        .bind_with_graceful_shutdown(addr, shutdown);
    tracing::info!(target: "gateway", %bound, "local RPC endpoint listening");
    server.await;
    tracing::info!(target: "gateway", "local RPC endpoint stopped");
    Ok(())
}

async fn handle(
    body: Bytes,
    cookie_header: Option<String>,
    ctx: Arc<GatewayContext>,
    timeout: Duration,
) -> warp::reply::Response {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return warp::reply::json(&JsonRpcResponse::failure(
                RequestId::Number(-1),
                -32700,
                format!("parse error: {e}"),
            ))
            .into_response();
        }
    };
    let id = request.id.clone();
    let session_cookie = cookie_header.as_deref().and_then(session_cookie_value);

    let outcome = tokio::time::timeout(
        timeout,
        dispatch(&ctx, request, session_cookie.as_deref()),
    )
    .await;
    match outcome {
        Ok((response, set_cookie)) => {
            let mut reply = warp::reply::json(&response).into_response();
            if let Some(token) = set_cookie {
                let header = format!(
                    "{}={token}; Path=/; Secure; HttpOnly; SameSite=Strict",
                    paths::SESSION_COOKIE_NAME
                );
                if let Ok(value) = HeaderValue::from_str(&header) {
                    reply.headers_mut().insert(SET_COOKIE, value);
                }
            }
            reply
        }
        Err(_) => warp::reply::json(&JsonRpcResponse::failure(
            id,
            -32000,
            "request timed out",
        ))
        .into_response(),
    }
}

/// Extracts the session cookie value from a `Cookie` header.
fn session_cookie_value(header: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == paths::SESSION_COOKIE_NAME).then(|| value.to_owned())
    })
}

#[cfg(test)]
mod header_tests {
    use super::session_cookie_value;

    #[test]
    fn cookie_extraction() {
        assert_eq!(
            session_cookie_value("renderhive-session=abc.def; other=1"),
            Some("abc.def".to_owned())
        );
        assert_eq!(
            session_cookie_value("other=1; renderhive-session=tok"),
            Some("tok".to_owned())
        );
        assert_eq!(session_cookie_value("other=1"), None);
        assert_eq!(session_cookie_value(""), None);
    }
}
