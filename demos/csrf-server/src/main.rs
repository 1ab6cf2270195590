//! CSRF-protected RPC surface
//!
//! Serves the token endpoint and a stub `/api/trpc/*` surface behind the
//! double-submit layer.
//!
//! ```text
//! ESTATE_ADDR=127.0.0.1:8080 RUST_LOG=debug cargo run -p estate-csrf-demo
//!
//! curl -c jar -b jar http://127.0.0.1:8080/csrf-token
//! curl -b jar -X POST http://127.0.0.1:8080/api/trpc/listing.create           # 403 CSRF_TOKEN_MISSING
//! curl -b jar -X POST -H "x-csrf-token: <token>" \
//!      http://127.0.0.1:8080/api/trpc/listing.create                          # 200
//! ```

use bytes::Bytes;
use estate_csrf::{token_response, CsrfConfig, CsrfLayer};
use http::{header, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower::{Layer, ServiceExt};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = CsrfConfig::from_env()?;
    let config = Arc::new(config);

    let addr: SocketAddr = std::env::var("ESTATE_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!(
        guarded = %config.guarded_prefix,
        token_path = %config.token_path,
        exempt = config.exempt_operations.len(),
        "Listening on http://{}",
        addr
    );

    let layer = CsrfLayer::new((*config).clone());

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let config = config.clone();
        let app = layer.layer(tower::service_fn(move |req: Request<Incoming>| {
            let config = config.clone();
            async move { Ok::<_, Infallible>(route(&req, &config)) }
        }));

        tokio::spawn(async move {
            let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                let method = req.method().clone();
                let path = req.uri().path().to_string();
                let start = Instant::now();
                let app = app.clone();
                async move {
                    let response = app.oneshot(req).await?;
                    log_request(&method, &path, response.status(), start);
                    Ok::<_, Infallible>(response)
                }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("Connection error: {}", err);
            }
        });
    }
}

fn route(req: &Request<Incoming>, config: &CsrfConfig) -> Response<Full<Bytes>> {
    let path = req.uri().path();

    if path == config.token_path {
        return token_response(req, config);
    }

    if let Some(procedure) = path.strip_prefix(config.guarded_prefix.as_str()) {
        let body = serde_json::json!({
            "result": { "data": { "procedure": procedure, "ok": true } }
        });
        return json(StatusCode::OK, &body);
    }

    if path == "/health" {
        return json(StatusCode::OK, &serde_json::json!({ "status": "ok" }));
    }

    json(
        StatusCode::NOT_FOUND,
        &serde_json::json!({ "error": { "message": "Not found", "code": "NOT_FOUND" } }),
    )
}

fn json(status: StatusCode, value: &serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(value.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}

fn log_request(method: &http::Method, path: &str, status: StatusCode, start: Instant) {
    let elapsed = start.elapsed();

    if status.is_success() {
        info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = elapsed.as_millis() as u64,
            "Request completed"
        );
    } else {
        warn!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = elapsed.as_millis() as u64,
            "Request failed"
        );
    }
}
