//! Minimal `/metrics` HTTP endpoint.
//!
//! Grounded on the teacher's `hyper::Server::from_tcp(...).serve(...)`
//! startup in `bin/pageserver.rs`, scaled down to a single handler: this
//! crate has no management API surface to route, only metrics to expose.

use std::convert::Infallible;
use std::net::SocketAddr;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::info;

async fn handle(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.uri().path() == "/metrics" {
        Ok(Response::new(Body::from(metrics::gather_to_string())))
    } else {
        Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap())
    }
}

/// Serves `/metrics` on `addr` until `cancel` fires.
pub async fn serve(addr: SocketAddr, cancel: CancellationToken) -> anyhow::Result<()> {
    let make_svc = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle)) });
    let server = Server::try_bind(&addr)?.serve(make_svc);
    info!(%addr, "metrics endpoint listening");
    server
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
