//! HTTP host for the Spica check engine
//!
//! Translates hyper requests into the engine's abstract request shape and
//! writes the abstract response back as JSON. Everything else (routing,
//! binding, execution, sensors) lives in `spica_core`.

#![allow(unused_crate_dependencies)]

pub mod config;
pub mod error;

pub use error::{HostError, Result};

use hyper::header::CONTENT_TYPE;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use spica_core::{params, Engine, EngineRequest, RequestMethod};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// The HTTP host wrapping one engine
pub struct Host {
    engine: Arc<Engine>,
    addr: SocketAddr,
}

impl Host {
    /// Create a host serving the given engine on the given address
    #[must_use]
    pub fn new(engine: Engine, addr: SocketAddr) -> Self {
        Self {
            engine: Arc::new(engine),
            addr,
        }
    }

    /// Bind the listener, returning the bound address and the serving
    /// future. Binding eagerly lets callers use port 0 and learn the real
    /// port before driving the server.
    ///
    /// # Errors
    /// Returns an error if the address cannot be bound.
    pub fn bind(self) -> Result<(SocketAddr, impl Future<Output = Result<()>>)> {
        let engine = self.engine;
        let make_svc = make_service_fn(move |_conn| {
            let engine = engine.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| handle(engine.clone(), req)))
            }
        });
        let server = Server::try_bind(&self.addr)
            .map_err(|e| HostError::Server(format!("Failed to bind to {}: {}", self.addr, e)))?
            .serve(make_svc);
        let addr = server.local_addr();
        info!("Listening on http://{}", addr);
        Ok((addr, async move {
            server
                .await
                .map_err(|e| HostError::Server(e.to_string()))
        }))
    }

    /// Serve until the shutdown future resolves
    ///
    /// # Errors
    /// Returns an error if the address cannot be bound or the server fails.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let engine = self.engine;
        let make_svc = make_service_fn(move |_conn| {
            let engine = engine.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| handle(engine.clone(), req)))
            }
        });
        let server = Server::try_bind(&self.addr)
            .map_err(|e| HostError::Server(format!("Failed to bind to {}: {}", self.addr, e)))?
            .serve(make_svc);
        info!("Listening on http://{}", server.local_addr());
        server
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| HostError::Server(e.to_string()))
    }
}

async fn handle(
    engine: Arc<Engine>,
    req: Request<Body>,
) -> std::result::Result<Response<Body>, Infallible> {
    let method = match *req.method() {
        Method::GET => RequestMethod::Get,
        Method::POST => RequestMethod::Post,
        _ => {
            return Ok(json_response(
                StatusCode::METHOD_NOT_ALLOWED,
                &serde_json::json!({ "Message": "Method not allowed" }),
            ))
        }
    };
    let request = EngineRequest {
        method,
        path: req.uri().path().to_string(),
        query: params::parse_query(req.uri().query().unwrap_or("")),
    };
    let response = engine.dispatch(request).await;
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Ok(json_response(status, &response.body))
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Body> {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .unwrap_or_else(|_| {
            let mut fallback = Response::new(Body::empty());
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_response_sets_content_type() {
        let response = json_response(StatusCode::OK, &serde_json::json!({"ok": true}));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
