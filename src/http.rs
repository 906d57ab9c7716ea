//! HTTP admission layer.
//!
//! Wrap any axum router or tower service with [`RateLimitLayer`]: each request
//! is evaluated once, keyed by the peer IP address (port stripped), before it
//! reaches the inner service. Limited requests get `429 Too Many Requests`
//! and never reach the handler.

use axum::{
    extract::ConnectInfo,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};
use std::{
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::debug;

use crate::service::RateLimitService;

/// Identifier used when the peer address is not available
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Caller identifier for a request: the peer IP without its port.
///
/// Requires the server to be started with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn client_identifier<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn too_many_requests() -> Response {
    (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response()
}

/// Layer that rejects rate limited callers before the inner service runs
#[derive(Clone)]
pub struct RateLimitLayer {
    service: Arc<RateLimitService>,
}

impl RateLimitLayer {
    pub fn new(service: Arc<RateLimitService>) -> Self {
        Self { service }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimit<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimit {
            inner,
            service: self.service.clone(),
        }
    }
}

/// Service produced by [`RateLimitLayer`]
#[derive(Clone)]
pub struct RateLimit<S> {
    inner: S,
    service: Arc<RateLimitService>,
}

impl<S, B> Service<Request<B>> for RateLimit<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        // The clone is not guaranteed to be ready; keep the one that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let service = self.service.clone();

        Box::pin(async move {
            let identifier = client_identifier(&request);
            if service.check(&identifier).await.is_limited() {
                debug!(identifier = %identifier, "rejecting rate limited request");
                return Ok(too_many_requests());
            }

            inner.call(request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        limiter::{Decision, Limiter},
        metrics::Metrics,
    };
    use async_trait::async_trait;
    use axum::{body::Body, routing::get, Router};
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Limiter with a fixed answer that remembers who asked
    struct FixedLimiter {
        decision: Decision,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Limiter for FixedLimiter {
        async fn evaluate(&self, identifier: &str) -> Decision {
            self.seen.lock().unwrap().push(identifier.to_string());
            self.decision
        }
    }

    fn app(decision: Decision) -> (Router, Arc<FixedLimiter>) {
        let limiter = Arc::new(FixedLimiter {
            decision,
            seen: Mutex::new(Vec::new()),
        });
        let service = Arc::new(RateLimitService::new(
            limiter.clone(),
            Arc::new(Metrics::new().unwrap()),
        ));

        let router = Router::new()
            .route("/", get(|| async { StatusCode::CREATED }))
            .layer(RateLimitLayer::new(service));
        (router, limiter)
    }

    fn request_from(addr: &str) -> Request<Body> {
        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let addr: SocketAddr = addr.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    #[tokio::test]
    async fn test_calls_next_when_not_limited() {
        let (app, _) = app(Decision::NotLimited);
        let response = app.oneshot(request_from("127.0.0.1:22826")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_rejects_when_limited() {
        let (app, _) = app(Decision::Limited);
        let response = app.oneshot(request_from("127.0.0.1:22826")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_passes_only_ip_to_limiter() {
        let (app, limiter) = app(Decision::Limited);
        app.clone()
            .oneshot(request_from("127.0.0.1:22826"))
            .await
            .unwrap();
        app.oneshot(request_from("[2001:db8::1]:443")).await.unwrap();

        assert_eq!(
            *limiter.seen.lock().unwrap(),
            vec!["127.0.0.1".to_string(), "2001:db8::1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_peer_address() {
        let (app, limiter) = app(Decision::NotLimited);
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        app.oneshot(request).await.unwrap();

        assert_eq!(*limiter.seen.lock().unwrap(), vec![UNKNOWN_CLIENT.to_string()]);
    }
}
