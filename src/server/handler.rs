// src/server/handler.rs
use crate::health::{AggregateResult, CheckCategory, HealthRegistry};
use crate::metrics::MetricsRegistry;
use chrono::{SecondsFormat, Utc};
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tower::Service;
use uuid::Uuid;

pub const HEALTH_PATH: &str = "/health";
pub const READY_PATH: &str = "/ready";
pub const METRICS_PATH: &str = "/metrics";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const JSON: &str = "application/json";
const ENCODE_FAILURE: &str = r#"{"status":"error","message":"failed to encode response"}"#;

/// Serves the registry's two categories over HTTP.
///
/// `/health` is informational and always answers 200; `/ready` answers 503
/// whenever any readiness check fails.
#[derive(Clone)]
pub struct HealthService {
    registry: Arc<HealthRegistry>,
    metrics: Option<Arc<MetricsRegistry>>,
}

#[derive(Serialize)]
struct ServiceInfo<'a> {
    service: &'a str,
    version: &'a str,
    endpoints: Vec<&'a str>,
    timestamp: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: &'a str,
    message: &'a str,
}

impl HealthService {
    pub fn new(registry: Arc<HealthRegistry>) -> Self {
        Self {
            registry,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let start = Instant::now();
        let request_id = Uuid::new_v4();
        let method = req.method().clone();
        let path = req.uri().path().to_owned();

        let mut response = self.route(&method, &path).await;

        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }

        let status = response.status();
        let elapsed = start.elapsed();
        tracing::info!(
            %request_id,
            %method,
            %path,
            status = status.as_u16(),
            ?elapsed,
            "request"
        );

        if let Some(metrics) = &self.metrics {
            metrics
                .collector()
                .record_request(method.as_str(), metric_path(&path), status.as_u16(), elapsed);
        }

        response
    }

    async fn route(&self, method: &Method, path: &str) -> Response<Body> {
        let known = matches!(path, "/" | HEALTH_PATH | READY_PATH | METRICS_PATH);
        if known && *method != Method::GET && *method != Method::HEAD {
            let mut response = error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
            return response;
        }

        match path {
            HEALTH_PATH => self.liveness().await,
            READY_PATH => self.readiness().await,
            METRICS_PATH => self.metrics(),
            "/" => self.root(),
            _ => error_response(StatusCode::NOT_FOUND, "not found"),
        }
    }

    async fn liveness(&self) -> Response<Body> {
        let result = self.registry.evaluate(CheckCategory::Liveness).await;
        aggregate_response(&result, StatusCode::OK)
    }

    async fn readiness(&self) -> Response<Body> {
        let result = self.registry.evaluate(CheckCategory::Readiness).await;
        let status = if result.is_healthy() {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        aggregate_response(&result, status)
    }

    fn metrics(&self) -> Response<Body> {
        let Some(metrics) = &self.metrics else {
            return error_response(StatusCode::NOT_FOUND, "metrics disabled");
        };

        match metrics.gather() {
            Ok(buffer) => {
                let mut response = Response::new(Body::from(buffer));
                if let Ok(value) = HeaderValue::from_str(&metrics.content_type()) {
                    response.headers_mut().insert(CONTENT_TYPE, value);
                }
                response
            }
            Err(err) => {
                tracing::error!(%err, "failed to encode metrics");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics")
            }
        }
    }

    fn root(&self) -> Response<Body> {
        let identity = self.registry.identity();
        let mut endpoints = vec![HEALTH_PATH, READY_PATH];
        if self.metrics.is_some() {
            endpoints.push(METRICS_PATH);
        }
        let info = ServiceInfo {
            service: &identity.name,
            version: &identity.version,
            endpoints,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        json_response(&info, StatusCode::OK)
    }
}

impl Service<Request<Body>> for HealthService {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}

/// Unknown paths collapse to one label so clients cannot blow up cardinality.
fn metric_path(path: &str) -> &str {
    match path {
        "/" | HEALTH_PATH | READY_PATH | METRICS_PATH => path,
        _ => "other",
    }
}

fn aggregate_response(result: &AggregateResult, status: StatusCode) -> Response<Body> {
    json_response(result, status)
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    json_response(
        &ErrorBody {
            status: "error",
            message,
        },
        status,
    )
}

fn json_response<T: Serialize>(value: &T, status: StatusCode) -> Response<Body> {
    let (status, body) = match serde_json::to_vec(value) {
        Ok(body) => (status, Body::from(body)),
        Err(err) => {
            tracing::error!(%err, "failed to encode response");
            (StatusCode::INTERNAL_SERVER_ERROR, Body::from(ENCODE_FAILURE))
        }
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
    response
}
