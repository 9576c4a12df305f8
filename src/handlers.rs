use crate::ping_log::PingLog;
use crate::render::render_text;
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{Body, Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::{debug, error};

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";

pub async fn handle_connection(stream: UnixStream, log: Arc<PingLog>, timeout: Duration) {
    let service = service_fn(move |req| {
        let log = log.clone();
        async move { route_request(req, log).await }
    });

    let connection = Http::new().serve_connection(stream, service);
    match tokio::time::timeout(timeout, connection).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("HTTP connection error: {}", e),
        Err(_) => debug!("HTTP connection closed after {:?}", timeout),
    }
}

pub async fn route_request(
    req: Request<Body>,
    log: Arc<PingLog>,
) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET {
        let mut response = respond(
            StatusCode::METHOD_NOT_ALLOWED,
            JSON,
            r#"{"error": "method not allowed"}"#,
        );
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("GET"));
        return Ok(response);
    }

    match req.uri().path() {
        "/json" => {
            let mut body = Vec::new();
            match log.serialize(&mut body) {
                Ok(()) => Ok(respond(StatusCode::OK, JSON, body)),
                Err(e) => {
                    error!("cannot encode ping log: {}", e);
                    Ok(respond(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        JSON,
                        r#"{"error": "encoding failed"}"#,
                    ))
                }
            }
        }
        "/" => {
            let snapshot = log.snapshot();
            Ok(respond(StatusCode::OK, TEXT, render_text(&snapshot)))
        }
        "/health" => {
            // Compile-time version and build hash, set with env! or option_env!
            let version = env!("CARGO_PKG_VERSION");
            let build = option_env!("GIT_COMMIT_HASH").unwrap_or("unknown");
            let json = serde_json::json!({
                "version": version,
                "build": build,
                "addresses": log.len(),
            });
            Ok(respond(StatusCode::OK, JSON, json.to_string()))
        }
        _ => Ok(respond(
            StatusCode::NOT_FOUND,
            JSON,
            r#"{"error": "not found"}"#,
        )),
    }
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PingSnapshot;
    use chrono::{TimeZone, Utc};

    fn sample_log() -> Arc<PingLog> {
        let log = Arc::new(PingLog::new(10));
        log.record(
            "10.0.0.1".parse().unwrap(),
            Utc.timestamp_opt(1_700_000_000, 500_000_000).unwrap(),
        );
        log
    }

    async fn get(path: &str, log: Arc<PingLog>) -> (StatusCode, String, String) {
        let req = Request::get(path).body(Body::empty()).unwrap();
        let response = route_request(req, log).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn json_view_matches_state_document() {
        let log = sample_log();
        let (status, content_type, body) = get("/json", log.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, JSON);
        let parsed: PingSnapshot = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed, log.snapshot());
    }

    #[tokio::test]
    async fn text_view_lists_observations() {
        let (status, content_type, body) = get("/", sample_log()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.starts_with("text/plain"));
        assert_eq!(
            body,
            "10.0.0.1:\n\t1700000000.500000 2023-11-14 22:13:20.500 +0000 UTC\n\n"
        );
    }

    #[tokio::test]
    async fn health_reports_version_and_size() {
        let (status, _, body) = get("/health", sample_log()).await;
        assert_eq!(status, StatusCode::OK);
        let health: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(health["addresses"], 1);
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let (status, _, _) = get("/pings", sample_log()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn writes_are_rejected() {
        let log = sample_log();
        let req = Request::post("/json").body(Body::from("{}")).unwrap();
        let response = route_request(req, log.clone()).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], "GET");
        assert_eq!(log.len(), 1);
    }
}
