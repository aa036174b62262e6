use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HOST};
use hyper::{Method, Request, Response, StatusCode, Uri};
use serde::Serialize;

use crate::replica::Replica;

/// Request metadata echoed back to the caller, tagged with the identity of
/// the replica that served it. Built fresh per request, never stored.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaResponse {
    pub message: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub replica_id: u32,
    pub host: String,
}

impl ReplicaResponse {
    pub fn new(replica_id: u32, uri: &Uri, headers: &HeaderMap) -> Self {
        let mut echoed: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in headers {
            echoed
                .entry(name.as_str().to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
        let host = headers
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        ReplicaResponse {
            message: format!("Response to URI '{uri}' from Replica #{replica_id}"),
            headers: echoed,
            replica_id,
            host,
        }
    }
}

/// Entry point for every request. Routes to a handler and recovers from
/// handler panics with a generic 500 so a single bad request never takes
/// the listener down.
pub async fn handle_request(
    replica: Arc<Replica>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    let method = req.method().clone();
    let uri = req.uri().clone();

    let response = match AssertUnwindSafe(route(replica.clone(), req))
        .catch_unwind()
        .await
    {
        Ok(response) => response,
        Err(_) => {
            tracing::error!(replica = replica.id, %method, %uri, "handler panicked");
            internal_error()
        }
    };

    if let Ok(response) = &response {
        tracing::info!(
            replica = replica.id,
            %method,
            %uri,
            status = %response.status(),
            "request handled"
        );
    }
    response
}

async fn route(
    replica: Arc<Replica>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/health") | (&Method::POST, "/health") => health(),
        (&Method::GET, "/delayed") | (&Method::POST, "/delayed") => delayed(replica, req).await,
        (&Method::GET, path) if is_echo_path(path) => {
            echo(ReplicaResponse::new(replica.id, req.uri(), req.headers()))
        }
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))?),
    }
}

/// Always immediate, regardless of any posted body. Health checks must not
/// be affected by the delay machinery.
fn health() -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    let body = serde_json::json!({ "active": true }).to_string();
    json_response(body)
}

/// Waits before answering to simulate a slow backend, then echoes like the
/// plain handler. The wait suspends cooperatively, so the client observes
/// the full latency while the runtime stays free to serve other requests.
async fn delayed(
    replica: Arc<Replica>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    let (parts, body) = req.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };

    let secs = resolve_delay(&bytes, replica.default_delay_secs, replica.max_delay_secs);
    if secs > 0 {
        tracing::info!(replica = replica.id, secs, "starting wait");
        tokio::time::sleep(Duration::from_secs(secs)).await;
        tracing::info!(replica = replica.id, "ending wait");
    }

    echo(ReplicaResponse::new(replica.id, &parts.uri, &parts.headers))
}

/// Picks the wait duration for a delayed request. An override from the
/// request body applies only when it is an integer in `1..=max_secs`;
/// anything else, including an unparsable body, silently falls back to
/// the default. Malformed input never produces a 4xx here.
fn resolve_delay(body: &[u8], default_secs: u64, max_secs: u64) -> u64 {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return default_secs;
    };
    match value.get("delay").and_then(|delay| delay.as_u64()) {
        Some(secs) if secs > 0 && secs <= max_secs => secs,
        _ => default_secs,
    }
}

/// `/` and any single-segment path echo; deeper paths fall through to 404.
fn is_echo_path(path: &str) -> bool {
    match path.strip_prefix('/') {
        Some(rest) => !rest.contains('/'),
        None => false,
    }
}

fn echo(payload: ReplicaResponse) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    match serde_json::to_string(&payload) {
        Ok(body) => json_response(body),
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize response body");
            internal_error()
        }
    }
}

fn json_response(body: String) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
}

fn internal_error() -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .body(Full::new(Bytes::from("Internal Server Error")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    #[test]
    fn delay_override_in_range() {
        assert_eq!(resolve_delay(br#"{"delay": 5}"#, 0, 20), 5);
        assert_eq!(resolve_delay(br#"{"delay": 20}"#, 0, 20), 20);
        assert_eq!(resolve_delay(br#"{"delay": 1}"#, 20, 20), 1);
    }

    #[test]
    fn delay_out_of_range_uses_default() {
        assert_eq!(resolve_delay(br#"{"delay": 25}"#, 20, 20), 20);
        assert_eq!(resolve_delay(br#"{"delay": 0}"#, 20, 20), 20);
        assert_eq!(resolve_delay(br#"{"delay": -3}"#, 20, 20), 20);
    }

    #[test]
    fn delay_malformed_body_uses_default() {
        assert_eq!(resolve_delay(b"", 20, 20), 20);
        assert_eq!(resolve_delay(b"not json", 20, 20), 20);
        assert_eq!(resolve_delay(br#"{"delay": "soon"}"#, 20, 20), 20);
        assert_eq!(resolve_delay(br#"{"wait": 5}"#, 20, 20), 20);
    }

    #[test]
    fn echo_paths() {
        assert!(is_echo_path("/"));
        assert!(is_echo_path("/anything"));
        assert!(is_echo_path("/favicon.ico"));
        assert!(!is_echo_path("/a/b"));
        assert!(!is_echo_path("no-slash"));
    }

    #[test]
    fn response_payload_shape() {
        let uri: Uri = "/widgets?q=1".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("localhost:8081"));
        headers.append("x-test", HeaderValue::from_static("a"));
        headers.append("x-test", HeaderValue::from_static("b"));

        let payload = ReplicaResponse::new(3, &uri, &headers);
        assert_eq!(
            payload.message,
            "Response to URI '/widgets?q=1' from Replica #3"
        );
        assert_eq!(payload.replica_id, 3);
        assert_eq!(payload.host, "localhost:8081");
        assert_eq!(
            payload.headers.get("x-test"),
            Some(&vec!["a".to_string(), "b".to_string()])
        );

        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("replicaId").is_some());
        assert_eq!(json["host"], "localhost:8081");
    }
}
