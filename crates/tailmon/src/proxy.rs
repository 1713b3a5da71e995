//! Single-path reverse proxy for one exporter.
//!
//! Only `/metrics` is forwarded to the exporter on localhost. Every other
//! path returns 404 with the node's display name as the body, which makes
//! a plain `curl` against the node a cheap liveness check. Accept and
//! reject decisions are logged; operators watch that stream.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{HeaderMap, HeaderName, CONTENT_LENGTH, HOST};
use hyper::{Request, Response, StatusCode};
use tracing::{info, warn};

/// The one path the proxy forwards.
pub const METRICS_PATH: &str = "/metrics";

/// Reverse proxy filter wrapping one upstream exporter.
pub struct MetricsProxy {
    upstream: String,
    name: String,
    client: reqwest::Client,
}

impl MetricsProxy {
    /// Create a proxy targeting `upstream` (e.g. `http://localhost:9100`),
    /// identified as `name` in rejection bodies.
    #[must_use]
    pub fn new(upstream: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
            name: name.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Serve one request: forward `/metrics`, reject everything else.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body + Send,
        B::Data: Send,
    {
        let path = req.uri().path();
        if path == METRICS_PATH {
            info!(path, "accept");
            self.forward(req).await
        } else {
            info!(path, "reject");
            let mut resp = Response::new(Full::new(Bytes::from(format!("{}\n", self.name))));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            resp
        }
    }

    /// Forward the request to the upstream exporter and mirror its
    /// response. End-to-end headers pass through in both directions so
    /// content negotiation (notably the scraper's `Accept` line) reaches
    /// the exporter untouched; hop-by-hop headers belong to each
    /// connection and are stripped.
    async fn forward<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body + Send,
        B::Data: Send,
    {
        let (parts, body) = req.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map_or(METRICS_PATH, |pq| pq.as_str());
        let url = format!("{}{path_and_query}", self.upstream);

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => {
                return plain_response(
                    StatusCode::BAD_REQUEST,
                    Bytes::from_static(b"failed to read request body\n"),
                );
            }
        };

        match self
            .client
            .request(parts.method.clone(), url)
            .headers(forward_headers(&parts.headers))
            .body(body.to_vec())
            .send()
            .await
        {
            Ok(resp) => {
                let status = resp.status();
                let headers = forward_headers(resp.headers());
                let body = resp.bytes().await.unwrap_or_default();

                let mut out = Response::new(Full::new(body));
                *out.status_mut() = status;
                *out.headers_mut() = headers;
                out
            }
            Err(e) => {
                warn!(upstream = %self.upstream, error = %e, "upstream request failed");
                plain_response(
                    StatusCode::BAD_GATEWAY,
                    Bytes::from(format!("upstream unavailable: {e}\n")),
                )
            }
        }
    }
}

/// Hop-by-hop headers per RFC 9110 section 7.6.1.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "proxy-connection"
            | "keep-alive"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// End-to-end headers only. `Host` and `Content-Length` describe the new
/// connection and are regenerated rather than copied.
fn forward_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|&(name, _)| !is_hop_by_hop(name) && name != &HOST && name != &CONTENT_LENGTH)
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn plain_response(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body));
    *resp.status_mut() = status;
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::CONTENT_TYPE;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn request(path: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .uri(path)
            .body(Full::new(Bytes::new()))
            .expect("valid request")
    }

    async fn body_string(resp: Response<Full<Bytes>>) -> String {
        let bytes = resp
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Serve exactly one canned HTTP response on an ephemeral port and
    /// hand back the raw request the proxy actually sent.
    async fn stub_upstream(response: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
        let addr = listener.local_addr().expect("stub addr");
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut raw = Vec::new();
                let mut buf = [0u8; 1024];
                // The proxied scrapes are bodyless; the request ends at
                // the blank line after the headers.
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            raw.extend_from_slice(&buf[..n]);
                            if raw.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                    }
                }
                let _ = tx.send(String::from_utf8_lossy(&raw).into_owned());
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        (format!("http://{addr}"), rx)
    }

    #[tokio::test]
    async fn metrics_path_is_forwarded() {
        let (upstream, _seen) = stub_upstream(
            "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 16\r\n\r\nup 1\nrequests 7\n",
        )
        .await;
        let proxy = MetricsProxy::new(upstream, "tailmon/node-exporter/host1");

        let resp = proxy.handle(request("/metrics")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("text/plain")
        );
        assert_eq!(body_string(resp).await, "up 1\nrequests 7\n");
    }

    #[tokio::test]
    async fn request_headers_reach_the_upstream() {
        let (upstream, seen) =
            stub_upstream("HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n").await;
        let proxy = MetricsProxy::new(upstream, "tailmon/node-exporter/host1");

        let req = Request::builder()
            .uri("/metrics")
            .header("accept", "application/openmetrics-text;version=1.0.0")
            .header("x-prometheus-scrape-timeout-seconds", "10")
            .header("te", "trailers")
            .header("proxy-connection", "keep-alive")
            .body(Full::new(Bytes::new()))
            .expect("valid request");

        let resp = proxy.handle(req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let raw = seen.await.expect("captured request").to_lowercase();
        assert!(raw.contains("accept: application/openmetrics-text;version=1.0.0"));
        assert!(raw.contains("x-prometheus-scrape-timeout-seconds: 10"));
        assert!(!raw.contains("\r\nte:"));
        assert!(!raw.contains("proxy-connection:"));
    }

    #[tokio::test]
    async fn response_headers_are_mirrored_without_hop_by_hop() {
        let (upstream, _seen) = stub_upstream(
            "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\nx-upstream-build: 1.8.2\r\nconnection: close\r\ncontent-length: 5\r\n\r\nup 1\n",
        )
        .await;
        let proxy = MetricsProxy::new(upstream, "tailmon/node-exporter/host1");

        let resp = proxy.handle(request("/metrics")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()
                .get("x-upstream-build")
                .and_then(|v| v.to_str().ok()),
            Some("1.8.2")
        );
        assert!(resp.headers().get("connection").is_none());
        assert!(resp.headers().get(CONTENT_LENGTH).is_none());
        assert_eq!(body_string(resp).await, "up 1\n");
    }

    #[tokio::test]
    async fn other_paths_rejected_without_touching_upstream() {
        // Nothing listens here; a forwarded request would come back 502.
        let proxy = MetricsProxy::new("http://127.0.0.1:1", "tailmon/node-exporter/host1");

        for path in ["/", "/metrics/sub", "/healthz"] {
            let resp = proxy.handle(request(path)).await;
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "path {path}");
            assert_eq!(body_string(resp).await, "tailmon/node-exporter/host1\n");
        }
    }

    #[tokio::test]
    async fn unreachable_upstream_yields_bad_gateway() {
        let proxy = MetricsProxy::new("http://127.0.0.1:1", "tailmon/node-exporter/host1");

        let resp = proxy.handle(request("/metrics")).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert!(body_string(resp).await.starts_with("upstream unavailable"));
    }
}
