//! Source enrichment through the HTTP session-lookup service.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::EnrichmentError;

/// Resolves the session port registered for a source address.
#[allow(async_fn_in_trait)]
pub trait SessionLookup {
    async fn session_port(&self, addr: Ipv4Addr) -> Result<u16, EnrichmentError>;
}

/// Session lookup against a remote HTTP endpoint.
pub struct HttpSessionLookup {
    client: reqwest::Client,
    url: String,
}

impl HttpSessionLookup {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, EnrichmentError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl SessionLookup for HttpSessionLookup {
    async fn session_port(&self, addr: Ipv4Addr) -> Result<u16, EnrichmentError> {
        let body: Value = self
            .client
            .get(&self.url)
            .json(&json!({ "ip": addr.to_string() }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let port = parse_session_port(&body)?;
        tracing::trace!("session lookup {addr} -> {port}");
        Ok(port)
    }
}

/// The service answers with a bare JSON number.
pub fn parse_session_port(body: &Value) -> Result<u16, EnrichmentError> {
    body.as_u64()
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| EnrichmentError::Malformed(format!("expected a port number, got {body}")))
}

/// Extract the port from an `http://host:port/...` URL, defaulting by scheme.
pub fn url_port(url: &str) -> Option<u16> {
    let parsed = reqwest::Url::parse(url).ok()?;
    parsed.port_or_known_default()
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// One-shot HTTP responder. Returns the URL to query and a handle that
    /// yields the raw request once served.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/session/get", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.ends_with(b"}") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (url, handle)
    }

    #[tokio::test]
    async fn test_lookup_sends_ip_and_parses_port() {
        let (url, server) = serve_once("200 OK", "8443").await;
        let lookup = HttpSessionLookup::new(url, Duration::from_secs(2)).unwrap();
        let port = lookup.session_port(Ipv4Addr::new(192, 168, 1, 20)).await.unwrap();
        assert_eq!(port, 8443);

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /session/get"));
        assert!(request.contains(r#"{"ip":"192.168.1.20"}"#));
    }

    #[tokio::test]
    async fn test_http_error_status_is_reported() {
        let (url, _server) = serve_once("503 Service Unavailable", "{}").await;
        let lookup = HttpSessionLookup::new(url, Duration::from_secs(2)).unwrap();
        let err = lookup.session_port(Ipv4Addr::LOCALHOST).await.unwrap_err();
        assert!(matches!(err, EnrichmentError::Status(503)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_non_numeric_body_is_malformed() {
        let (url, _server) = serve_once("200 OK", r#"{"port":80}"#).await;
        let lookup = HttpSessionLookup::new(url, Duration::from_secs(2)).unwrap();
        let err = lookup.session_port(Ipv4Addr::LOCALHOST).await.unwrap_err();
        assert_eq!(err.kind(), "Malformed");
    }

    #[tokio::test]
    async fn test_silent_service_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/session/get", listener.local_addr().unwrap());
        let _server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        let lookup = HttpSessionLookup::new(url, Duration::from_millis(200)).unwrap();
        let err = lookup.session_port(Ipv4Addr::LOCALHOST).await.unwrap_err();
        assert!(matches!(err, EnrichmentError::Timeout), "got {err:?}");
    }

    #[test]
    fn test_parse_session_port_bounds() {
        assert_eq!(parse_session_port(&json!(0)).unwrap(), 0);
        assert_eq!(parse_session_port(&json!(65535)).unwrap(), 65535);
        assert!(parse_session_port(&json!(65536)).is_err());
        assert!(parse_session_port(&json!(-1)).is_err());
        assert!(parse_session_port(&json!(80.5)).is_err());
        assert!(parse_session_port(&json!("80")).is_err());
    }

    #[test]
    fn test_url_port() {
        assert_eq!(url_port("http://10.0.0.58:5000/session/get"), Some(5000));
        assert_eq!(url_port("http://lookup.local/session/get"), Some(80));
        assert_eq!(url_port("not a url"), None);
    }
}
