//! # Backend Classifier
//!
//! Contract with the classification service the Receiver forwards readings to:
//! `POST` the uplink document as `application/json`; HTTP 200 with a body
//! holding `classification` and `buzzer_on` is success, anything else fails.

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::time::Duration;
use tracing::debug;

use crate::error::{LinkError, Result};
use crate::frame::payload::{decode_downlink, SensorSnapshot, Verdict};

/// Classification backend seam
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify one reading
    ///
    /// # Errors
    ///
    /// - `BackendUnavailable` on network failure or a non-200 status
    /// - `PayloadParse` when the response body is not a verdict document
    async fn classify(&self, reading: &SensorSnapshot) -> Result<Verdict>;
}

/// HTTP implementation of [`Classifier`]
#[derive(Debug, Clone)]
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpClassifier {
    /// Create a classifier posting to `endpoint`
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the HTTP client cannot be built
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LinkError::BackendUnavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, reading: &SensorSnapshot) -> Result<Verdict> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(reading)
            .send()
            .await
            .map_err(|e| LinkError::BackendUnavailable(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(LinkError::BackendUnavailable(format!("HTTP {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| LinkError::BackendUnavailable(e.to_string()))?;
        debug!(status = %status, body = %String::from_utf8_lossy(&body), "Backend responded");

        Ok(decode_downlink(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one HTTP request with a canned response, returning the URL and the request
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/biodrying_data", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];

            // Read headers, then exactly Content-Length body bytes
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        (url, handle)
    }

    fn reading() -> SensorSnapshot {
        SensorSnapshot {
            humidity: 55.0,
            temperature: 28.3,
            ph: 6.5,
        }
    }

    #[tokio::test]
    async fn test_success_parses_integer_verdict() {
        let (url, server) = serve_once("HTTP/1.1 200 OK", r#"{"classification": 1, "buzzer_on": 1}"#).await;
        let classifier = HttpClassifier::new(&url, Duration::from_secs(5)).unwrap();

        let verdict = classifier.classify(&reading()).await.unwrap();
        assert_eq!(verdict, Verdict::new(true, true));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /biodrying_data"));
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(request.contains(r#""humidity":55.0"#));
    }

    #[tokio::test]
    async fn test_non_200_is_backend_unavailable() {
        let (url, server) = serve_once("HTTP/1.1 503 Service Unavailable", r#"{"error": "Model not loaded"}"#).await;
        let classifier = HttpClassifier::new(&url, Duration::from_secs(5)).unwrap();

        let result = classifier.classify(&reading()).await;
        assert!(matches!(result, Err(LinkError::BackendUnavailable(msg)) if msg.contains("503")));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let (url, server) = serve_once("HTTP/1.1 200 OK", "<html>oops</html>").await;
        let classifier = HttpClassifier::new(&url, Duration::from_secs(5)).unwrap();

        let result = classifier.classify(&reading()).await;
        assert!(matches!(result, Err(LinkError::PayloadParse(_))));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_is_backend_unavailable() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let classifier =
            HttpClassifier::new(&format!("http://{}/biodrying_data", addr), Duration::from_secs(2)).unwrap();
        let result = classifier.classify(&reading()).await;
        assert!(matches!(result, Err(LinkError::BackendUnavailable(_))));
    }
}
