use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{DescriptionRequest, InferenceClient};
use crate::error::{PipelineError, PipelineResult};

/// Where a stock Ollama install listens.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// Client for Ollama's `/api/generate` endpoint.
pub struct OllamaClient {
    endpoint: String,
    client: Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: [&'a str; 1],
    format: &'static str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: Client::new(),
        }
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.endpoint.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl InferenceClient for OllamaClient {
    fn name(&self) -> &str {
        "Ollama"
    }

    async fn complete(&self, request: &DescriptionRequest) -> PipelineResult<String> {
        let body = GenerateRequest {
            model: &request.model,
            prompt: &request.prompt,
            images: [&request.image_base64],
            format: "json",
            stream: false,
            options: request.temperature.map(|temperature| GenerateOptions { temperature }),
        };

        let resp = self
            .client
            .post(self.generate_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Inference(format!("Ollama request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| PipelineError::Inference(format!("Failed to read Ollama response: {e}")))?;

        if !status.is_success() {
            return Err(PipelineError::Inference(format!(
                "Ollama API error ({status}): {text}"
            )));
        }

        let parsed: GenerateResponse = serde_json::from_str(&text).map_err(|e| {
            PipelineError::MalformedResponse(format!("unexpected Ollama response body: {e}"))
        })?;

        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn generate_url_trims_slash() {
        assert_eq!(
            OllamaClient::new("http://localhost:11434/").generate_url(),
            "http://localhost:11434/api/generate"
        );
        assert_eq!(
            OllamaClient::new(DEFAULT_ENDPOINT).generate_url(),
            "http://localhost:11434/api/generate"
        );
    }

    #[test]
    fn request_body_shape() {
        let body = GenerateRequest {
            model: "gemma3:latest",
            prompt: "describe",
            images: ["AAAA"],
            format: "json",
            stream: false,
            options: Some(GenerateOptions { temperature: 0.3 }),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model"], "gemma3:latest");
        assert_eq!(value["images"][0], "AAAA");
        assert_eq!(value["format"], "json");
        assert_eq!(value["stream"], false);
        assert!((value["options"]["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);

        let bare = GenerateRequest { options: None, ..body };
        assert!(serde_json::to_value(&bare).unwrap().get("options").is_none());
    }

    #[tokio::test]
    async fn complete_returns_response_field() {
        let (endpoint, server) =
            serve_once("200 OK", r#"{"model":"gemma3","response":"{\"subject\":\"cat\",\"keywords\":[]}","done":true}"#).await;
        let client = OllamaClient::new(endpoint);
        let request = DescriptionRequest::new(b"img", "gemma3:latest", Some(0.3));

        let text = client.complete(&request).await.unwrap();
        assert_eq!(text, r#"{"subject":"cat","keywords":[]}"#);

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /api/generate"));
        assert!(raw.contains(r#""images":["aW1n"]"#));
        assert!(raw.contains(r#""format":"json""#));
    }

    #[tokio::test]
    async fn http_error_is_inference_error() {
        let (endpoint, _server) = serve_once("404 Not Found", r#"{"error":"model not found"}"#).await;
        let client = OllamaClient::new(endpoint);
        let request = DescriptionRequest::new(b"img", "missing", None);

        match client.complete(&request).await {
            Err(PipelineError::Inference(msg)) => assert!(msg.contains("model not found")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_inference_error() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = OllamaClient::new(format!("http://{addr}"));
        let request = DescriptionRequest::new(b"img", "gemma3", None);
        assert!(matches!(
            client.complete(&request).await,
            Err(PipelineError::Inference(_))
        ));
    }
}
