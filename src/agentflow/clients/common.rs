//! Shared utilities used across provider client implementations.
//!
//! Every adapter posts through one pooled [`reqwest::Client`] so TLS
//! sessions and DNS lookups stay warm under concurrent load, and shares the
//! same line-buffered SSE chunk decoding for streaming responses.

use std::error::Error;
use std::time::Duration;

use futures_util::StreamExt;
use lazy_static::lazy_static;

use crate::agentflow::llm::{ChunkStream, LlmError};

lazy_static! {
    /// Shared HTTP client with persistent connection pooling.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build shared HTTP client")
    };
}

/// Borrow the lazily initialised shared [`reqwest::Client`].
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

/// POST a JSON body and return `(status, body_text)`. Connection failures
/// become [`LlmError::Transport`]; non-success statuses are returned to the
/// caller for dialect-specific handling.
pub async fn post_json(
    url: &str,
    headers: &[(&str, String)],
    body: &serde_json::Value,
) -> Result<(u16, String), LlmError> {
    let mut request = get_shared_http_client().post(url).json(body);
    for (name, value) in headers {
        request = request.header(*name, value);
    }

    let response = request
        .send()
        .await
        .map_err(|e| LlmError::Transport(e.to_string()))?;
    let status = response.status().as_u16();
    let text = response
        .text()
        .await
        .map_err(|e| LlmError::Transport(e.to_string()))?;
    Ok((status, text))
}

/// Adapt a provider SSE byte stream into a [`ChunkStream`] of content deltas.
///
/// `extract` receives each `data:` JSON payload and returns the content
/// delta it carries, if any. The literal `[DONE]` sentinel ends the stream.
pub fn sse_content_stream<F>(response: reqwest::Response, extract: F) -> ChunkStream
where
    F: Fn(&serde_json::Value) -> Option<String> + Send + 'static,
{
    // Boxed so the byte stream is Unpin for `next()` inside the unfold.
    let byte_stream = Box::pin(response.bytes_stream());

    let stream = futures_util::stream::unfold(
        (byte_stream, String::new(), std::collections::VecDeque::<String>::new(), extract, false),
        |(mut bytes, mut buffer, mut pending, extract, mut done)| async move {
            loop {
                if let Some(chunk) = pending.pop_front() {
                    return Some((
                        Ok::<String, Box<dyn Error + Send + Sync>>(chunk),
                        (bytes, buffer, pending, extract, done),
                    ));
                }
                if done {
                    return None;
                }

                match bytes.next().await {
                    Some(Ok(data)) => {
                        buffer.push_str(&String::from_utf8_lossy(&data));
                        while let Some(newline) = buffer.find('\n') {
                            let line: String = buffer.drain(..=newline).collect();
                            let line = line.trim();
                            let Some(payload) = line.strip_prefix("data: ") else {
                                continue;
                            };
                            if payload == "[DONE]" {
                                done = true;
                                break;
                            }
                            if let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) {
                                if let Some(delta) = extract(&value) {
                                    if !delta.is_empty() {
                                        pending.push_back(delta);
                                    }
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        done = true;
                        return Some((
                            Err(Box::new(LlmError::Transport(e.to_string()))
                                as Box<dyn Error + Send + Sync>),
                            (bytes, buffer, pending, extract, done),
                        ));
                    }
                    None => {
                        done = true;
                    }
                }
            }
        },
    );

    Box::pin(stream)
}

/// Parse a tool-call arguments payload that providers transport as a JSON
/// string. Malformed JSON becomes an empty object so the tool is still
/// invoked and its own validation reports the problem.
pub fn parse_arguments(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        log::warn!("malformed tool-call arguments ({}), treating as empty: {}", e, raw);
        serde_json::Value::Object(serde_json::Map::new())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arguments_defensive() {
        assert_eq!(
            parse_arguments(r#"{"a": 1}"#),
            serde_json::json!({"a": 1})
        );
        assert_eq!(parse_arguments("not json"), serde_json::json!({}));
        assert_eq!(parse_arguments(""), serde_json::json!({}));
    }
}
