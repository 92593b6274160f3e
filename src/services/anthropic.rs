use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::StreamExt;
use log::{debug, error, info};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::AnthropicConfig;
use crate::services::producer::{
    forward, Accumulation, Chunk, ChunkReceiver, ContentProducer, ProducerError, CHUNK_BUFFER,
};
use crate::types::StreamRequest;

const ANTHROPIC_VERSION: &str = "2023-06-01";

const SYSTEM_PROMPT: &str = "You are an expert career coach and resume writer. \
Given a candidate's resume and a job description, explain how to tailor the resume \
to the role. Respond in Markdown with a short analysis followed by concrete, \
prioritized recommendations. Never invent experience the candidate does not have.";

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: Delta },
    MessageStop,
    Error { error: UpstreamError },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct UpstreamError {
    message: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: UpstreamError,
}

/// Streams a resume rewrite from the Anthropic Messages API.
#[derive(Clone)]
pub struct AnthropicProducer {
    client: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicProducer {
    pub fn new(client: reqwest::Client, config: AnthropicConfig) -> Self {
        AnthropicProducer { client, config }
    }

    fn user_prompt(request: &StreamRequest) -> String {
        format!(
            "Resume:\n{}\n\nJob description:\n{}\n\nSuggest how to tweak this resume for the job.",
            request.resume, request.job_description
        )
    }
}

#[async_trait]
impl ContentProducer for AnthropicProducer {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn accumulation(&self) -> Accumulation {
        Accumulation::Replace
    }

    async fn start(
        &mut self,
        request: &StreamRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkReceiver, ProducerError> {
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        debug!("Sending resume tweak request to {url} with model {}", self.config.model);

        let send = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&json!({
                "model": self.config.model,
                "max_tokens": self.config.max_tokens,
                "system": SYSTEM_PROMPT,
                "messages": [
                    { "role": "user", "content": Self::user_prompt(request) }
                ],
                "stream": true,
            }))
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ProducerError::Unavailable("request cancelled".to_string()));
            }
            response = send => response.map_err(|e| ProducerError::Unavailable(e.to_string()))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ProducerError::Unavailable("request cancelled".to_string()));
                }
                body = response.text() => body.unwrap_or_default(),
            };
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            error!("Anthropic rejected the request with {status}: {message}");
            return Err(ProducerError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        tokio::spawn(pump(response, tx, cancel));
        Ok(rx)
    }
}

// Turns the upstream SSE body into chunks carrying the accumulated text.
async fn pump(response: reqwest::Response, tx: mpsc::Sender<Chunk>, cancel: CancellationToken) {
    let mut events = response.bytes_stream().eventsource();
    let mut text = String::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Anthropic stream cancelled during processing");
                return;
            }
            next = events.next() => next,
        };

        let chunk = match next {
            Some(Ok(event)) => match serde_json::from_str::<StreamEvent>(&event.data) {
                Ok(StreamEvent::ContentBlockDelta { delta: Delta::TextDelta { text: delta } }) => {
                    text.push_str(&delta);
                    Chunk::Partial(text.clone())
                }
                Ok(StreamEvent::MessageStop) => {
                    debug!("Received message_stop event");
                    forward(&tx, &cancel, Chunk::Final(std::mem::take(&mut text))).await;
                    return;
                }
                Ok(StreamEvent::Error { error }) => Chunk::Error(error.message),
                Ok(_) => continue,
                Err(e) => {
                    debug!("Skipping unparseable event {:?}: {e}", event.event);
                    continue;
                }
            },
            Some(Err(e)) => {
                error!("Failed to process stream: {e}");
                Chunk::Error(e.to_string())
            }
            None => Chunk::Error("upstream closed the stream before completion".to_string()),
        };

        let terminal = matches!(chunk, Chunk::Error(_));
        if !forward(&tx, &cancel, chunk).await || terminal {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_text_delta() {
        let data = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#;
        match serde_json::from_str::<StreamEvent>(data).unwrap() {
            StreamEvent::ContentBlockDelta { delta: Delta::TextDelta { text } } => {
                assert_eq!(text, "Hi")
            }
            _ => panic!("expected a text delta"),
        }
    }

    #[test]
    fn test_unknown_events_are_ignored() {
        let data = r#"{"type":"message_start","message":{"id":"msg_1"}}"#;
        assert!(matches!(serde_json::from_str::<StreamEvent>(data).unwrap(), StreamEvent::Other));

        let data = r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{"}}"#;
        assert!(matches!(
            serde_json::from_str::<StreamEvent>(data).unwrap(),
            StreamEvent::ContentBlockDelta { delta: Delta::Other }
        ));
    }

    #[test]
    fn test_parses_error_event() {
        let data = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        match serde_json::from_str::<StreamEvent>(data).unwrap() {
            StreamEvent::Error { error } => assert_eq!(error.message, "Overloaded"),
            _ => panic!("expected an error event"),
        }
    }

    #[test]
    fn test_user_prompt_embeds_both_fields() {
        let prompt = AnthropicProducer::user_prompt(&StreamRequest {
            resume: "my resume".into(),
            job_description: "the job".into(),
        });
        assert!(prompt.contains("my resume"));
        assert!(prompt.contains("the job"));
    }
}
