use axum::extract::FromRef;
use std::sync::Arc;

use crate::cancellable_sse::SseState;
use crate::config::Config;
use crate::services::anthropic::AnthropicProducer;
use crate::services::demo::DemoProducer;
use crate::services::producer::ContentProducer;

#[derive(FromRef, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sse_state: SseState,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            sse_state: SseState::new(config.stream_timeout),
            config: Arc::new(config),
            http: reqwest::Client::new(),
        }
    }

    /// Live model when an API key is configured, canned demo otherwise.
    pub fn producer(&self) -> Box<dyn ContentProducer> {
        match &self.config.anthropic {
            Some(anthropic) => {
                Box::new(AnthropicProducer::new(self.http.clone(), anthropic.clone()))
            }
            None => Box::new(DemoProducer::new(
                self.config.demo_startup_delay,
                self.config.demo_chunk_delay,
            )),
        }
    }
}
