use async_trait::async_trait;
use log::{debug, info};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::services::producer::{
    forward, Accumulation, Chunk, ChunkReceiver, ContentProducer, ProducerError, CHUNK_BUFFER,
};
use crate::types::StreamRequest;

pub const DEMO_CHUNKS: &[&str] = &[
    "## Resume Analysis\n\n",
    "Based on the job description, I've identified several opportunities ",
    "to better align your resume with the target role.\n\n",
    "### Key Recommendations\n\n",
    "**1. Strengthen your summary**\n",
    "Your current summary is good, but consider adding specific ",
    "keywords from the job posting like:\n",
    "- Data-driven decision making\n",
    "- Cross-functional collaboration\n",
    "- Stakeholder management\n\n",
    "**2. Quantify your achievements**\n",
    "Add metrics where possible:\n",
    "- \"Increased efficiency by X%\"\n",
    "- \"Managed budget of $X\"\n",
    "- \"Led team of X people\"\n\n",
    "**3. Tailor your experience section**\n",
    "Reorder bullet points to prioritize ",
    "experiences most relevant to this role.\n\n",
    "---\n\n",
    "*Demo mode: Set ANTHROPIC_API_KEY to enable real AI suggestions.*",
];

/// The whole canned analysis, as the client sees it once the demo finishes.
pub fn demo_text() -> String {
    DEMO_CHUNKS.concat()
}

/// Stands in for the model when no API key is configured.
#[derive(Debug, Clone)]
pub struct DemoProducer {
    startup_delay: Duration,
    chunk_delay: Duration,
}

impl Default for DemoProducer {
    fn default() -> Self {
        Self::new(Duration::from_millis(300), Duration::from_millis(150))
    }
}

impl DemoProducer {
    pub fn new(startup_delay: Duration, chunk_delay: Duration) -> Self {
        Self {
            startup_delay,
            chunk_delay,
        }
    }
}

#[async_trait]
impl ContentProducer for DemoProducer {
    fn name(&self) -> &'static str {
        "demo"
    }

    fn accumulation(&self) -> Accumulation {
        Accumulation::Append
    }

    async fn start(
        &mut self,
        _request: &StreamRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkReceiver, ProducerError> {
        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        let startup_delay = self.startup_delay;
        let chunk_delay = self.chunk_delay;

        tokio::spawn(async move {
            if !pause(&cancel, startup_delay).await {
                info!("Demo stream cancelled before first chunk");
                return;
            }

            for (index, chunk) in DEMO_CHUNKS.iter().enumerate() {
                if !forward(&tx, &cancel, Chunk::Partial((*chunk).to_string())).await {
                    info!("Demo stream stopped after {index} chunks");
                    return;
                }
                if !pause(&cancel, chunk_delay).await {
                    info!("Demo stream cancelled after {} chunks", index + 1);
                    return;
                }
            }

            debug!("Demo stream exhausted");
        });

        Ok(rx)
    }
}

// Sleeps unless cancelled first. Returns false on cancellation.
async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
