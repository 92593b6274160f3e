pub mod anthropic;
pub mod demo;
pub mod producer;
pub mod push_sink;
pub mod relay;
pub mod validation;

pub use producer::{Accumulation, Chunk, ContentProducer};
pub use relay::{relay, RelayOutcome};
