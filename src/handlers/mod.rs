pub mod health;
pub mod input;
pub mod sse;

pub use health::*;
pub use sse::*;
