//! # On-device Language Model
//!
//! A [`GenerationSession`] drives any [`CausalLm`] backend through
//! load → init → (system prompt cache) → streaming generation → close.

pub mod backend;
pub mod onnx;
pub mod prompt;
pub mod sampler;
pub mod session;

pub use backend::{CausalLm, LmOptions};
pub use onnx::{KvCache, OnnxCausalLm};
pub use prompt::{system_prompt, user_prompt};
pub use sampler::Sampler;
pub use session::{CancellationToken, FinishReason, GenerationSession, GenerationStats, StreamEvent, TokenStream};
