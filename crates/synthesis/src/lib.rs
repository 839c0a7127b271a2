//! Script Synthesis Client.
//!
//! Turns a prompt and its parameters into a validated Blender script by
//! asking an Ollama-compatible generative-model service. Provides the
//! meta-prompt template, the HTTP wrapper, strict response validation and
//! the [`ScriptSynthesizer`] seam the pipeline depends on.

pub mod api;
pub mod client;
pub mod error;
pub mod prompt;
pub mod response;

pub use client::{OllamaSynthesizer, ScriptSynthesizer, SynthesisConfig};
pub use error::SynthesisError;
pub use response::SynthesizedScript;
