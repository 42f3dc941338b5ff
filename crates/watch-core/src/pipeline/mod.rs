//! The two LLM pipelines as plain async functions over the ports.
//!
//! Processing: channel message → extract → geocode → store.
//! Analyst: question → classify → geocode → retrieve → risk → respond.

pub mod analyst;
pub mod llm_json;
pub mod processing;
pub mod prompts;

pub use analyst::{AnalystPipeline, AnalystReport, BreakingNews, Classification};
pub use processing::{OutcomeStatus, ProcessingOutcome, ProcessingPipeline};
