//! Mediation engine - evidence gathering, classification and response synthesis
//!
//! This crate is the part of BetweenUs with real decision logic. Given an invocation from a chat
//! connector it:
//! - Gathers context through a bounded reason/act loop over registered tools
//! - Classifies the conflict as fact-dominant, emotion-dominant or mixed
//! - Routes to an analytical or relational strategy (or both, merged)
//! - Assembles a fixed four-part intervention
//!
//! # Architecture
//!
//! 1. **Triage** (`triage`) - THINKING → ACTING → ... → CONCLUDING, capped and cancellable
//! 2. **Tools** (`tools`) - schema-checked contracts, timeouts, typed failures
//! 3. **Classification** (`classifier`, `signals`) - lexical scoring or a model, with fallback
//! 4. **Synthesis** (`router`, `strategies`) - stance-specific drafts, mixed merge with dedup
//! 5. **Assembly** (`assembler`) - validated, labeled, ordered text
//!
//! # Key Types
//!
//! - `MediationRuntime` - wires the stages together (see `runtime` module)
//! - `Reasoner` - pluggable next-step policy (model-backed or heuristic)
//! - `LlmClient` - pluggable completion backend for OpenAI/Anthropic/Ollama/Groq
//!
//! # Safety Principle
//!
//! The engine never posts anything. It returns text or a typed failure; delivery belongs to the
//! connector.

pub mod assembler;
pub mod classifier;
pub mod llm;
pub mod prompts;
pub mod reasoner;
pub mod router;
pub mod runtime;
pub mod signals;
pub mod strategies;
pub mod tools;
pub mod triage;

pub use assembler::{FormattedText, OutputAssembler};
pub use runtime::{MediationOutcome, MediationRuntime, RuntimeError};
pub use tools::{register_builtins, RegistryConfig, ToolRegistry};
pub use triage::{LoopPolicy, Termination};
