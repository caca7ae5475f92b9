//! # Automated Reply
//!
//! Building blocks of the automated-reply decision: keyword intent,
//! escalation policy, prompt context, model providers and credential
//! resolution. The worker loop that drives them lives in
//! [`crate::workers::auto_reply`].

pub mod context;
pub mod escalation;
pub mod intent;
pub mod providers;
pub mod registry;

pub use escalation::Decision;
pub use intent::Intent;
pub use providers::{GenerateRequest, Generation, LanguageModel};
pub use registry::{HttpModelResolver, ModelResolver};
