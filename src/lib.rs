//! # Tenant Gateway Library
//!
//! Multi-tenant messaging gateway: per-tenant network sessions, inbound
//! ingestion with identity resolution, automated replies, scheduled
//! broadcasts and a real-time event hub for operator dashboards.

pub mod ai;
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod ingestion;
pub mod jid;
pub mod models;
pub mod queue;
pub mod repositories;
pub mod runtime;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod webhook_verification;
pub mod workers;
pub use migration;
