//! # Repository Layer
//!
//! This module contains repository implementations that encapsulate SeaORM operations
//! for the gateway's tables, providing tenant-aware methods for every component.

pub mod ai;
pub mod broadcast;
pub mod customer;
pub mod device;
pub mod identity;
pub mod message;

pub use ai::AiRepository;
pub use broadcast::BroadcastRepository;
pub use customer::CustomerRepository;
pub use device::DeviceRepository;
pub use identity::IdentityRepository;
pub use message::MessageRepository;
