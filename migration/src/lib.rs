//! Database migrations for the tenant gateway.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2024_01_01_000001_create_tenants;
mod m2025_01_10_000100_create_whatsapp_devices;
mod m2025_01_10_000200_create_whatsapp_messages;
mod m2025_01_10_000300_create_customer_insights;
mod m2025_01_10_000400_create_ai_tables;
mod m2025_01_10_000500_create_broadcasts;
mod m2025_01_10_000600_create_work_queue_items;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2024_01_01_000001_create_tenants::Migration),
            Box::new(m2025_01_10_000100_create_whatsapp_devices::Migration),
            Box::new(m2025_01_10_000200_create_whatsapp_messages::Migration),
            Box::new(m2025_01_10_000300_create_customer_insights::Migration),
            Box::new(m2025_01_10_000400_create_ai_tables::Migration),
            Box::new(m2025_01_10_000500_create_broadcasts::Migration),
            Box::new(m2025_01_10_000600_create_work_queue_items::Migration),
        ]
    }
}
