//! Migration to create the whatsapp_devices table.
//!
//! One row per tenant holding the last durably recorded session status.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WhatsappDevices::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WhatsappDevices::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WhatsappDevices::TenantId)
                            .uuid()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(WhatsappDevices::Jid).text().null())
                    .col(
                        ColumnDef::new(WhatsappDevices::IsConnected)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(WhatsappDevices::LastConnectedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WhatsappDevices::Platform)
                            .text()
                            .not_null()
                            .default("web"),
                    )
                    .col(ColumnDef::new(WhatsappDevices::PushName).text().null())
                    .col(
                        ColumnDef::new(WhatsappDevices::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WhatsappDevices::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_whatsapp_devices_tenant_id")
                            .from(WhatsappDevices::Table, WhatsappDevices::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_whatsapp_devices_is_connected")
                    .table(WhatsappDevices::Table)
                    .col(WhatsappDevices::IsConnected)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WhatsappDevices::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WhatsappDevices {
    Table,
    Id,
    TenantId,
    Jid,
    IsConnected,
    LastConnectedAt,
    Platform,
    PushName,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
