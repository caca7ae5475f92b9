//! Migration to create the whatsapp_messages and jid_mappings tables.
//!
//! `whatsapp_messages` is unique on (tenant_id, message_id) so replays from the
//! network collapse into one row. `jid_mappings` is unique on (tenant_id, lid_jid).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WhatsappMessages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WhatsappMessages::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WhatsappMessages::TenantId).uuid().not_null())
                    .col(ColumnDef::new(WhatsappMessages::MessageId).text().not_null())
                    .col(ColumnDef::new(WhatsappMessages::ChatJid).text().not_null())
                    .col(ColumnDef::new(WhatsappMessages::SenderJid).text().not_null())
                    .col(
                        ColumnDef::new(WhatsappMessages::MessageType)
                            .text()
                            .not_null()
                            .default("text"),
                    )
                    .col(
                        ColumnDef::new(WhatsappMessages::MessageText)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(WhatsappMessages::MediaUrl).text().null())
                    .col(
                        ColumnDef::new(WhatsappMessages::IsFromMe)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(WhatsappMessages::IsGroup)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(WhatsappMessages::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WhatsappMessages::AiProcessed)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(WhatsappMessages::AiProcessedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WhatsappMessages::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_whatsapp_messages_tenant_id")
                            .from(WhatsappMessages::Table, WhatsappMessages::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_whatsapp_messages_tenant_message")
                    .table(WhatsappMessages::Table)
                    .col(WhatsappMessages::TenantId)
                    .col(WhatsappMessages::MessageId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_whatsapp_messages_tenant_chat_timestamp")
                    .table(WhatsappMessages::Table)
                    .col(WhatsappMessages::TenantId)
                    .col(WhatsappMessages::ChatJid)
                    .col(WhatsappMessages::Timestamp)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(JidMappings::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(JidMappings::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(JidMappings::TenantId).uuid().not_null())
                    .col(ColumnDef::new(JidMappings::LidJid).text().not_null())
                    .col(ColumnDef::new(JidMappings::PhoneJid).text().not_null())
                    .col(ColumnDef::new(JidMappings::PhoneNumber).text().not_null())
                    .col(
                        ColumnDef::new(JidMappings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(JidMappings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_jid_mappings_tenant_id")
                            .from(JidMappings::Table, JidMappings::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_jid_mappings_tenant_lid")
                    .table(JidMappings::Table)
                    .col(JidMappings::TenantId)
                    .col(JidMappings::LidJid)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(JidMappings::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WhatsappMessages::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WhatsappMessages {
    Table,
    Id,
    TenantId,
    MessageId,
    ChatJid,
    SenderJid,
    MessageType,
    MessageText,
    MediaUrl,
    IsFromMe,
    IsGroup,
    Timestamp,
    AiProcessed,
    AiProcessedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum JidMappings {
    Table,
    Id,
    TenantId,
    LidJid,
    PhoneJid,
    PhoneNumber,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
