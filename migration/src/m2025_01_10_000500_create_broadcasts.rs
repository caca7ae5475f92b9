//! Migration to create the broadcasts and broadcast_recipients tables.
//!
//! Recipient status is the dedup guard for delivery, so (broadcast_id, status)
//! is indexed for the fan-out and completion queries.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Broadcasts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Broadcasts::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Broadcasts::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Broadcasts::Name).text().not_null())
                    .col(ColumnDef::new(Broadcasts::MessageContent).text().not_null())
                    .col(
                        ColumnDef::new(Broadcasts::Status)
                            .text()
                            .not_null()
                            .default("draft"),
                    )
                    .col(
                        ColumnDef::new(Broadcasts::ScheduledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Broadcasts::IsRecurring)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Broadcasts::RecurrenceType).text().null())
                    .col(ColumnDef::new(Broadcasts::RecurrenceInterval).integer().null())
                    .col(ColumnDef::new(Broadcasts::RecurrenceDays).json_binary().null())
                    .col(ColumnDef::new(Broadcasts::RecurrenceTime).text().null())
                    .col(
                        ColumnDef::new(Broadcasts::RecurrenceEndDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Broadcasts::RecurrenceCount).integer().null())
                    .col(
                        ColumnDef::new(Broadcasts::ExecutionCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Broadcasts::LastExecutedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Broadcasts::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Broadcasts::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Broadcasts::TotalRecipients)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Broadcasts::SentCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Broadcasts::DeliveredCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Broadcasts::FailedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Broadcasts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Broadcasts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_broadcasts_tenant_id")
                            .from(Broadcasts::Table, Broadcasts::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_broadcasts_status_scheduled ON broadcasts (status, scheduled_at)".to_string(),
            ))
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(BroadcastRecipients::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BroadcastRecipients::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(BroadcastRecipients::BroadcastId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(BroadcastRecipients::TenantId).uuid().not_null())
                    .col(ColumnDef::new(BroadcastRecipients::CustomerId).uuid().null())
                    .col(
                        ColumnDef::new(BroadcastRecipients::CustomerJid)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BroadcastRecipients::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(BroadcastRecipients::MessageId).text().null())
                    .col(ColumnDef::new(BroadcastRecipients::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(BroadcastRecipients::SentAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(BroadcastRecipients::DeliveredAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(BroadcastRecipients::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(BroadcastRecipients::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_broadcast_recipients_broadcast_id")
                            .from(BroadcastRecipients::Table, BroadcastRecipients::BroadcastId)
                            .to(Broadcasts::Table, Broadcasts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_broadcast_recipients_broadcast_status")
                    .table(BroadcastRecipients::Table)
                    .col(BroadcastRecipients::BroadcastId)
                    .col(BroadcastRecipients::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BroadcastRecipients::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Broadcasts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Broadcasts {
    Table,
    Id,
    TenantId,
    Name,
    MessageContent,
    Status,
    ScheduledAt,
    IsRecurring,
    RecurrenceType,
    RecurrenceInterval,
    RecurrenceDays,
    RecurrenceTime,
    RecurrenceEndDate,
    RecurrenceCount,
    ExecutionCount,
    LastExecutedAt,
    StartedAt,
    CompletedAt,
    TotalRecipients,
    SentCount,
    DeliveredCount,
    FailedCount,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum BroadcastRecipients {
    Table,
    Id,
    BroadcastId,
    TenantId,
    CustomerId,
    CustomerJid,
    Status,
    MessageId,
    ErrorMessage,
    SentAt,
    DeliveredAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
