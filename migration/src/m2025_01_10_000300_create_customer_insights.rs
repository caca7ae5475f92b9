//! Migration to create the customer_insights table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CustomerInsights::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CustomerInsights::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CustomerInsights::TenantId).uuid().not_null())
                    .col(ColumnDef::new(CustomerInsights::CustomerJid).text().not_null())
                    .col(ColumnDef::new(CustomerInsights::CustomerPhone).text().null())
                    .col(ColumnDef::new(CustomerInsights::CustomerName).text().null())
                    .col(
                        ColumnDef::new(CustomerInsights::MessageCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CustomerInsights::FirstMessageAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CustomerInsights::LastMessageAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CustomerInsights::LastMessageSummary)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CustomerInsights::NeedsAttention)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(CustomerInsights::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CustomerInsights::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_customer_insights_tenant_id")
                            .from(CustomerInsights::Table, CustomerInsights::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_customer_insights_tenant_customer")
                    .table(CustomerInsights::Table)
                    .col(CustomerInsights::TenantId)
                    .col(CustomerInsights::CustomerJid)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CustomerInsights::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CustomerInsights {
    Table,
    Id,
    TenantId,
    CustomerJid,
    CustomerPhone,
    CustomerName,
    MessageCount,
    FirstMessageAt,
    LastMessageAt,
    LastMessageSummary,
    NeedsAttention,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
