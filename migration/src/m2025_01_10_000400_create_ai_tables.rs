//! Migration to create the automated-reply tables.
//!
//! Creates `ai_configs` (one per tenant), `knowledge_base` entries used as
//! prompt context, and the append-only `ai_conversation_logs`.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AiConfigs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(AiConfigs::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(AiConfigs::TenantId)
                            .uuid()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(AiConfigs::Enabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(AiConfigs::AiProvider)
                            .text()
                            .not_null()
                            .default("gemini"),
                    )
                    .col(
                        ColumnDef::new(AiConfigs::Model)
                            .text()
                            .not_null()
                            .default("gemini-1.5-flash"),
                    )
                    .col(
                        ColumnDef::new(AiConfigs::UseSystemKey)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(AiConfigs::UserApiKey).text().null())
                    .col(
                        ColumnDef::new(AiConfigs::ConfidenceThreshold)
                            .double()
                            .not_null()
                            .default(0.80),
                    )
                    .col(
                        ColumnDef::new(AiConfigs::MaxTokens)
                            .integer()
                            .not_null()
                            .default(200),
                    )
                    .col(ColumnDef::new(AiConfigs::SystemPrompt).text().null())
                    .col(ColumnDef::new(AiConfigs::BusinessName).text().null())
                    .col(ColumnDef::new(AiConfigs::BusinessType).text().null())
                    .col(ColumnDef::new(AiConfigs::BusinessHours).text().null())
                    .col(ColumnDef::new(AiConfigs::BusinessDescription).text().null())
                    .col(ColumnDef::new(AiConfigs::BusinessAddress).text().null())
                    .col(ColumnDef::new(AiConfigs::PaymentMethods).text().null())
                    .col(
                        ColumnDef::new(AiConfigs::EscalateComplaint)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(AiConfigs::EscalateOrder)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(AiConfigs::TotalRequests)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AiConfigs::TotalTokensUsed)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AiConfigs::TotalCostUsd)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(AiConfigs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(AiConfigs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_ai_configs_tenant_id")
                            .from(AiConfigs::Table, AiConfigs::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(KnowledgeBase::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(KnowledgeBase::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(KnowledgeBase::TenantId).uuid().not_null())
                    .col(ColumnDef::new(KnowledgeBase::Title).text().not_null())
                    .col(ColumnDef::new(KnowledgeBase::Content).text().not_null())
                    .col(ColumnDef::new(KnowledgeBase::Category).text().null())
                    .col(
                        ColumnDef::new(KnowledgeBase::Priority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(KnowledgeBase::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(KnowledgeBase::MediaUrl).text().null())
                    .col(ColumnDef::new(KnowledgeBase::MediaType).text().null())
                    .col(
                        ColumnDef::new(KnowledgeBase::UsageCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(KnowledgeBase::LastUsedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(KnowledgeBase::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(KnowledgeBase::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_knowledge_base_tenant_id")
                            .from(KnowledgeBase::Table, KnowledgeBase::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_knowledge_base_tenant_active_priority")
                    .table(KnowledgeBase::Table)
                    .col(KnowledgeBase::TenantId)
                    .col(KnowledgeBase::IsActive)
                    .col(KnowledgeBase::Priority)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AiConversationLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AiConversationLogs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AiConversationLogs::TenantId).uuid().not_null())
                    .col(ColumnDef::new(AiConversationLogs::MessageId).text().not_null())
                    .col(ColumnDef::new(AiConversationLogs::CustomerJid).text().not_null())
                    .col(
                        ColumnDef::new(AiConversationLogs::CustomerMessage)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AiConversationLogs::AiResponse).text().null())
                    .col(
                        ColumnDef::new(AiConversationLogs::DetectedIntent)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AiConversationLogs::ConfidenceScore)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(ColumnDef::new(AiConversationLogs::ActionTaken).text().not_null())
                    .col(
                        ColumnDef::new(AiConversationLogs::EscalationReason)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AiConversationLogs::ResponseTimeMs)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AiConversationLogs::TokensUsed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AiConversationLogs::InputTokens)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AiConversationLogs::OutputTokens)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AiConversationLogs::CostUsd)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(ColumnDef::new(AiConversationLogs::ModelUsed).text().null())
                    .col(
                        ColumnDef::new(AiConversationLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_ai_conversation_logs_tenant_id")
                            .from(AiConversationLogs::Table, AiConversationLogs::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_ai_conversation_logs_tenant_created")
                    .table(AiConversationLogs::Table)
                    .col(AiConversationLogs::TenantId)
                    .col(AiConversationLogs::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AiConversationLogs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(KnowledgeBase::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AiConfigs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AiConfigs {
    Table,
    Id,
    TenantId,
    Enabled,
    AiProvider,
    Model,
    UseSystemKey,
    UserApiKey,
    ConfidenceThreshold,
    MaxTokens,
    SystemPrompt,
    BusinessName,
    BusinessType,
    BusinessHours,
    BusinessDescription,
    BusinessAddress,
    PaymentMethods,
    EscalateComplaint,
    EscalateOrder,
    TotalRequests,
    TotalTokensUsed,
    TotalCostUsd,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum KnowledgeBase {
    Table,
    Id,
    TenantId,
    Title,
    Content,
    Category,
    Priority,
    IsActive,
    MediaUrl,
    MediaType,
    UsageCount,
    LastUsedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum AiConversationLogs {
    Table,
    Id,
    TenantId,
    MessageId,
    CustomerJid,
    CustomerMessage,
    AiResponse,
    DetectedIntent,
    ConfidenceScore,
    ActionTaken,
    EscalationReason,
    ResponseTimeMs,
    TokensUsed,
    InputTokens,
    OutputTokens,
    CostUsd,
    ModelUsed,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
