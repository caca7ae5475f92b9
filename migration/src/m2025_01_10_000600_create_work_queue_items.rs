//! Migration to create the work_queue_items table backing the durable work queue.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WorkQueueItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WorkQueueItems::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WorkQueueItems::Lane).text().not_null())
                    .col(ColumnDef::new(WorkQueueItems::Payload).text().not_null())
                    .col(
                        ColumnDef::new(WorkQueueItems::EnqueuedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_work_queue_items_lane_enqueued")
                    .table(WorkQueueItems::Table)
                    .col(WorkQueueItems::Lane)
                    .col(WorkQueueItems::EnqueuedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WorkQueueItems::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WorkQueueItems {
    Table,
    Id,
    Lane,
    Payload,
    EnqueuedAt,
}
