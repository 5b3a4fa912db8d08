//! 访问日志表
//!
//! 每次跳转的原始访问记录（由异步日志通道或直接写入产生）。

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AccessLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AccessLogs::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AccessLogs::ShortCode)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(AccessLogs::ClientIp).string_len(45).not_null())
                    .col(ColumnDef::new(AccessLogs::UserAgent).text().null())
                    .col(ColumnDef::new(AccessLogs::Referer).text().null())
                    .col(
                        ColumnDef::new(AccessLogs::AccessTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 单链接按时间倒序查询
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_access_logs_code_time")
                    .table(AccessLogs::Table)
                    .col(AccessLogs::ShortCode)
                    .col(AccessLogs::AccessTime)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_access_logs_code_time").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(AccessLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AccessLogs {
    Table,
    Id,
    ShortCode,
    ClientIp,
    UserAgent,
    Referer,
    AccessTime,
}
