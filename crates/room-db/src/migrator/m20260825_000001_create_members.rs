//! Migration to create the members table

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Members::Table)
                    .if_not_exists()
                    .col(big_integer(Members::Id).primary_key().auto_increment())
                    .col(string_len(Members::PublicKey, 64).not_null())
                    .col(string_len(Members::Role, 32).not_null())
                    .col(
                        timestamp_with_time_zone(Members::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // One membership row per identity
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_members_public_key")
                    .table(Members::Table)
                    .col(Members::PublicKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Members::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Members {
    #[sea_orm(iden = "members")]
    Table,
    Id,
    PublicKey,
    Role,
    CreatedAt,
}
