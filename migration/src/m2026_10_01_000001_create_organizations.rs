//! Migration to create the organizations table.
//!
//! One row per forge organization. Profile fields are flat columns; the
//! members/repositories snapshot of the latest run lives in a JSON column.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Organizations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Organizations::Login)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Organizations::DisplayName).text().null())
                    .col(ColumnDef::new(Organizations::Url).text().null())
                    .col(ColumnDef::new(Organizations::AvatarUrl).text().null())
                    .col(ColumnDef::new(Organizations::Location).text().null())
                    .col(ColumnDef::new(Organizations::Email).text().null())
                    .col(
                        ColumnDef::new(Organizations::PublicRepos)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Organizations::PublicGists)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Organizations::Followers)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Organizations::Following)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Organizations::ProfileCreatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Organizations::ProfileUpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Organizations::Members).json_binary().not_null())
                    .col(
                        ColumnDef::new(Organizations::RecentlyUpdatedRepoCount)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Organizations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Organizations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Organizations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Organizations {
    Table,
    Login,
    DisplayName,
    Url,
    AvatarUrl,
    Location,
    Email,
    PublicRepos,
    PublicGists,
    Followers,
    Following,
    ProfileCreatedAt,
    ProfileUpdatedAt,
    Members,
    RecentlyUpdatedRepoCount,
    CreatedAt,
    UpdatedAt,
}
