use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ── resources ──
        manager
            .create_table(
                Table::create()
                    .table(Resources::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Resources::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Resources::Name).string().not_null().unique_key())
                    .col(ColumnDef::new(Resources::DisplayName).string().not_null())
                    .col(ColumnDef::new(Resources::Description).string().null())
                    .col(ColumnDef::new(Resources::Route).string().not_null())
                    .col(ColumnDef::new(Resources::Icon).string().null())
                    .col(ColumnDef::new(Resources::Category).string().null())
                    .col(ColumnDef::new(Resources::ParentId).integer().null())
                    .col(
                        ColumnDef::new(Resources::SortOrder)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Resources::AvailableActions).json().not_null())
                    .col(ColumnDef::new(Resources::ApiRoutes).json().not_null())
                    .col(ColumnDef::new(Resources::AccessConditions).json().null())
                    .col(ColumnDef::new(Resources::FeatureFlags).json().null())
                    .col(ColumnDef::new(Resources::DataScope).json().null())
                    .col(
                        ColumnDef::new(Resources::IsSystem)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Resources::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Resources::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Resources::UpdatedAt).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_resources_parent")
                            .from(Resources::Table, Resources::ParentId)
                            .to(Resources::Table, Resources::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_resources_category_sort")
                    .table(Resources::Table)
                    .col(Resources::Category)
                    .col(Resources::SortOrder)
                    .to_owned(),
            )
            .await?;

        // ── permissions ──
        manager
            .create_table(
                Table::create()
                    .table(Permissions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Permissions::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Permissions::ResourceId).integer().null().unique_key())
                    .col(ColumnDef::new(Permissions::Module).string().not_null().unique_key())
                    .col(ColumnDef::new(Permissions::DisplayName).string().not_null())
                    .col(ColumnDef::new(Permissions::Description).string().null())
                    .col(ColumnDef::new(Permissions::Category).string().not_null())
                    .col(ColumnDef::new(Permissions::AvailableActions).json().not_null())
                    .col(
                        ColumnDef::new(Permissions::SortOrder)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Permissions::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Permissions::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Permissions::UpdatedAt).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_permissions_resource")
                            .from(Permissions::Table, Permissions::ResourceId)
                            .to(Resources::Table, Resources::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // ── roles ──
        manager
            .create_table(
                Table::create()
                    .table(Roles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Roles::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Roles::Name).string().not_null())
                    .col(ColumnDef::new(Roles::DisplayName).string().not_null())
                    .col(ColumnDef::new(Roles::Description).string().null())
                    .col(
                        ColumnDef::new(Roles::Type)
                            .string()
                            .not_null()
                            .default("custom"),
                    )
                    .col(ColumnDef::new(Roles::Level).integer().not_null().default(100))
                    .col(
                        ColumnDef::new(Roles::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Roles::IsDefault)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Roles::UserCount).integer().not_null().default(0))
                    .col(
                        ColumnDef::new(Roles::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Roles::DeletedAt).timestamp().null())
                    .col(ColumnDef::new(Roles::Permissions).json().not_null())
                    .col(ColumnDef::new(Roles::PermissionStats).json().not_null())
                    .col(ColumnDef::new(Roles::UpdatedBy).string().null())
                    .col(ColumnDef::new(Roles::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Roles::UpdatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_roles_name")
                    .table(Roles::Table)
                    .col(Roles::Name)
                    .to_owned(),
            )
            .await?;

        // ── role_permissions (normalized grants) ──
        manager
            .create_table(
                Table::create()
                    .table(RolePermissions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RolePermissions::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RolePermissions::RoleId).integer().not_null())
                    .col(
                        ColumnDef::new(RolePermissions::PermissionId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RolePermissions::Actions).json().not_null())
                    .col(ColumnDef::new(RolePermissions::UpdatedBy).string().null())
                    .col(
                        ColumnDef::new(RolePermissions::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RolePermissions::UpdatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_role_permissions_role")
                            .from(RolePermissions::Table, RolePermissions::RoleId)
                            .to(Roles::Table, Roles::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_role_permissions_permission")
                            .from(RolePermissions::Table, RolePermissions::PermissionId)
                            .to(Permissions::Table, Permissions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_role_permissions_unique")
                    .table(RolePermissions::Table)
                    .col(RolePermissions::RoleId)
                    .col(RolePermissions::PermissionId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RolePermissions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Roles::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Permissions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Resources::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(Iden)]
enum Resources {
    Table,
    Id,
    Name,
    DisplayName,
    Description,
    Route,
    Icon,
    Category,
    ParentId,
    SortOrder,
    AvailableActions,
    ApiRoutes,
    AccessConditions,
    FeatureFlags,
    DataScope,
    IsSystem,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Permissions {
    Table,
    Id,
    ResourceId,
    Module,
    DisplayName,
    Description,
    Category,
    AvailableActions,
    SortOrder,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Roles {
    Table,
    Id,
    Name,
    DisplayName,
    Description,
    Type,
    Level,
    IsActive,
    IsDefault,
    UserCount,
    IsDeleted,
    DeletedAt,
    Permissions,
    PermissionStats,
    UpdatedBy,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum RolePermissions {
    Table,
    Id,
    RoleId,
    PermissionId,
    Actions,
    UpdatedBy,
    CreatedAt,
    UpdatedAt,
}
