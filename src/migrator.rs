use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260115_000001_create_item_master_table::Migration),
            Box::new(m20260115_000002_create_slot_deltas_table::Migration),
            Box::new(m20260115_000003_create_dispense_units_table::Migration),
            Box::new(m20260115_000004_create_usage_claims_table::Migration),
            Box::new(m20260115_000005_create_return_claims_table::Migration),
            Box::new(m20260115_000006_create_comparison_rows_table::Migration),
            Box::new(m20260115_000007_create_claim_exceptions_table::Migration),
            Box::new(m20260115_000008_create_reversals_table::Migration),
            Box::new(m20260412_000009_add_reconciliation_indexes::Migration),
        ]
    }
}

// Migration implementations

mod m20260115_000001_create_item_master_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260115_000001_create_item_master_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ItemMaster::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ItemMaster::ItemCode)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ItemMaster::Name).string().not_null())
                        .col(ColumnDef::new(ItemMaster::ItemType).string().null())
                        .col(ColumnDef::new(ItemMaster::DepartmentCode).string().null())
                        .col(
                            ColumnDef::new(ItemMaster::IsTracked)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(ItemMaster::UnitCost).decimal().null())
                        .col(ColumnDef::new(ItemMaster::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(ItemMaster::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ItemMaster::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum ItemMaster {
        Table,
        ItemCode,
        Name,
        ItemType,
        DepartmentCode,
        IsTracked,
        UnitCost,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20260115_000002_create_slot_deltas_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260115_000002_create_slot_deltas_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Append-only ledger; no updated_at on purpose
            manager
                .create_table(
                    Table::create()
                        .table(SlotDeltas::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SlotDeltas::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(SlotDeltas::CabinetId).string().not_null())
                        .col(ColumnDef::new(SlotDeltas::SlotNo).integer().not_null())
                        .col(ColumnDef::new(SlotDeltas::ItemCode).string().not_null())
                        .col(ColumnDef::new(SlotDeltas::DeltaQty).integer().not_null())
                        .col(ColumnDef::new(SlotDeltas::ActorId).string().not_null())
                        .col(
                            ColumnDef::new(SlotDeltas::DispenseUnitId)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(SlotDeltas::RecordedAt).timestamp().not_null())
                        .col(ColumnDef::new(SlotDeltas::CreatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            // Fold path: every on-hand computation scans one slot's history
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_slot_deltas_cabinet_slot")
                        .table(SlotDeltas::Table)
                        .col(SlotDeltas::CabinetId)
                        .col(SlotDeltas::SlotNo)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_slot_deltas_item_recorded")
                        .table(SlotDeltas::Table)
                        .col(SlotDeltas::ItemCode)
                        .col(SlotDeltas::RecordedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SlotDeltas::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum SlotDeltas {
        Table,
        Id,
        CabinetId,
        SlotNo,
        ItemCode,
        DeltaQty,
        ActorId,
        DispenseUnitId,
        RecordedAt,
        CreatedAt,
    }
}

mod m20260115_000003_create_dispense_units_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260115_000003_create_dispense_units_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(DispenseUnits::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DispenseUnits::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DispenseUnits::UnitId).string().not_null())
                        .col(ColumnDef::new(DispenseUnits::ItemCode).string().not_null())
                        .col(ColumnDef::new(DispenseUnits::CabinetId).string().not_null())
                        .col(ColumnDef::new(DispenseUnits::SlotNo).integer().not_null())
                        .col(ColumnDef::new(DispenseUnits::ActorId).string().not_null())
                        .col(
                            ColumnDef::new(DispenseUnits::QtyDispensed)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DispenseUnits::QtyUsed)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(DispenseUnits::QtyReturned)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(DispenseUnits::QtyPending)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DispenseUnits::Status).string().not_null())
                        .col(
                            ColumnDef::new(DispenseUnits::ReportedStatus)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(DispenseUnits::DispensedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DispenseUnits::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(DispenseUnits::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DispenseUnits::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_dispense_units_unit_id")
                        .table(DispenseUnits::Table)
                        .col(DispenseUnits::UnitId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            // FIFO matching scans open units by item in dispense order
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_dispense_units_item_dispensed")
                        .table(DispenseUnits::Table)
                        .col(DispenseUnits::ItemCode)
                        .col(DispenseUnits::DispensedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_dispense_units_status")
                        .table(DispenseUnits::Table)
                        .col(DispenseUnits::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(DispenseUnits::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum DispenseUnits {
        Table,
        Id,
        UnitId,
        ItemCode,
        CabinetId,
        SlotNo,
        ActorId,
        QtyDispensed,
        QtyUsed,
        QtyReturned,
        QtyPending,
        Status,
        ReportedStatus,
        DispensedAt,
        Version,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20260115_000004_create_usage_claims_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260115_000004_create_usage_claims_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(UsageClaims::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(UsageClaims::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(UsageClaims::SourceSystemId)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(UsageClaims::ExternalReference)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(UsageClaims::EncounterId)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(UsageClaims::ItemCode).string().not_null())
                        .col(ColumnDef::new(UsageClaims::Qty).integer().not_null())
                        .col(ColumnDef::new(UsageClaims::UnitId).string().null())
                        .col(ColumnDef::new(UsageClaims::ActorId).string().null())
                        .col(ColumnDef::new(UsageClaims::ReportedStatus).string().null())
                        .col(ColumnDef::new(UsageClaims::UnitCost).decimal().null())
                        .col(
                            ColumnDef::new(UsageClaims::RecordedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(ColumnDef::new(UsageClaims::ClaimWindow).date().not_null())
                        .col(ColumnDef::new(UsageClaims::Outcome).string().not_null())
                        .col(ColumnDef::new(UsageClaims::CreatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            // Idempotency key; replays must hit this, including racing ones
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_usage_claims_source_ref")
                        .table(UsageClaims::Table)
                        .col(UsageClaims::SourceSystemId)
                        .col(UsageClaims::ExternalReference)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_usage_claims_item_window")
                        .table(UsageClaims::Table)
                        .col(UsageClaims::ItemCode)
                        .col(UsageClaims::ClaimWindow)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(UsageClaims::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum UsageClaims {
        Table,
        Id,
        SourceSystemId,
        ExternalReference,
        EncounterId,
        ItemCode,
        Qty,
        UnitId,
        ActorId,
        ReportedStatus,
        UnitCost,
        RecordedAt,
        ClaimWindow,
        Outcome,
        CreatedAt,
    }
}

mod m20260115_000005_create_return_claims_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260115_000005_create_return_claims_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ReturnClaims::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ReturnClaims::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnClaims::SourceSystemId)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnClaims::ExternalReference)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ReturnClaims::ItemCode).string().not_null())
                        .col(ColumnDef::new(ReturnClaims::Qty).integer().not_null())
                        .col(ColumnDef::new(ReturnClaims::UnitId).string().null())
                        .col(ColumnDef::new(ReturnClaims::ActorId).string().null())
                        .col(ColumnDef::new(ReturnClaims::Reason).string().not_null())
                        .col(ColumnDef::new(ReturnClaims::Note).string().null())
                        .col(ColumnDef::new(ReturnClaims::UnitCost).decimal().null())
                        .col(
                            ColumnDef::new(ReturnClaims::RecordedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ReturnClaims::ClaimWindow).date().not_null())
                        .col(ColumnDef::new(ReturnClaims::Outcome).string().not_null())
                        .col(
                            ColumnDef::new(ReturnClaims::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_return_claims_source_ref")
                        .table(ReturnClaims::Table)
                        .col(ReturnClaims::SourceSystemId)
                        .col(ReturnClaims::ExternalReference)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_return_claims_item_window")
                        .table(ReturnClaims::Table)
                        .col(ReturnClaims::ItemCode)
                        .col(ReturnClaims::ClaimWindow)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ReturnClaims::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum ReturnClaims {
        Table,
        Id,
        SourceSystemId,
        ExternalReference,
        ItemCode,
        Qty,
        UnitId,
        ActorId,
        Reason,
        Note,
        UnitCost,
        RecordedAt,
        ClaimWindow,
        Outcome,
        CreatedAt,
    }
}

mod m20260115_000006_create_comparison_rows_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260115_000006_create_comparison_rows_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ComparisonRows::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ComparisonRows::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ComparisonRows::ItemCode).string().not_null())
                        .col(ColumnDef::new(ComparisonRows::Window).date().not_null())
                        .col(
                            ColumnDef::new(ComparisonRows::TotalDispensed)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ComparisonRows::TotalUsed)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ComparisonRows::TotalReturned)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ComparisonRows::Difference)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ComparisonRows::TotalPending)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(ComparisonRows::Status).string().not_null())
                        .col(
                            ColumnDef::new(ComparisonRows::FirstDispensedAt)
                                .timestamp()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ComparisonRows::LastDispensedAt)
                                .timestamp()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ComparisonRows::FirstUsedAt)
                                .timestamp()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ComparisonRows::LastUsedAt)
                                .timestamp()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ComparisonRows::ComputedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ComparisonRows::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .to_owned(),
                )
                .await?;

            // One row per (item, window); recomputes upsert against this
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_comparison_rows_item_window")
                        .table(ComparisonRows::Table)
                        .col(ComparisonRows::ItemCode)
                        .col(ComparisonRows::Window)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_comparison_rows_window")
                        .table(ComparisonRows::Table)
                        .col(ComparisonRows::Window)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ComparisonRows::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum ComparisonRows {
        Table,
        Id,
        ItemCode,
        Window,
        TotalDispensed,
        TotalUsed,
        TotalReturned,
        Difference,
        TotalPending,
        Status,
        FirstDispensedAt,
        LastDispensedAt,
        FirstUsedAt,
        LastUsedAt,
        ComputedAt,
        Version,
    }
}

mod m20260115_000007_create_claim_exceptions_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260115_000007_create_claim_exceptions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ClaimExceptions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ClaimExceptions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ClaimExceptions::ClaimId).uuid().not_null())
                        .col(
                            ColumnDef::new(ClaimExceptions::ClaimKind)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ClaimExceptions::Reason).string().not_null())
                        .col(
                            ColumnDef::new(ClaimExceptions::ItemCode)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ClaimExceptions::Qty).integer().not_null())
                        .col(ColumnDef::new(ClaimExceptions::Detail).string().not_null())
                        .col(
                            ColumnDef::new(ClaimExceptions::Resolved)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(ClaimExceptions::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_claim_exceptions_resolved")
                        .table(ClaimExceptions::Table)
                        .col(ClaimExceptions::Resolved)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_claim_exceptions_item_code")
                        .table(ClaimExceptions::Table)
                        .col(ClaimExceptions::ItemCode)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ClaimExceptions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum ClaimExceptions {
        Table,
        Id,
        ClaimId,
        ClaimKind,
        Reason,
        ItemCode,
        Qty,
        Detail,
        Resolved,
        CreatedAt,
    }
}

mod m20260115_000008_create_reversals_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260115_000008_create_reversals_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Reversals::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Reversals::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Reversals::ClaimKind).string().not_null())
                        .col(ColumnDef::new(Reversals::ItemCode).string().not_null())
                        .col(ColumnDef::new(Reversals::Qty).integer().not_null())
                        .col(ColumnDef::new(Reversals::Window).date().not_null())
                        .col(ColumnDef::new(Reversals::Reason).string().not_null())
                        .col(ColumnDef::new(Reversals::FiledBy).string().not_null())
                        .col(ColumnDef::new(Reversals::CreatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_reversals_item_window")
                        .table(Reversals::Table)
                        .col(Reversals::ItemCode)
                        .col(Reversals::Window)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Reversals::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Reversals {
        Table,
        Id,
        ClaimKind,
        ItemCode,
        Qty,
        Window,
        Reason,
        FiledBy,
        CreatedAt,
    }
}

mod m20260412_000009_add_reconciliation_indexes {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260412_000009_add_reconciliation_indexes"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            use super::m20260115_000002_create_slot_deltas_table::SlotDeltas;
            use super::m20260115_000006_create_comparison_rows_table::ComparisonRows;
            use super::m20260115_000007_create_claim_exceptions_table::ClaimExceptions;

            // Reverse lookup from a unit to its originating delta
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_slot_deltas_dispense_unit_id")
                        .table(SlotDeltas::Table)
                        .col(SlotDeltas::DispenseUnitId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_comparison_rows_status")
                        .table(ComparisonRows::Table)
                        .col(ComparisonRows::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_claim_exceptions_reason")
                        .table(ClaimExceptions::Table)
                        .col(ClaimExceptions::Reason)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            use super::m20260115_000002_create_slot_deltas_table::SlotDeltas;
            use super::m20260115_000006_create_comparison_rows_table::ComparisonRows;
            use super::m20260115_000007_create_claim_exceptions_table::ClaimExceptions;

            manager
                .drop_index(
                    Index::drop()
                        .name("idx_slot_deltas_dispense_unit_id")
                        .table(SlotDeltas::Table)
                        .to_owned(),
                )
                .await?;

            manager
                .drop_index(
                    Index::drop()
                        .name("idx_comparison_rows_status")
                        .table(ComparisonRows::Table)
                        .to_owned(),
                )
                .await?;

            manager
                .drop_index(
                    Index::drop()
                        .name("idx_claim_exceptions_reason")
                        .table(ClaimExceptions::Table)
                        .to_owned(),
                )
                .await
        }
    }
}

pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    let result = Migrator::up(&db, None).await;

    match result {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
