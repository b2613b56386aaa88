use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discrepancy classification for one `(item_code, window)` bucket.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComparisonStatus {
    #[sea_orm(string_value = "MATCHED")]
    #[strum(serialize = "MATCHED")]
    Matched,
    #[sea_orm(string_value = "DISPENSED_NOT_USED")]
    #[strum(serialize = "DISPENSED_NOT_USED")]
    DispensedNotUsed,
    #[sea_orm(string_value = "USED_WITHOUT_DISPENSE")]
    #[strum(serialize = "USED_WITHOUT_DISPENSE")]
    UsedWithoutDispense,
    #[sea_orm(string_value = "DISPENSE_EXCEEDS_USAGE")]
    #[strum(serialize = "DISPENSE_EXCEEDS_USAGE")]
    DispenseExceedsUsage,
    #[sea_orm(string_value = "USAGE_EXCEEDS_DISPENSE")]
    #[strum(serialize = "USAGE_EXCEEDS_DISPENSE")]
    UsageExceedsDispense,
}

impl ComparisonStatus {
    /// Parses a status filter from a query parameter, case-insensitively.
    pub fn parse_filter(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MATCHED" => Some(ComparisonStatus::Matched),
            "DISPENSED_NOT_USED" => Some(ComparisonStatus::DispensedNotUsed),
            "USED_WITHOUT_DISPENSE" => Some(ComparisonStatus::UsedWithoutDispense),
            "DISPENSE_EXCEEDS_USAGE" => Some(ComparisonStatus::DispenseExceedsUsage),
            "USAGE_EXCEEDS_DISPENSE" => Some(ComparisonStatus::UsageExceedsDispense),
            _ => None,
        }
    }
}

/// Materialized aggregate per `(item_code, window)`. Recomputed from scratch
/// on every relevant mutation; never a source of truth.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "comparison_rows")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub item_code: String,
    pub window: NaiveDate,
    pub total_dispensed: i64,
    pub total_used: i64,
    pub total_returned: i64,
    /// total_dispensed - total_used; returns are reported separately.
    pub difference: i64,
    /// Open quantity still unaccounted for across the window's units.
    pub total_pending: i64,
    pub status: ComparisonStatus,
    pub first_dispensed_at: Option<DateTime<Utc>>,
    pub last_dispensed_at: Option<DateTime<Utc>>,
    pub first_used_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub computed_at: DateTime<Utc>,
    /// Bumped on every recompute.
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::item_master::Entity",
        from = "Column::ItemCode",
        to = "super::item_master::Column::ItemCode"
    )]
    ItemMaster,
}

impl Related<super::item_master::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ItemMaster.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if let ActiveValue::NotSet = active_model.computed_at {
            active_model.computed_at = Set(Utc::now());
        }
        Ok(active_model)
    }
}
