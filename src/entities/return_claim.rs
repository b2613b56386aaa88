use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use super::usage_claim::ClaimOutcome;

/// Why a unit came back to the cabinet.
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
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(24))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnReason {
    #[sea_orm(string_value = "UNWRAPPED_UNUSED")]
    #[strum(serialize = "UNWRAPPED_UNUSED")]
    UnwrappedUnused,
    #[sea_orm(string_value = "EXPIRED")]
    #[strum(serialize = "EXPIRED")]
    Expired,
    #[sea_orm(string_value = "CONTAMINATED")]
    #[strum(serialize = "CONTAMINATED")]
    Contaminated,
    #[sea_orm(string_value = "DAMAGED")]
    #[strum(serialize = "DAMAGED")]
    Damaged,
}

/// A physical give-back reported by a ward. Same idempotency key shape as
/// usage claims, stored in its own table.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "return_claims")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub source_system_id: String,
    pub external_reference: String,
    pub item_code: String,
    pub qty: i32,
    pub unit_id: Option<String>,
    pub actor_id: Option<String>,
    pub reason: ReturnReason,
    pub note: Option<String>,
    pub unit_cost: Option<Decimal>,
    pub recorded_at: DateTime<Utc>,
    pub claim_window: NaiveDate,
    pub outcome: ClaimOutcome,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if let ActiveValue::NotSet = active_model.created_at {
            active_model.created_at = Set(Utc::now());
        }
        Ok(active_model)
    }
}
