use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the engine did with an ingested claim. Stored on the claim row so
/// idempotent replays can answer from history without re-matching.
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
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimOutcome {
    #[sea_orm(string_value = "APPLIED")]
    #[strum(serialize = "APPLIED")]
    Applied,
    #[sea_orm(string_value = "REJECTED")]
    #[strum(serialize = "REJECTED")]
    Rejected,
    #[sea_orm(string_value = "DUPLICATE")]
    #[strum(serialize = "DUPLICATE")]
    Duplicate,
}

/// A billed-usage report from the hospital information system.
/// `(source_system_id, external_reference)` is the idempotency key.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "usage_claims")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub source_system_id: String,
    pub external_reference: String,
    /// HN/EN visit pair from the clinical system.
    pub encounter_id: String,
    pub item_code: String,
    pub qty: i32,
    /// Explicit unit targeting; absent claims match FIFO by item and window.
    pub unit_id: Option<String>,
    pub actor_id: Option<String>,
    /// HIS status string as received, audit only.
    pub reported_status: Option<String>,
    /// Monetary passthrough, never computed on.
    pub unit_cost: Option<Decimal>,
    pub recorded_at: DateTime<Utc>,
    /// UTC calendar day of recorded_at; the comparison bucket.
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
