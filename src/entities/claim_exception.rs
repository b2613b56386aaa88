use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which claim table a record refers to.
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
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
#[serde(rename_all = "lowercase")]
pub enum ClaimKind {
    #[sea_orm(string_value = "usage")]
    #[strum(serialize = "usage")]
    Usage,
    #[sea_orm(string_value = "return")]
    #[strum(serialize = "return")]
    Return,
}

/// Why a claim (or part of one) could not be applied.
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
pub enum ExceptionReason {
    #[sea_orm(string_value = "OVER_CLAIM")]
    #[strum(serialize = "OVER_CLAIM")]
    OverClaim,
    #[sea_orm(string_value = "UNMATCHED_CLAIM")]
    #[strum(serialize = "UNMATCHED_CLAIM")]
    UnmatchedClaim,
    #[sea_orm(string_value = "DUPLICATE_CLAIM")]
    #[strum(serialize = "DUPLICATE_CLAIM")]
    DuplicateClaim,
}

/// First-class record of every quantity the engine refused to apply.
/// Nothing is ever silently clipped; each refusal lands here with enough
/// context for the ward coordinator to chase it down.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "claim_exceptions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub claim_id: Uuid,
    pub claim_kind: ClaimKind,
    pub reason: ExceptionReason,
    pub item_code: String,
    /// The quantity that did not land.
    pub qty: i32,
    pub detail: String,
    pub resolved: bool,
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
