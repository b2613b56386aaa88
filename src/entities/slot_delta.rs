use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One signed movement against a cabinet slot. Rows are append-only:
/// nothing in the engine updates or deletes them, and on-hand is always
/// derived by folding `delta_qty` over the slot's history.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "slot_deltas")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub cabinet_id: String,
    pub slot_no: i32,
    pub item_code: String,
    /// Negative = take, positive = refill. Never zero.
    pub delta_qty: i32,
    pub actor_id: String,
    /// Set when a take of a tracked item spawned a dispense unit.
    pub dispense_unit_id: Option<String>,
    /// Event time as reported by the cabinet.
    pub recorded_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
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
        if let ActiveValue::NotSet = active_model.created_at {
            active_model.created_at = Set(Utc::now());
        }
        Ok(active_model)
    }
}

impl Model {
    pub fn is_take(&self) -> bool {
        self.delta_qty < 0
    }

    pub fn is_refill(&self) -> bool {
        self.delta_qty > 0
    }

    /// Quantity removed from the slot by this event (zero for refills).
    pub fn taken_qty(&self) -> i32 {
        if self.delta_qty < 0 {
            -self.delta_qty
        } else {
            0
        }
    }
}
