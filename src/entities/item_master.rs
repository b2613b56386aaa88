use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Catalog of item codes the cabinets may report. Deltas naming an unknown
/// code are rejected; `is_tracked` decides whether takes spawn dispense units.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "item_master")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub item_code: String,
    pub name: String,
    /// Consumable class from the admin catalog, used only as a report filter.
    pub item_type: Option<String>,
    /// Owning department code, again a report filter.
    pub department_code: Option<String>,
    pub is_tracked: bool,
    /// Reference price, passed through to reporting untouched.
    pub unit_cost: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::slot_delta::Entity")]
    SlotDeltas,
    #[sea_orm(has_many = "super::dispense_unit::Entity")]
    DispenseUnits,
}

impl Related<super::slot_delta::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SlotDeltas.def()
    }
}

impl Related<super::dispense_unit::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DispenseUnits.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
