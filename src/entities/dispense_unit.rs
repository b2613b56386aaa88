use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a dispense unit, derived from its tallies and never taken
/// from the wire. Transitions only move forward:
/// Pending -> Partial -> Completed.
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
pub enum ItemStatus {
    #[sea_orm(string_value = "PENDING")]
    #[strum(serialize = "PENDING")]
    Pending,
    #[sea_orm(string_value = "PARTIAL")]
    #[strum(serialize = "PARTIAL")]
    Partial,
    #[sea_orm(string_value = "COMPLETED")]
    #[strum(serialize = "COMPLETED")]
    Completed,
}

impl ItemStatus {
    /// Parses an externally reported status string, case-insensitively.
    /// Anything outside the known set is rejected by the caller.
    pub fn parse_reported(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(ItemStatus::Pending),
            "PARTIAL" => Some(ItemStatus::Partial),
            "COMPLETED" => Some(ItemStatus::Completed),
            _ => None,
        }
    }

    /// Ordering rank used to enforce forward-only transitions.
    pub fn rank(&self) -> u8 {
        match self {
            ItemStatus::Pending => 0,
            ItemStatus::Partial => 1,
            ItemStatus::Completed => 2,
        }
    }
}

/// One take of one item by one actor. `qty_dispensed` is immutable after
/// creation; claims move quantity out of `qty_pending` into `qty_used` or
/// `qty_returned`, and `qty_dispensed == qty_used + qty_returned + qty_pending`
/// holds after every committed write.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dispense_units")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// RFID tag when the cabinet supplied one, otherwise synthesized.
    #[sea_orm(unique)]
    pub unit_id: String,
    pub item_code: String,
    pub cabinet_id: String,
    pub slot_no: i32,
    pub actor_id: String,
    pub qty_dispensed: i32,
    pub qty_used: i32,
    pub qty_returned: i32,
    pub qty_pending: i32,
    pub status: ItemStatus,
    /// Last status string the HIS reported for this unit, kept for audit.
    pub reported_status: Option<String>,
    /// recorded_at of the originating slot delta.
    pub dispensed_at: DateTime<Utc>,
    /// Optimistic-lock counter, bumped on every tally mutation.
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
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
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();
        if insert {
            if let ActiveValue::NotSet = active_model.created_at {
                active_model.created_at = Set(now);
            }
        }
        active_model.updated_at = Set(now);
        Ok(active_model)
    }
}

impl Model {
    /// Status implied by the current tallies.
    pub fn derived_status(&self) -> ItemStatus {
        if self.qty_pending == 0 {
            ItemStatus::Completed
        } else if self.qty_used > 0 || self.qty_returned > 0 {
            ItemStatus::Partial
        } else {
            ItemStatus::Pending
        }
    }

    /// True when the four tallies still balance and none went negative.
    pub fn conserves_quantity(&self) -> bool {
        self.qty_used >= 0
            && self.qty_returned >= 0
            && self.qty_pending >= 0
            && self.qty_dispensed == self.qty_used + self.qty_returned + self.qty_pending
    }

    pub fn is_open(&self) -> bool {
        self.qty_pending > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dispensed: i32, used: i32, returned: i32) -> Model {
        let now = Utc::now();
        Model {
            id: Uuid::new_v4(),
            unit_id: "RFID-1".into(),
            item_code: "SYR-10ML".into(),
            cabinet_id: "CAB-3F".into(),
            slot_no: 4,
            actor_id: "nurse-77".into(),
            qty_dispensed: dispensed,
            qty_used: used,
            qty_returned: returned,
            qty_pending: dispensed - used - returned,
            status: ItemStatus::Pending,
            reported_status: None,
            dispensed_at: now,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn derived_status_follows_tallies() {
        assert_eq!(unit(10, 0, 0).derived_status(), ItemStatus::Pending);
        assert_eq!(unit(10, 6, 0).derived_status(), ItemStatus::Partial);
        assert_eq!(unit(10, 0, 4).derived_status(), ItemStatus::Partial);
        assert_eq!(unit(10, 6, 4).derived_status(), ItemStatus::Completed);
    }

    #[test]
    fn conservation_check_catches_drift() {
        assert!(unit(10, 6, 4).conserves_quantity());
        let mut broken = unit(10, 6, 4);
        broken.qty_pending = 1;
        assert!(!broken.conserves_quantity());
    }

    #[test]
    fn reported_status_parsing_is_case_insensitive() {
        assert_eq!(
            ItemStatus::parse_reported("completed"),
            Some(ItemStatus::Completed)
        );
        assert_eq!(
            ItemStatus::parse_reported(" Partial "),
            Some(ItemStatus::Partial)
        );
        assert_eq!(ItemStatus::parse_reported("SHIPPED"), None);
    }

    #[test]
    fn status_rank_is_monotonic() {
        assert!(ItemStatus::Pending.rank() < ItemStatus::Partial.rank());
        assert!(ItemStatus::Partial.rank() < ItemStatus::Completed.rank());
    }
}
