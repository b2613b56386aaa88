use crate::{
    commands::ledger::append_delta_command::{AppendDeltaCommand, AppendDeltaResult},
    commands::Command,
    db::DbPool,
    entities::slot_delta,
    errors::ServiceError,
    events::EventSender,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lazy_static::lazy_static;
use sea_orm::{
    ColumnTrait, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::instrument;
use utoipa::ToSchema;

lazy_static! {
    static ref SLOT_LOCKS: DashMap<(String, i32), Arc<Mutex<()>>> = DashMap::new();
}

/// Serializes writes touching one physical slot. The balance check and the
/// insert must not interleave with a concurrent append to the same slot.
pub(crate) async fn slot_guard(cabinet_id: &str, slot_no: i32) -> OwnedMutexGuard<()> {
    let lock = SLOT_LOCKS
        .entry((cabinet_id.to_string(), slot_no))
        .or_default()
        .value()
        .clone();
    lock.lock_owned().await
}

/// Direction of a slot movement as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum DeltaSign {
    Take,
    Refill,
}

impl DeltaSign {
    /// Accepts the raw sensor characters plus spelled-out forms used in
    /// query strings, where `+` does not survive URL encoding.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "-" | "take" => Some(DeltaSign::Take),
            "+" | "refill" => Some(DeltaSign::Refill),
            _ => None,
        }
    }
}

/// Filters accepted by the raw ledger listing.
#[derive(Debug, Clone, Default)]
pub struct DeltaFilter {
    pub sign: Option<DeltaSign>,
    pub cabinet_id: Option<String>,
    pub item_code: Option<String>,
    pub recorded_from: Option<DateTime<Utc>>,
    pub recorded_to: Option<DateTime<Utc>>,
}

/// Folded view of one slot's history.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OnHandSummary {
    pub cabinet_id: String,
    pub slot_no: i32,
    /// Running sum of signed deltas; there is no stored counter to drift.
    pub on_hand: i64,
    pub delta_count: u64,
    pub last_recorded_at: Option<DateTime<Utc>>,
}

#[derive(FromQueryResult)]
struct OnHandRow {
    on_hand: Option<i64>,
    delta_count: i64,
    last_recorded_at: Option<DateTime<Utc>>,
}

/// Service owning the append-only slot ledger.
#[derive(Clone)]
pub struct LedgerService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl LedgerService {
    /// Creates a new ledger service instance
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Validates and stores one signed delta, spawning a dispense unit for
    /// takes of tracked items.
    #[instrument(skip(self, command), fields(cabinet_id = %command.cabinet_id, slot_no = command.slot_no))]
    pub async fn append_delta(
        &self,
        command: AppendDeltaCommand,
    ) -> Result<AppendDeltaResult, ServiceError> {
        let _guard = slot_guard(&command.cabinet_id, command.slot_no).await;
        command
            .execute(self.db_pool.clone(), self.event_sender.clone())
            .await
    }

    /// Current quantity for a slot, always folded from history.
    #[instrument(skip(self))]
    pub async fn on_hand(
        &self,
        cabinet_id: &str,
        slot_no: i32,
    ) -> Result<OnHandSummary, ServiceError> {
        let db = &*self.db_pool;

        let row = slot_delta::Entity::find()
            .select_only()
            .column_as(slot_delta::Column::DeltaQty.sum(), "on_hand")
            .column_as(slot_delta::Column::Id.count(), "delta_count")
            .column_as(slot_delta::Column::RecordedAt.max(), "last_recorded_at")
            .filter(slot_delta::Column::CabinetId.eq(cabinet_id))
            .filter(slot_delta::Column::SlotNo.eq(slot_no))
            .into_model::<OnHandRow>()
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let row = row.unwrap_or(OnHandRow {
            on_hand: None,
            delta_count: 0,
            last_recorded_at: None,
        });

        Ok(OnHandSummary {
            cabinet_id: cabinet_id.to_string(),
            slot_no,
            on_hand: row.on_hand.unwrap_or(0),
            delta_count: row.delta_count.max(0) as u64,
            last_recorded_at: row.last_recorded_at,
        })
    }

    /// Lists raw deltas for audit, newest first.
    #[instrument(skip(self, filter))]
    pub async fn list_deltas(
        &self,
        filter: DeltaFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<slot_delta::Model>, u64), ServiceError> {
        let db = &*self.db_pool;

        let mut query = slot_delta::Entity::find();

        if let Some(sign) = filter.sign {
            query = match sign {
                DeltaSign::Take => query.filter(slot_delta::Column::DeltaQty.lt(0)),
                DeltaSign::Refill => query.filter(slot_delta::Column::DeltaQty.gt(0)),
            };
        }
        if let Some(cabinet_id) = filter.cabinet_id {
            query = query.filter(slot_delta::Column::CabinetId.eq(cabinet_id));
        }
        if let Some(item_code) = filter.item_code {
            query = query.filter(slot_delta::Column::ItemCode.eq(item_code));
        }
        if let Some(from) = filter.recorded_from {
            query = query.filter(slot_delta::Column::RecordedAt.gte(from));
        }
        if let Some(to) = filter.recorded_to {
            query = query.filter(slot_delta::Column::RecordedAt.lt(to));
        }

        let paginator = query
            .order_by_desc(slot_delta::Column::RecordedAt)
            .paginate(db, limit);

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let deltas = paginator
            .fetch_page(page.max(1) - 1)
            .await
            .map_err(ServiceError::db_error)?;

        Ok((deltas, total))
    }
}
