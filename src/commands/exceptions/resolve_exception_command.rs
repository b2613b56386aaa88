use crate::{
    commands::claims::send_event,
    commands::Command,
    db::DbPool,
    entities::claim_exception,
    errors::ServiceError,
    events::{Event, EventSender},
};
use sea_orm::{Set, *};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Marks an exception investigated. Resolving twice is a no-op so ward
/// coordinators can close from a stale list without errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveExceptionCommand {
    pub exception_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveExceptionResult {
    pub exception: claim_exception::Model,
    pub already_resolved: bool,
}

#[async_trait::async_trait]
impl Command for ResolveExceptionCommand {
    type Result = ResolveExceptionResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        let db = db_pool.as_ref();

        let found = claim_exception::Entity::find_by_id(self.exception_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("exception {} not found", self.exception_id))
            })?;

        if found.resolved {
            return Ok(ResolveExceptionResult {
                exception: found,
                already_resolved: true,
            });
        }

        let mut active: claim_exception::ActiveModel = found.into();
        active.resolved = Set(true);
        let updated = active
            .update(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        info!(
            exception_id = %updated.id,
            reason = %updated.reason,
            item_code = %updated.item_code,
            "exception resolved"
        );
        send_event(&event_sender, Event::ExceptionResolved(updated.id)).await?;

        Ok(ResolveExceptionResult {
            exception: updated,
            already_resolved: false,
        })
    }
}
