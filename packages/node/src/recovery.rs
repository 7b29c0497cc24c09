//! Startup sweep for rows a dead process left in flight.

use common::{ContentStatus, TransitionKind};
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};
use tracing::{info, warn};

use crate::entity::content;
use crate::lifecycle::{Lifecycle, TransitionError};

pub const INTERRUPTED: &str = "interrupted by restart";

/// Move every in-flight content to its failure status. Returns the ids moved; a second run finds
/// nothing to do.
pub async fn sweep_interrupted(db: &DatabaseConnection) -> Result<Vec<i32>, DbErr> {
    let stuck = content::Entity::find()
        .filter(content::Column::Status.is_in(ContentStatus::IN_FLIGHT.iter().copied()))
        .all(db)
        .await?;

    let lifecycle = Lifecycle::new(db);
    let mut moved = Vec::with_capacity(stuck.len());
    for row in stuck {
        let Some(to) = row.status.interrupted() else {
            continue;
        };
        match lifecycle
            .transition(
                row.id,
                row.status,
                to,
                TransitionKind::Recovery,
                Some(INTERRUPTED.to_string()),
            )
            .await
        {
            Ok(_) => moved.push(row.id),
            Err(TransitionError::Db(e)) => return Err(e),
            Err(e) => warn!(content_id = row.id, error = %e, "Skipped during recovery"),
        }
    }

    if !moved.is_empty() {
        info!(count = moved.len(), "Recovered interrupted content");
    }
    Ok(moved)
}
