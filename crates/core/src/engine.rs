//! Per-entity glue: rolling state in, feature rows and a new checkpoint out.

use serde::{Deserialize, Serialize};

use crate::aggregate::DailyAggregate;
use crate::checkpoint::Checkpoint;
use crate::error::{Error, Result};
use crate::events::EntityProfile;
use crate::features::{derive, FeatureContext, FeatureRow};
use crate::rolling::RollingState;

/// Everything needed to advance one entity.
#[derive(Debug, Clone, Default)]
pub struct EntityInput {
    pub entity_id: String,
    /// New daily aggregates, ascending by date
    pub days: Vec<DailyAggregate>,
    pub profile: Option<EntityProfile>,
    pub checkpoint: Option<Checkpoint>,
    /// The caller knows this entity has days before `days`
    pub expects_history: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityOutput {
    pub entity_id: String,
    pub rows: Vec<FeatureRow>,
    /// `None` only when the entity had neither a checkpoint nor new days
    pub checkpoint: Option<Checkpoint>,
}

/// Resumes (or starts) the entity's rolling state, runs the new days through
/// it, and derives one feature row per day.
///
/// Nothing is returned until the whole pass succeeds, so a failed entity
/// leaves no partial output behind.
pub fn process_entity(input: EntityInput, ctx: &FeatureContext) -> Result<EntityOutput> {
    let EntityInput {
        entity_id,
        days,
        profile,
        checkpoint,
        expects_history,
    } = input;

    let mut state = match checkpoint {
        Some(checkpoint) if checkpoint.entity_id != entity_id => {
            return Err(Error::checkpoint_corrupt(
                &entity_id,
                format!("checkpoint belongs to entity '{}'", checkpoint.entity_id),
            ));
        }
        Some(checkpoint) => RollingState::resume(checkpoint)?,
        None if expects_history => return Err(Error::checkpoint_missing(&entity_id)),
        None => RollingState::new(entity_id.clone()),
    };

    let rows = state
        .rows(days)
        .map(|row| row.map(|row| derive(&row, profile.as_ref(), ctx)))
        .collect::<Result<Vec<_>>>()?;

    Ok(EntityOutput {
        entity_id,
        rows,
        checkpoint: state.checkpoint(),
    })
}
