use tracing::{debug, info};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{Interaction, InteractionFilter, InteractionKind, ItemRef, RecordOutcome};
use crate::store::RecommendationStore;

/// Records one interaction event. Nothing is recomputed here; the next
/// refresh cycle picks the change up.
pub async fn record_interaction(
    store: &dyn RecommendationStore,
    user_id: Uuid,
    article_id: Option<Uuid>,
    job_id: Option<Uuid>,
    kind: InteractionKind,
) -> Result<RecordOutcome, LedgerError> {
    let target = ItemRef::from_parts(article_id, job_id)?;
    let outcome = store.record_interaction(user_id, target, kind).await?;

    match &outcome {
        RecordOutcome::Created(_) => {
            info!(%user_id, %target, %kind, "interaction created");
        }
        RecordOutcome::KindAdded(interaction) => {
            info!(%user_id, %target, %kind, score = interaction.score, "interaction kind added");
        }
        RecordOutcome::AlreadyRecorded(_) => {
            debug!(%user_id, %target, %kind, "interaction already recorded");
        }
    }

    Ok(outcome)
}

pub async fn find_interactions(
    store: &dyn RecommendationStore,
    user_id: Uuid,
    filter: InteractionFilter,
) -> Result<Vec<Interaction>, LedgerError> {
    Ok(store.find_interactions(user_id, &filter).await?)
}

pub async fn has_interaction(
    store: &dyn RecommendationStore,
    user_id: Uuid,
    target: ItemRef,
    kind: InteractionKind,
) -> Result<bool, LedgerError> {
    let filter = InteractionFilter {
        target: Some(target),
        kind: Some(kind),
        ..Default::default()
    };
    Ok(!store.find_interactions(user_id, &filter).await?.is_empty())
}
