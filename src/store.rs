use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    Interaction, InteractionFilter, InteractionKind, ItemRef, Publication, Recommendation,
    RecordOutcome, Snapshot,
};

/// Persistence seam shared by the interaction write path, the refresh cycle
/// and the serving accessor.
#[async_trait]
pub trait RecommendationStore: Send + Sync {
    /// Append-if-absent for one kind on one (user, item) pair. Must be atomic
    /// with respect to concurrent callers.
    async fn record_interaction(
        &self,
        user_id: Uuid,
        target: ItemRef,
        kind: InteractionKind,
    ) -> Result<RecordOutcome, StoreError>;

    async fn find_interactions(
        &self,
        user_id: Uuid,
        filter: &InteractionFilter,
    ) -> Result<Vec<Interaction>, StoreError>;

    /// Users, both catalogs and the ledger as of a single point in time.
    async fn snapshot(&self) -> Result<Snapshot, StoreError>;

    async fn publish(&self, publication: &Publication) -> Result<(), StoreError>;

    async fn get_recommendations(&self, user_id: Uuid)
        -> Result<Option<Recommendation>, StoreError>;
}

#[cfg(test)]
pub(crate) mod memory {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct State {
        users: Vec<Uuid>,
        articles: Vec<Uuid>,
        jobs: Vec<Uuid>,
        interactions: Vec<Interaction>,
        recommendations: HashMap<Uuid, Recommendation>,
        failing_publishes: HashSet<Uuid>,
    }

    /// In-memory store for exercising the pipeline without Postgres.
    #[derive(Default)]
    pub struct MemoryStore {
        state: Mutex<State>,
    }

    impl MemoryStore {
        fn lock(&self) -> std::sync::MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        }

        pub fn add_user(&self) -> Uuid {
            let id = Uuid::new_v4();
            self.lock().users.push(id);
            id
        }

        pub fn add_article(&self) -> Uuid {
            let id = Uuid::new_v4();
            self.lock().articles.push(id);
            id
        }

        pub fn add_job(&self) -> Uuid {
            let id = Uuid::new_v4();
            self.lock().jobs.push(id);
            id
        }

        pub fn remove_article(&self, id: Uuid) {
            self.lock().articles.retain(|article| *article != id);
        }

        pub fn fail_publish_for(&self, user_id: Uuid) {
            self.lock().failing_publishes.insert(user_id);
        }

        pub fn recommendation(&self, user_id: Uuid) -> Option<Recommendation> {
            self.lock().recommendations.get(&user_id).cloned()
        }
    }

    #[async_trait]
    impl RecommendationStore for MemoryStore {
        async fn record_interaction(
            &self,
            user_id: Uuid,
            target: ItemRef,
            kind: InteractionKind,
        ) -> Result<RecordOutcome, StoreError> {
            let mut state = self.lock();
            if !state.users.contains(&user_id) {
                return Err(StoreError::UnknownUser(user_id));
            }

            let existing = state
                .interactions
                .iter()
                .position(|entry| entry.user_id == user_id && entry.target == target);

            match existing {
                Some(index) => {
                    let entry = &mut state.interactions[index];
                    if entry.observe(kind) {
                        Ok(RecordOutcome::KindAdded(entry.clone()))
                    } else {
                        Ok(RecordOutcome::AlreadyRecorded(entry.clone()))
                    }
                }
                None => {
                    let entry = Interaction::first(user_id, target, kind);
                    state.interactions.push(entry.clone());
                    Ok(RecordOutcome::Created(entry))
                }
            }
        }

        async fn find_interactions(
            &self,
            user_id: Uuid,
            filter: &InteractionFilter,
        ) -> Result<Vec<Interaction>, StoreError> {
            Ok(self
                .lock()
                .interactions
                .iter()
                .filter(|entry| entry.user_id == user_id && filter.matches(entry))
                .cloned()
                .collect())
        }

        async fn snapshot(&self) -> Result<Snapshot, StoreError> {
            let state = self.lock();
            Ok(Snapshot {
                users: state.users.clone(),
                articles: state.articles.clone(),
                jobs: state.jobs.clone(),
                interactions: state.interactions.clone(),
            })
        }

        async fn publish(&self, publication: &Publication) -> Result<(), StoreError> {
            let mut state = self.lock();
            if state.failing_publishes.contains(&publication.user_id) {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }

            let record = state
                .recommendations
                .entry(publication.user_id)
                .or_insert_with(|| Recommendation {
                    user_id: publication.user_id,
                    ranked_article_ids: Vec::new(),
                    ranked_job_ids: Vec::new(),
                    updated_at: publication.published_at,
                });
            if let Some(articles) = &publication.articles {
                record.ranked_article_ids = articles.clone();
            }
            if let Some(jobs) = &publication.jobs {
                record.ranked_job_ids = jobs.clone();
            }
            record.updated_at = publication.published_at;
            Ok(())
        }

        async fn get_recommendations(
            &self,
            user_id: Uuid,
        ) -> Result<Option<Recommendation>, StoreError> {
            Ok(self.recommendation(user_id))
        }
    }
}
