use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CycleError, OracleError};
use crate::matrix;
use crate::models::{ItemClass, Publication, Snapshot};
use crate::oracle::{self, ScoringOracle};
use crate::ranker;
use crate::store::RecommendationStore;

#[derive(Debug, Clone, PartialEq)]
pub enum ClassOutcome {
    Ranked { items: usize, stale_interactions: usize },
    Skipped { reason: String },
}

impl ClassOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, ClassOutcome::Skipped { .. })
    }
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub users: usize,
    pub articles: ClassOutcome,
    pub jobs: ClassOutcome,
    pub published: usize,
    pub publish_failures: usize,
}

struct ClassRanking {
    outcome: ClassOutcome,
    rows: Option<Vec<Vec<Uuid>>>,
}

/// One refresh cycle: snapshot, build, score, rank and publish for both item
/// classes.
pub struct RefreshPipeline {
    store: Arc<dyn RecommendationStore>,
    oracle: Arc<dyn ScoringOracle>,
    oracle_timeout: Duration,
    publish_concurrency: usize,
}

impl RefreshPipeline {
    pub fn new(
        store: Arc<dyn RecommendationStore>,
        oracle: Arc<dyn ScoringOracle>,
        oracle_timeout: Duration,
        publish_concurrency: usize,
    ) -> Self {
        Self {
            store,
            oracle,
            oracle_timeout,
            publish_concurrency: publish_concurrency.max(1),
        }
    }

    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let started_at = Utc::now();
        let snapshot = self.store.snapshot().await.map_err(CycleError::Snapshot)?;
        info!(
            users = snapshot.users.len(),
            articles = snapshot.articles.len(),
            jobs = snapshot.jobs.len(),
            interactions = snapshot.interactions.len(),
            "snapshot taken"
        );

        let (articles, jobs) = tokio::join!(
            self.rank_class(&snapshot, ItemClass::Article),
            self.rank_class(&snapshot, ItemClass::Job),
        );

        let (published, publish_failures) = if articles.rows.is_none() && jobs.rows.is_none() {
            warn!("both item classes skipped; nothing published this cycle");
            (0, 0)
        } else {
            self.publish_all(&snapshot.users, articles.rows, jobs.rows).await
        };

        Ok(CycleReport {
            started_at,
            finished_at: Utc::now(),
            users: snapshot.users.len(),
            articles: articles.outcome,
            jobs: jobs.outcome,
            published,
            publish_failures,
        })
    }

    async fn rank_class(&self, snapshot: &Snapshot, class: ItemClass) -> ClassRanking {
        match self.score_class(snapshot, class).await {
            Ok((rows, items, stale_interactions)) => ClassRanking {
                outcome: ClassOutcome::Ranked {
                    items,
                    stale_interactions,
                },
                rows: Some(rows),
            },
            Err(err) => {
                warn!(
                    %class,
                    oracle = self.oracle.name(),
                    error = %err,
                    "skipping item class this cycle"
                );
                ClassRanking {
                    outcome: ClassOutcome::Skipped {
                        reason: err.to_string(),
                    },
                    rows: None,
                }
            }
        }
    }

    async fn score_class(
        &self,
        snapshot: &Snapshot,
        class: ItemClass,
    ) -> Result<(Vec<Vec<Uuid>>, usize, usize), OracleError> {
        let built = matrix::build(snapshot, class);
        if built.stale_interactions > 0 {
            info!(
                class = %built.class,
                stale = built.stale_interactions,
                "ignoring interactions on removed items"
            );
        }

        let predicted =
            oracle::score(self.oracle.as_ref(), &built.matrix, self.oracle_timeout).await?;
        let rows = predicted
            .rows()
            .iter()
            .map(|row| ranker::rank(row, &built.items))
            .collect();

        Ok((rows, built.items.len(), built.stale_interactions))
    }

    async fn publish_all(
        &self,
        users: &[Uuid],
        articles: Option<Vec<Vec<Uuid>>>,
        jobs: Option<Vec<Vec<Uuid>>>,
    ) -> (usize, usize) {
        let published_at = Utc::now();
        let mut articles = articles.map(Vec::into_iter);
        let mut jobs = jobs.map(Vec::into_iter);

        let publications: Vec<Publication> = users
            .iter()
            .map(|user_id| Publication {
                user_id: *user_id,
                articles: articles.as_mut().map(|rows| rows.next().unwrap_or_default()),
                jobs: jobs.as_mut().map(|rows| rows.next().unwrap_or_default()),
                published_at,
            })
            .collect();

        let results: Vec<bool> = stream::iter(publications)
            .map(|publication| async move {
                match self.store.publish(&publication).await {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(
                            user_id = %publication.user_id,
                            error = %err,
                            "failed to publish recommendations"
                        );
                        false
                    }
                }
            })
            .buffer_unordered(self.publish_concurrency)
            .collect()
            .await;

        let published = results.iter().filter(|ok| **ok).count();
        (published, results.len() - published)
    }
}
