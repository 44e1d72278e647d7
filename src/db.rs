use std::collections::BTreeSet;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{LedgerError, StoreError};
use crate::ledger;
use crate::models::{
    Interaction, InteractionFilter, InteractionKind, ItemClass, ItemRef, Publication,
    Recommendation, RecordOutcome, Snapshot,
};
use crate::store::RecommendationStore;

const INTERACTION_COLUMNS: &str = "id, user_id, article_id, job_id, kinds, score, recorded_at";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn item_column(class: ItemClass) -> &'static str {
    match class {
        ItemClass::Article => "article_id",
        ItemClass::Job => "job_id",
    }
}

fn interaction_from_row(row: &PgRow) -> Result<Interaction, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let target = ItemRef::from_parts(row.try_get("article_id")?, row.try_get("job_id")?)
        .map_err(|err| StoreError::Corrupt(format!("interaction {id}: {err}")))?;
    let kinds: BTreeSet<InteractionKind> = row
        .try_get::<Vec<String>, _>("kinds")?
        .iter()
        .map(|kind| kind.parse::<InteractionKind>())
        .collect::<Result<_, _>>()
        .map_err(|err| StoreError::Corrupt(format!("interaction {id}: {err}")))?;

    Ok(Interaction {
        id,
        user_id: row.try_get("user_id")?,
        target,
        kinds,
        score: row.try_get("score")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

#[async_trait]
impl RecommendationStore for PgStore {
    async fn record_interaction(
        &self,
        user_id: Uuid,
        target: ItemRef,
        kind: InteractionKind,
    ) -> Result<RecordOutcome, StoreError> {
        let column = item_column(target.class());

        // Insert, or append the kind only when absent. No returned row means
        // the kind was already recorded for this pair.
        let upsert = format!(
            r#"
            INSERT INTO recommendation_refresh.interactions AS i
            (id, user_id, {column}, kinds, score)
            VALUES ($1, $2, $3, ARRAY[$4::TEXT], 1)
            ON CONFLICT (user_id, {column}) WHERE {column} IS NOT NULL DO UPDATE
            SET kinds = array_append(i.kinds, $4::TEXT),
                score = i.score + 1,
                recorded_at = now()
            WHERE NOT ($4::TEXT = ANY(i.kinds))
            RETURNING {INTERACTION_COLUMNS}, (xmax = 0) AS inserted
            "#
        );

        let row = sqlx::query(&upsert)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(target.id())
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| {
                if is_foreign_key_violation(&err) {
                    StoreError::UnknownUser(user_id)
                } else {
                    StoreError::Database(err)
                }
            })?;

        if let Some(row) = row {
            let interaction = interaction_from_row(&row)?;
            let inserted: bool = row.try_get("inserted")?;
            return Ok(if inserted {
                RecordOutcome::Created(interaction)
            } else {
                RecordOutcome::KindAdded(interaction)
            });
        }

        let existing = sqlx::query(&format!(
            "SELECT {INTERACTION_COLUMNS} FROM recommendation_refresh.interactions \
             WHERE user_id = $1 AND {column} = $2"
        ))
        .bind(user_id)
        .bind(target.id())
        .fetch_one(&self.pool)
        .await?;

        Ok(RecordOutcome::AlreadyRecorded(interaction_from_row(&existing)?))
    }

    async fn find_interactions(
        &self,
        user_id: Uuid,
        filter: &InteractionFilter,
    ) -> Result<Vec<Interaction>, StoreError> {
        let mut query = format!(
            "SELECT {INTERACTION_COLUMNS} FROM recommendation_refresh.interactions WHERE user_id = $1"
        );
        let mut next_param = 2;

        if let Some(class) = filter.class {
            query.push_str(&format!(" AND {} IS NOT NULL", item_column(class)));
        }
        if let Some(target) = filter.target {
            query.push_str(&format!(" AND {} = ${next_param}", item_column(target.class())));
            next_param += 1;
        }
        if filter.kind.is_some() {
            query.push_str(&format!(" AND ${next_param}::TEXT = ANY(kinds)"));
        }
        query.push_str(" ORDER BY recorded_at DESC");

        let mut rows = sqlx::query(&query).bind(user_id);
        if let Some(target) = filter.target {
            rows = rows.bind(target.id());
        }
        if let Some(kind) = filter.kind {
            rows = rows.bind(kind.as_str());
        }

        rows.fetch_all(&self.pool)
            .await?
            .iter()
            .map(interaction_from_row)
            .collect()
    }

    async fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let users: Vec<Uuid> =
            sqlx::query_scalar("SELECT id FROM recommendation_refresh.users ORDER BY created_at, id")
                .fetch_all(&mut *tx)
                .await?;
        let articles: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM recommendation_refresh.articles ORDER BY created_at, id",
        )
        .fetch_all(&mut *tx)
        .await?;
        let jobs: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM recommendation_refresh.job_listings ORDER BY created_at, id",
        )
        .fetch_all(&mut *tx)
        .await?;
        let interactions = sqlx::query(&format!(
            "SELECT {INTERACTION_COLUMNS} FROM recommendation_refresh.interactions"
        ))
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(interaction_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        tx.commit().await?;

        Ok(Snapshot {
            users,
            articles,
            jobs,
            interactions,
        })
    }

    async fn publish(&self, publication: &Publication) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO recommendation_refresh.recommendations AS r
            (user_id, recommended_articles, recommended_jobs, updated_at)
            VALUES ($1, COALESCE($2::UUID[], '{}'), COALESCE($3::UUID[], '{}'), $4)
            ON CONFLICT (user_id) DO UPDATE
            SET recommended_articles = COALESCE($2::UUID[], r.recommended_articles),
                recommended_jobs = COALESCE($3::UUID[], r.recommended_jobs),
                updated_at = $4
            "#,
        )
        .bind(publication.user_id)
        .bind(publication.articles.as_deref())
        .bind(publication.jobs.as_deref())
        .bind(publication.published_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_recommendations(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Recommendation>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, recommended_articles, recommended_jobs, updated_at
            FROM recommendation_refresh.recommendations
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Recommendation {
                user_id: row.try_get("user_id")?,
                ranked_article_ids: row.try_get("recommended_articles")?,
                ranked_job_ids: row.try_get("recommended_jobs")?,
                updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            })
        })
        .transpose()
    }
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let users = vec![
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "Avery Lee",
            "avery.lee@example.com",
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "Jules Moreno",
            "jules.moreno@example.com",
        ),
        (
            Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?,
            "Kiara Patel",
            "kiara.patel@example.com",
        ),
    ];

    let mut user_ids = Vec::new();
    for (id, name, email) in users {
        let user_id: Uuid = sqlx::query(
            r#"
            INSERT INTO recommendation_refresh.users (id, full_name, email)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO UPDATE SET full_name = EXCLUDED.full_name
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .fetch_one(pool)
        .await?
        .get("id");
        user_ids.push(user_id);
    }

    let articles = vec![
        (
            Uuid::parse_str("6b1f7c1e-8d2a-4c55-9a57-0f5e2b7d3a11")?,
            "Scaling a mentorship program",
        ),
        (
            Uuid::parse_str("9e4d2a73-5b1c-4f0e-8c6d-2a7b9f3e4d22")?,
            "Writing a portfolio that gets read",
        ),
        (
            Uuid::parse_str("c2a85f19-7e3d-4b6a-a1f2-5d9c8e7b6a33")?,
            "Negotiating your first offer",
        ),
    ];
    for (id, title) in articles {
        sqlx::query(
            r#"
            INSERT INTO recommendation_refresh.articles (id, title)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET title = EXCLUDED.title
            "#,
        )
        .bind(id)
        .bind(title)
        .execute(pool)
        .await?;
    }

    let jobs = vec![
        (
            Uuid::parse_str("1f3e5d7c-9b2a-4d6e-8f1a-3c5e7b9d2f44")?,
            "Backend Engineer",
        ),
        (
            Uuid::parse_str("4a6c8e1f-3b5d-4f7a-9c2e-6d8f1a3c5e55")?,
            "Data Analyst",
        ),
    ];
    for (id, title) in jobs {
        sqlx::query(
            r#"
            INSERT INTO recommendation_refresh.job_listings (id, title)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET title = EXCLUDED.title
            "#,
        )
        .bind(id)
        .bind(title)
        .execute(pool)
        .await?;
    }

    let store = PgStore::new(pool.clone());
    let article_ids = [
        Uuid::parse_str("6b1f7c1e-8d2a-4c55-9a57-0f5e2b7d3a11")?,
        Uuid::parse_str("9e4d2a73-5b1c-4f0e-8c6d-2a7b9f3e4d22")?,
    ];
    let job_id = Uuid::parse_str("1f3e5d7c-9b2a-4d6e-8f1a-3c5e7b9d2f44")?;
    let events = [
        (user_ids[0], Some(article_ids[0]), None, InteractionKind::Viewed),
        (user_ids[0], Some(article_ids[0]), None, InteractionKind::Liked),
        (user_ids[0], Some(article_ids[1]), None, InteractionKind::Viewed),
        (user_ids[1], None, Some(job_id), InteractionKind::Viewed),
        (user_ids[1], None, Some(job_id), InteractionKind::Applied),
        (user_ids[2], Some(article_ids[1]), None, InteractionKind::Commented),
    ];
    for (user_id, article_id, job_id, kind) in events {
        ledger::record_interaction(&store, user_id, article_id, job_id, kind).await?;
    }

    Ok(())
}

#[derive(Debug, Default)]
pub struct ImportSummary {
    pub recorded: usize,
    pub already_recorded: usize,
    pub rejected: usize,
}

/// Replays interaction events from a CSV file with columns
/// `user_id,article_id,job_id,kind` through the ledger write path.
pub async fn import_csv(
    store: &dyn RecommendationStore,
    csv_path: &std::path::Path,
) -> anyhow::Result<ImportSummary> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        user_id: Uuid,
        article_id: Option<Uuid>,
        job_id: Option<Uuid>,
        kind: String,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut summary = ImportSummary::default();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("invalid CSV row at line {line}"))?;
        let kind = match row.kind.parse::<InteractionKind>() {
            Ok(kind) => kind,
            Err(err) => {
                tracing::warn!(line, error = %err, "skipping row");
                summary.rejected += 1;
                continue;
            }
        };

        match ledger::record_interaction(store, row.user_id, row.article_id, row.job_id, kind).await {
            Ok(outcome) if outcome.is_already_recorded() => summary.already_recorded += 1,
            Ok(_) => summary.recorded += 1,
            Err(LedgerError::InvalidReference(reason)) => {
                tracing::warn!(line, %reason, "skipping row");
                summary.rejected += 1;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to record line {line}"));
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn import_counts_each_outcome() {
        let store = MemoryStore::default();
        let user = store.add_user();
        let article = store.add_article();
        let job = store.add_job();

        let path = std::env::temp_dir().join(format!("interactions-{}.csv", Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "user_id,article_id,job_id,kind").unwrap();
        writeln!(file, "{user},{article},,viewed").unwrap();
        writeln!(file, "{user},{article},,liked").unwrap();
        writeln!(file, "{user},{article},,liked").unwrap();
        writeln!(file, "{user},,{job},applied").unwrap();
        writeln!(file, "{user},,,viewed").unwrap();
        writeln!(file, "{user},{article},{job},viewed").unwrap();
        writeln!(file, "{user},{article},,shared").unwrap();
        drop(file);

        let summary = import_csv(&store, &path).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(summary.recorded, 3);
        assert_eq!(summary.already_recorded, 1);
        assert_eq!(summary.rejected, 3);
    }

    #[tokio::test]
    async fn import_stops_on_unknown_user() {
        let store = MemoryStore::default();
        let article = store.add_article();

        let path = std::env::temp_dir().join(format!("interactions-{}.csv", Uuid::new_v4()));
        std::fs::write(
            &path,
            format!("user_id,article_id,job_id,kind\n{},{article},,viewed\n", Uuid::new_v4()),
        )
        .unwrap();

        let result = import_csv(&store, &path).await;
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }

    async fn insert_user(pool: &PgPool) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO recommendation_refresh.users (id, full_name, email) VALUES ($1, $2, $3)")
            .bind(id)
            .bind("Test User")
            .bind(format!("{id}@example.com"))
            .execute(pool)
            .await
            .unwrap();
        id
    }

    async fn insert_item(pool: &PgPool, table: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(&format!(
            "INSERT INTO recommendation_refresh.{table} (id, title) VALUES ($1, 'Item')"
        ))
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn concurrent_identical_events_count_once(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        let user = insert_user(&pool).await;
        let article = ItemRef::Article(insert_item(&pool, "articles").await);

        let (first, second) = tokio::join!(
            store.record_interaction(user, article, InteractionKind::Viewed),
            store.record_interaction(user, article, InteractionKind::Viewed),
        );
        let outcomes = [first.unwrap(), second.unwrap()];

        assert_eq!(outcomes.iter().filter(|o| matches!(o, RecordOutcome::Created(_))).count(), 1);
        assert_eq!(outcomes.iter().filter(|o| o.is_already_recorded()).count(), 1);

        let stored = store
            .find_interactions(user, &InteractionFilter::default())
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].score, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn distinct_kind_is_appended(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        let user = insert_user(&pool).await;
        let job = ItemRef::Job(insert_item(&pool, "job_listings").await);

        store.record_interaction(user, job, InteractionKind::Viewed).await.unwrap();
        let outcome = store.record_interaction(user, job, InteractionKind::Applied).await.unwrap();

        let RecordOutcome::KindAdded(interaction) = &outcome else {
            panic!("expected KindAdded, got {outcome:?}");
        };
        assert_eq!(interaction.score, 2);
        assert_eq!(
            interaction.kinds,
            BTreeSet::from([InteractionKind::Viewed, InteractionKind::Applied])
        );

        let again = store.record_interaction(user, job, InteractionKind::Applied).await.unwrap();
        assert!(again.is_already_recorded());
        assert_eq!(again.interaction().score, 2);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn unknown_user_is_reported(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        let article = ItemRef::Article(insert_item(&pool, "articles").await);
        let stranger = Uuid::new_v4();

        let err = store
            .record_interaction(stranger, article, InteractionKind::Liked)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownUser(id) if id == stranger));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn skipped_class_keeps_its_published_list(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        let user = insert_user(&pool).await;
        let (a1, a2) = (Uuid::new_v4(), Uuid::new_v4());
        let (j1, j2) = (Uuid::new_v4(), Uuid::new_v4());

        store
            .publish(&Publication {
                user_id: user,
                articles: Some(vec![a1, a2]),
                jobs: Some(vec![j1]),
                published_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .publish(&Publication {
                user_id: user,
                articles: None,
                jobs: Some(vec![j2, j1]),
                published_at: Utc::now(),
            })
            .await
            .unwrap();

        let stored = store.get_recommendations(user).await.unwrap().unwrap();
        assert_eq!(stored.ranked_article_ids, vec![a1, a2]);
        assert_eq!(stored.ranked_job_ids, vec![j2, j1]);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn first_publish_of_a_skipped_class_is_empty(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        let user = insert_user(&pool).await;
        let job = Uuid::new_v4();

        store
            .publish(&Publication {
                user_id: user,
                articles: None,
                jobs: Some(vec![job]),
                published_at: Utc::now(),
            })
            .await
            .unwrap();

        let stored = store.get_recommendations(user).await.unwrap().unwrap();
        assert!(stored.ranked_article_ids.is_empty());
        assert_eq!(stored.ranked_job_ids, vec![job]);
        assert!(store.get_recommendations(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn find_interactions_combines_filters(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        let user = insert_user(&pool).await;
        let other = insert_user(&pool).await;
        let (a1, a2) = (
            insert_item(&pool, "articles").await,
            insert_item(&pool, "articles").await,
        );
        let job = insert_item(&pool, "job_listings").await;

        for (who, target, kind) in [
            (user, ItemRef::Article(a1), InteractionKind::Viewed),
            (user, ItemRef::Article(a1), InteractionKind::Liked),
            (user, ItemRef::Article(a2), InteractionKind::Viewed),
            (user, ItemRef::Job(job), InteractionKind::Liked),
            (other, ItemRef::Article(a1), InteractionKind::Liked),
        ] {
            store.record_interaction(who, target, kind).await.unwrap();
        }

        let liked_articles = InteractionFilter {
            class: Some(ItemClass::Article),
            kind: Some(InteractionKind::Liked),
            ..Default::default()
        };
        let found = store.find_interactions(user, &liked_articles).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].target, ItemRef::Article(a1));

        let exact = InteractionFilter {
            class: Some(ItemClass::Article),
            target: Some(ItemRef::Article(a2)),
            kind: Some(InteractionKind::Viewed),
        };
        let found = store.find_interactions(user, &exact).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].score, 1);

        let no_match = InteractionFilter {
            target: Some(ItemRef::Article(a2)),
            kind: Some(InteractionKind::Liked),
            ..Default::default()
        };
        assert!(store.find_interactions(user, &no_match).await.unwrap().is_empty());

        assert_eq!(
            store.find_interactions(user, &InteractionFilter::default()).await.unwrap().len(),
            3
        );
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn snapshot_keeps_stale_interactions(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        let user = insert_user(&pool).await;
        let kept = insert_item(&pool, "articles").await;
        let removed = insert_item(&pool, "articles").await;
        store
            .record_interaction(user, ItemRef::Article(removed), InteractionKind::Viewed)
            .await
            .unwrap();
        sqlx::query("DELETE FROM recommendation_refresh.articles WHERE id = $1")
            .bind(removed)
            .execute(&pool)
            .await
            .unwrap();

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.users, vec![user]);
        assert_eq!(snapshot.articles, vec![kept]);
        assert_eq!(snapshot.interactions.len(), 1);
        assert_eq!(snapshot.interactions[0].target, ItemRef::Article(removed));
    }
}
