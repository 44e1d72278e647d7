use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum ItemClass {
    Article,
    Job,
}

impl ItemClass {
    pub fn label(self) -> &'static str {
        match self {
            ItemClass::Article => "articles",
            ItemClass::Job => "jobs",
        }
    }
}

impl fmt::Display for ItemClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Target of an interaction: exactly one article or one job listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "class", content = "id", rename_all = "lowercase")]
pub enum ItemRef {
    Article(Uuid),
    Job(Uuid),
}

impl ItemRef {
    /// Builds a reference from the loose pair of optional ids request handlers
    /// and CSV rows carry. Exactly one of them must be set.
    pub fn from_parts(article_id: Option<Uuid>, job_id: Option<Uuid>) -> Result<Self, LedgerError> {
        match (article_id, job_id) {
            (Some(id), None) => Ok(ItemRef::Article(id)),
            (None, Some(id)) => Ok(ItemRef::Job(id)),
            (None, None) => Err(LedgerError::InvalidReference(
                "either an article id or a job id must be provided".to_string(),
            )),
            (Some(_), Some(_)) => Err(LedgerError::InvalidReference(
                "an article id and a job id cannot be provided together".to_string(),
            )),
        }
    }

    pub fn class(&self) -> ItemClass {
        match self {
            ItemRef::Article(_) => ItemClass::Article,
            ItemRef::Job(_) => ItemClass::Job,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            ItemRef::Article(id) | ItemRef::Job(id) => *id,
        }
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemRef::Article(id) => write!(f, "article {id}"),
            ItemRef::Job(id) => write!(f, "job {id}"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Viewed,
    Liked,
    Applied,
    Commented,
    Connected,
    Interested,
}

impl InteractionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InteractionKind::Viewed => "viewed",
            InteractionKind::Liked => "liked",
            InteractionKind::Applied => "applied",
            InteractionKind::Commented => "commented",
            InteractionKind::Connected => "connected",
            InteractionKind::Interested => "interested",
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "viewed" => Ok(InteractionKind::Viewed),
            "liked" => Ok(InteractionKind::Liked),
            "applied" => Ok(InteractionKind::Applied),
            "commented" => Ok(InteractionKind::Commented),
            "connected" => Ok(InteractionKind::Connected),
            "interested" => Ok(InteractionKind::Interested),
            other => Err(format!("unknown interaction kind '{other}'")),
        }
    }
}

/// Ledger entry for one (user, item) pair. `score` always equals the number
/// of distinct kinds observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Interaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub target: ItemRef,
    pub kinds: BTreeSet<InteractionKind>,
    pub score: i32,
    pub recorded_at: DateTime<Utc>,
}

impl Interaction {
    pub fn first(user_id: Uuid, target: ItemRef, kind: InteractionKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            target,
            kinds: BTreeSet::from([kind]),
            score: 1,
            recorded_at: Utc::now(),
        }
    }

    /// Adds `kind` if it has not been seen for this pair. Returns false for a
    /// repeat, leaving the entry untouched.
    pub fn observe(&mut self, kind: InteractionKind) -> bool {
        if !self.kinds.insert(kind) {
            return false;
        }
        self.score += 1;
        self.recorded_at = Utc::now();
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Created(Interaction),
    KindAdded(Interaction),
    AlreadyRecorded(Interaction),
}

impl RecordOutcome {
    pub fn interaction(&self) -> &Interaction {
        match self {
            RecordOutcome::Created(interaction)
            | RecordOutcome::KindAdded(interaction)
            | RecordOutcome::AlreadyRecorded(interaction) => interaction,
        }
    }

    pub fn is_already_recorded(&self) -> bool {
        matches!(self, RecordOutcome::AlreadyRecorded(_))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InteractionFilter {
    pub class: Option<ItemClass>,
    pub target: Option<ItemRef>,
    pub kind: Option<InteractionKind>,
}

impl InteractionFilter {
    pub fn matches(&self, interaction: &Interaction) -> bool {
        self.class.map_or(true, |class| interaction.target.class() == class)
            && self.target.map_or(true, |target| interaction.target == target)
            && self.kind.map_or(true, |kind| interaction.kinds.contains(&kind))
    }
}

/// Last-published ranked lists for one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub user_id: Uuid,
    pub ranked_article_ids: Vec<Uuid>,
    pub ranked_job_ids: Vec<Uuid>,
    pub updated_at: DateTime<Utc>,
}

/// One user's upsert. A `None` class was skipped this cycle and keeps its
/// previously published list.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub user_id: Uuid,
    pub articles: Option<Vec<Uuid>>,
    pub jobs: Option<Vec<Uuid>>,
    pub published_at: DateTime<Utc>,
}

/// Point-in-time view of users, catalogs and ledger taken at cycle start.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub users: Vec<Uuid>,
    pub articles: Vec<Uuid>,
    pub jobs: Vec<Uuid>,
    pub interactions: Vec<Interaction>,
}

impl Snapshot {
    pub fn catalog(&self, class: ItemClass) -> &[Uuid] {
        match class {
            ItemClass::Article => &self.articles,
            ItemClass::Job => &self.jobs,
        }
    }
}
