//! Persistence gateway for the cirrus pipeline.
//!
//! The collection core consumes storage only through [`PersistenceGateway`]:
//! profile reads, one bulk insert per record kind per run, generation lookups,
//! generation- and profile-scoped reads, and retention deletes.
//!
//! Two implementations ship here: [`MemoryGateway`] for tests and offline runs,
//! and [`JsonGateway`], which snapshots every table to a JSON file through
//! [`JsonStore`] on each write.

#![forbid(unsafe_code)]

pub mod json;
pub mod memory;
pub mod query;
mod tables;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cirrus_proto::{
    Generation, Profile, ProfileId, Provider, Recommendation, RecommendationError, ResourceInventory,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub use json::JsonGateway;
pub use memory::MemoryGateway;
pub use query::{
    ErrorView, InventoryView, RecommendationView, latest_errors, latest_inventories,
    latest_recommendations,
};

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt state file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type PersistResult<T> = Result<T, PersistError>;

// ─── Gateway Contract ─────────────────────────────────────────────────────────

/// Rows removed by one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub recommendations: usize,
    pub errors: usize,
    pub inventories: usize,
}

/// Storage operations consumed by the collection core.
///
/// The two bulk inserts are independent: a reader racing an in-flight run may
/// see the recommendations of a generation before its errors.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Profiles of one provider, optionally only those selected for scanning.
    async fn list_profiles(&self, provider: Provider, selected_only: bool)
    -> PersistResult<Vec<Profile>>;

    /// Bulk insert. An empty batch is a no-op.
    async fn add_recommendations(
        &self,
        provider: Provider,
        batch: Vec<Recommendation>,
    ) -> PersistResult<()>;

    /// Bulk insert. An empty batch is a no-op.
    async fn add_recommendation_errors(
        &self,
        provider: Provider,
        batch: Vec<RecommendationError>,
    ) -> PersistResult<()>;

    /// Bulk insert. An empty batch is a no-op.
    async fn add_inventories(
        &self,
        provider: Provider,
        batch: Vec<ResourceInventory>,
    ) -> PersistResult<()>;

    /// Highest generation stored for the provider across recommendations and
    /// errors, or [`Generation::ZERO`] when nothing is stored. Inventories do
    /// not number runs.
    async fn last_generation(&self, provider: Provider) -> PersistResult<Generation>;

    /// Recommendations of one generation. An empty `profiles` slice matches
    /// every profile.
    async fn recommendations_by_generation_and_profiles(
        &self,
        provider: Provider,
        generation: Generation,
        profiles: &[ProfileId],
    ) -> PersistResult<Vec<Recommendation>>;

    /// Errors filtered by generation when given and by profile when the slice
    /// is non-empty. Run-level errors (no profile) match every profile filter.
    async fn errors_by_generation_or_profiles(
        &self,
        provider: Provider,
        generation: Option<Generation>,
        profiles: &[ProfileId],
    ) -> PersistResult<Vec<RecommendationError>>;

    /// Inventories of one generation. An empty `profiles` slice matches every
    /// profile.
    async fn inventories_by_generation_and_profiles(
        &self,
        provider: Provider,
        generation: Generation,
        profiles: &[ProfileId],
    ) -> PersistResult<Vec<ResourceInventory>>;

    /// Remove every record of the provider created before `cutoff`.
    async fn delete_older_than(
        &self,
        provider: Provider,
        cutoff: DateTime<Utc>,
    ) -> PersistResult<RetentionReport>;
}

// ─── JSON Store ───────────────────────────────────────────────────────────────

/// A JSON file holding one table as an array of records.
///
/// Lives at `{state_path}/state/{table}.json`. Writes go to a sibling temp file
/// first and are renamed into place.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(state_path: &Path, table: &str) -> Self {
        let path = state_path.join("state").join(format!("{table}.json"));
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every record. A missing file is an empty table; a corrupt one is
    /// an error rather than silently dropped history.
    pub fn load<T: DeserializeOwned>(&self) -> PersistResult<Vec<T>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no state file, starting empty");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(PersistError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_str(&content).map_err(|source| PersistError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the table on disk. Creates directories as needed.
    pub fn save<T: Serialize>(&self, records: &[T]) -> PersistResult<()> {
        let io_err = |source| PersistError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(records).map_err(|source| PersistError::Json {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}
