//! In-process gateway backed by lock-guarded vectors.

use crate::tables::ProviderTables;
use crate::{PersistResult, PersistenceGateway, RetentionReport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cirrus_proto::{
    Generation, Profile, ProfileId, Provider, Recommendation, RecommendationError, ResourceInventory,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct MemoryGateway {
    profiles: RwLock<Vec<Profile>>,
    tables: RwLock<HashMap<Provider, ProviderTables>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a profile, replacing any profile with the same id.
    pub fn insert_profile(&self, profile: Profile) {
        let mut profiles = self.profiles.write();
        profiles.retain(|p| p.id != profile.id);
        profiles.push(profile);
    }

    pub fn recommendation_count(&self, provider: Provider) -> usize {
        self.tables
            .read()
            .get(&provider)
            .map_or(0, |t| t.recommendations.len())
    }

    pub fn error_count(&self, provider: Provider) -> usize {
        self.tables.read().get(&provider).map_or(0, |t| t.errors.len())
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn list_profiles(
        &self,
        provider: Provider,
        selected_only: bool,
    ) -> PersistResult<Vec<Profile>> {
        Ok(self
            .profiles
            .read()
            .iter()
            .filter(|p| p.provider() == provider && (!selected_only || p.selected))
            .cloned()
            .collect())
    }

    async fn add_recommendations(
        &self,
        provider: Provider,
        batch: Vec<Recommendation>,
    ) -> PersistResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        debug!(%provider, count = batch.len(), "storing recommendations");
        self.tables
            .write()
            .entry(provider)
            .or_default()
            .recommendations
            .extend(batch);
        Ok(())
    }

    async fn add_recommendation_errors(
        &self,
        provider: Provider,
        batch: Vec<RecommendationError>,
    ) -> PersistResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        debug!(%provider, count = batch.len(), "storing recommendation errors");
        self.tables
            .write()
            .entry(provider)
            .or_default()
            .errors
            .extend(batch);
        Ok(())
    }

    async fn add_inventories(
        &self,
        provider: Provider,
        batch: Vec<ResourceInventory>,
    ) -> PersistResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        debug!(%provider, count = batch.len(), "storing inventories");
        self.tables
            .write()
            .entry(provider)
            .or_default()
            .inventories
            .extend(batch);
        Ok(())
    }

    async fn last_generation(&self, provider: Provider) -> PersistResult<Generation> {
        Ok(self
            .tables
            .read()
            .get(&provider)
            .map_or(Generation::ZERO, ProviderTables::last_generation))
    }

    async fn recommendations_by_generation_and_profiles(
        &self,
        provider: Provider,
        generation: Generation,
        profiles: &[ProfileId],
    ) -> PersistResult<Vec<Recommendation>> {
        Ok(self
            .tables
            .read()
            .get(&provider)
            .map(|t| t.recommendations_for(generation, profiles))
            .unwrap_or_default())
    }

    async fn errors_by_generation_or_profiles(
        &self,
        provider: Provider,
        generation: Option<Generation>,
        profiles: &[ProfileId],
    ) -> PersistResult<Vec<RecommendationError>> {
        Ok(self
            .tables
            .read()
            .get(&provider)
            .map(|t| t.errors_for(generation, profiles))
            .unwrap_or_default())
    }

    async fn inventories_by_generation_and_profiles(
        &self,
        provider: Provider,
        generation: Generation,
        profiles: &[ProfileId],
    ) -> PersistResult<Vec<ResourceInventory>> {
        Ok(self
            .tables
            .read()
            .get(&provider)
            .map(|t| t.inventories_for(generation, profiles))
            .unwrap_or_default())
    }

    async fn delete_older_than(
        &self,
        provider: Provider,
        cutoff: DateTime<Utc>,
    ) -> PersistResult<RetentionReport> {
        Ok(self
            .tables
            .write()
            .get_mut(&provider)
            .map(|t| t.delete_older_than(cutoff))
            .unwrap_or_default())
    }
}
