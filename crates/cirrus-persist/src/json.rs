//! Gateway that keeps tables in memory and snapshots them to JSON files.
//!
//! Layout under `{state_path}/state/`:
//! - `profiles.json`
//! - `{provider}_recommendations.json`
//! - `{provider}_errors.json`
//! - `{provider}_inventory.json`
//!
//! File writes run on the blocking pool; one writer at a time.

use crate::tables::ProviderTables;
use crate::{JsonStore, PersistError, PersistResult, PersistenceGateway, RetentionReport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cirrus_proto::{
    Generation, Profile, ProfileId, Provider, Recommendation, RecommendationError, ResourceInventory,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct JsonGateway {
    state_path: PathBuf,
    profiles: RwLock<Vec<Profile>>,
    tables: RwLock<HashMap<Provider, ProviderTables>>,
    /// Held by the one in-flight table write, across its file save.
    writer: tokio::sync::Mutex<()>,
}

impl JsonGateway {
    /// Open the store rooted at `state_path`, loading every table.
    pub fn open(state_path: &Path) -> PersistResult<Self> {
        let profiles: Vec<Profile> = JsonStore::new(state_path, "profiles").load()?;
        let mut tables = HashMap::new();
        for provider in Provider::ALL {
            let t = ProviderTables {
                recommendations: Self::recommendation_store(state_path, provider).load()?,
                errors: Self::error_store(state_path, provider).load()?,
                inventories: Self::inventory_store(state_path, provider).load()?,
            };
            tables.insert(provider, t);
        }
        info!(
            path = %state_path.display(),
            profiles = profiles.len(),
            "opened json state store"
        );
        Ok(Self {
            state_path: state_path.to_path_buf(),
            profiles: RwLock::new(profiles),
            tables: RwLock::new(tables),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    /// Store a profile, replacing any profile with the same id.
    pub fn insert_profile(&self, profile: Profile) -> PersistResult<()> {
        let mut profiles = self.profiles.write();
        let mut next = profiles.clone();
        next.retain(|p| p.id != profile.id);
        next.push(profile);
        JsonStore::new(&self.state_path, "profiles").save(&next)?;
        *profiles = next;
        Ok(())
    }

    fn recommendation_store(state_path: &Path, provider: Provider) -> JsonStore {
        JsonStore::new(state_path, &format!("{provider}_recommendations"))
    }

    fn error_store(state_path: &Path, provider: Provider) -> JsonStore {
        JsonStore::new(state_path, &format!("{provider}_errors"))
    }

    fn inventory_store(state_path: &Path, provider: Provider) -> JsonStore {
        JsonStore::new(state_path, &format!("{provider}_inventory"))
    }

    fn save_tables(state_path: &Path, provider: Provider, tables: &ProviderTables) -> PersistResult<()> {
        Self::recommendation_store(state_path, provider).save(&tables.recommendations)?;
        Self::error_store(state_path, provider).save(&tables.errors)?;
        Self::inventory_store(state_path, provider).save(&tables.inventories)
    }

    /// Apply `change` to a copy of the provider's tables, write the copy on the
    /// blocking pool and swap it in once the save succeeded.
    async fn mutate<R: Send>(
        &self,
        provider: Provider,
        change: impl FnOnce(&mut ProviderTables) -> R + Send,
    ) -> PersistResult<R> {
        let _writer = self.writer.lock().await;
        let mut next = self.tables.read().get(&provider).cloned().unwrap_or_default();
        let out = change(&mut next);

        let state_path = self.state_path.clone();
        let next = tokio::task::spawn_blocking(move || {
            Self::save_tables(&state_path, provider, &next).map(|()| next)
        })
        .await
        .map_err(|e| PersistError::Unavailable(format!("state write task failed: {e}")))??;

        self.tables.write().insert(provider, next);
        Ok(out)
    }

    fn read<R>(&self, provider: Provider, f: impl FnOnce(&ProviderTables) -> R) -> Option<R> {
        self.tables.read().get(&provider).map(f)
    }
}

#[async_trait]
impl PersistenceGateway for JsonGateway {
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
        debug!(%provider, count = batch.len(), "writing recommendations");
        self.mutate(provider, |t| t.recommendations.extend(batch)).await
    }

    async fn add_recommendation_errors(
        &self,
        provider: Provider,
        batch: Vec<RecommendationError>,
    ) -> PersistResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        debug!(%provider, count = batch.len(), "writing recommendation errors");
        self.mutate(provider, |t| t.errors.extend(batch)).await
    }

    async fn add_inventories(
        &self,
        provider: Provider,
        batch: Vec<ResourceInventory>,
    ) -> PersistResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        debug!(%provider, count = batch.len(), "writing inventories");
        self.mutate(provider, |t| t.inventories.extend(batch)).await
    }

    async fn last_generation(&self, provider: Provider) -> PersistResult<Generation> {
        Ok(self
            .read(provider, ProviderTables::last_generation)
            .unwrap_or(Generation::ZERO))
    }

    async fn recommendations_by_generation_and_profiles(
        &self,
        provider: Provider,
        generation: Generation,
        profiles: &[ProfileId],
    ) -> PersistResult<Vec<Recommendation>> {
        Ok(self
            .read(provider, |t| t.recommendations_for(generation, profiles))
            .unwrap_or_default())
    }

    async fn errors_by_generation_or_profiles(
        &self,
        provider: Provider,
        generation: Option<Generation>,
        profiles: &[ProfileId],
    ) -> PersistResult<Vec<RecommendationError>> {
        Ok(self
            .read(provider, |t| t.errors_for(generation, profiles))
            .unwrap_or_default())
    }

    async fn inventories_by_generation_and_profiles(
        &self,
        provider: Provider,
        generation: Generation,
        profiles: &[ProfileId],
    ) -> PersistResult<Vec<ResourceInventory>> {
        Ok(self
            .read(provider, |t| t.inventories_for(generation, profiles))
            .unwrap_or_default())
    }

    async fn delete_older_than(
        &self,
        provider: Provider,
        cutoff: DateTime<Utc>,
    ) -> PersistResult<RetentionReport> {
        self.mutate(provider, |t| t.delete_older_than(cutoff)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_proto::{Category, Credentials, ErrorCategory, ObjectType, Placement, Suggestion};
    use uuid::Uuid;

    fn rec(generation: u64, profile: ProfileId) -> Recommendation {
        Recommendation {
            id: Uuid::new_v4(),
            generation: Generation(generation),
            provider: Provider::Gcp,
            profile_id: profile,
            category: Category::ComputeInstanceRightsizing,
            suggestion: Suggestion::ResizeOversizedComputeInstance,
            resource_id: "42".to_string(),
            resource_name: "vm-1".to_string(),
            object_type: ObjectType::ComputeInstance,
            placement: Placement::default(),
            details: Vec::new(),
            optimization_score: Some(70),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_json_gateway_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let profile = Profile::new(
            "gcp-prod",
            Credentials::Gcp {
                client_email: "sa@proj.iam".to_string(),
                private_key: "k".to_string(),
                project_filter: None,
            },
            "europe-west1",
        );
        let pid = profile.id;

        {
            let gw = JsonGateway::open(dir.path()).expect("open");
            gw.insert_profile(profile).expect("insert profile");
            gw.add_recommendations(Provider::Gcp, vec![rec(1, pid), rec(1, pid)])
                .await
                .expect("add");
            gw.add_recommendation_errors(
                Provider::Gcp,
                vec![RecommendationError::new(
                    Provider::Gcp,
                    Generation(2),
                    Some(pid),
                    ErrorCategory::Hierarchy,
                    "projects.list denied",
                )],
            )
            .await
            .expect("add errors");
        }

        let gw = JsonGateway::open(dir.path()).expect("reopen");
        assert_eq!(gw.list_profiles(Provider::Gcp, true).await.expect("list").len(), 1);
        assert_eq!(
            gw.last_generation(Provider::Gcp).await.expect("last"),
            Generation(2)
        );
        let recs = gw
            .recommendations_by_generation_and_profiles(Provider::Gcp, Generation(1), &[pid])
            .await
            .expect("query");
        assert_eq!(recs.len(), 2);
        assert!(dir.path().join("state/gcp_recommendations.json").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_all_reach_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let gw = std::sync::Arc::new(JsonGateway::open(dir.path()).expect("open"));
        let pid = ProfileId::new();

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let gw = gw.clone();
                tokio::spawn(async move {
                    gw.add_recommendations(Provider::Gcp, vec![rec(i % 2 + 1, pid)]).await
                })
            })
            .collect();
        for w in writers {
            w.await.expect("join").expect("write");
        }

        let reopened = JsonGateway::open(dir.path()).expect("reopen");
        let mut total = 0;
        for generation in [Generation(1), Generation(2)] {
            total += reopened
                .recommendations_by_generation_and_profiles(Provider::Gcp, generation, &[])
                .await
                .expect("query")
                .len();
        }
        assert_eq!(total, 8);
    }

    #[tokio::test]
    async fn test_json_gateway_retention_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pid = ProfileId::new();
        let gw = JsonGateway::open(dir.path()).expect("open");
        let mut old = rec(1, pid);
        old.created_at = Utc::now() - chrono::Duration::days(90);
        gw.add_recommendations(Provider::Gcp, vec![old, rec(2, pid)])
            .await
            .expect("add");

        let report = gw
            .delete_older_than(Provider::Gcp, Utc::now() - chrono::Duration::days(30))
            .await
            .expect("delete");
        assert_eq!(report.recommendations, 1);

        let reopened = JsonGateway::open(dir.path()).expect("reopen");
        let left = reopened
            .recommendations_by_generation_and_profiles(Provider::Gcp, Generation(1), &[])
            .await
            .expect("query");
        assert!(left.is_empty());
    }
}
