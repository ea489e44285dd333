//! Read surface for callers outside the collection core.
//!
//! Queries resolve to the provider's latest generation unless a historical
//! generation is requested explicitly.

use crate::{PersistResult, PersistenceGateway};
use cirrus_proto::{
    Generation, ProfileId, Provider, Recommendation, RecommendationError, ResourceInventory,
};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct RecommendationView {
    pub provider: Provider,
    pub generation: Generation,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorView {
    pub provider: Provider,
    pub generation: Generation,
    pub errors: Vec<RecommendationError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InventoryView {
    pub provider: Provider,
    pub generation: Generation,
    pub inventories: Vec<ResourceInventory>,
}

async fn resolve(
    gateway: &dyn PersistenceGateway,
    provider: Provider,
    requested: Option<Generation>,
) -> PersistResult<Generation> {
    match requested {
        Some(generation) => Ok(generation),
        None => gateway.last_generation(provider).await,
    }
}

/// Recommendations for a profile set (empty = all profiles).
pub async fn latest_recommendations(
    gateway: &dyn PersistenceGateway,
    provider: Provider,
    profiles: &[ProfileId],
    generation: Option<Generation>,
) -> PersistResult<RecommendationView> {
    let generation = resolve(gateway, provider, generation).await?;
    let recommendations = if generation.is_zero() {
        Vec::new()
    } else {
        gateway
            .recommendations_by_generation_and_profiles(provider, generation, profiles)
            .await?
    };
    Ok(RecommendationView {
        provider,
        generation,
        recommendations,
    })
}

/// Errors for a profile set (empty = all profiles).
pub async fn latest_errors(
    gateway: &dyn PersistenceGateway,
    provider: Provider,
    profiles: &[ProfileId],
    generation: Option<Generation>,
) -> PersistResult<ErrorView> {
    let generation = resolve(gateway, provider, generation).await?;
    let errors = if generation.is_zero() {
        Vec::new()
    } else {
        gateway
            .errors_by_generation_or_profiles(provider, Some(generation), profiles)
            .await?
    };
    Ok(ErrorView {
        provider,
        generation,
        errors,
    })
}

/// Resource counts for a profile set (empty = all profiles).
pub async fn latest_inventories(
    gateway: &dyn PersistenceGateway,
    provider: Provider,
    profiles: &[ProfileId],
    generation: Option<Generation>,
) -> PersistResult<InventoryView> {
    let generation = resolve(gateway, provider, generation).await?;
    let inventories = if generation.is_zero() {
        Vec::new()
    } else {
        gateway
            .inventories_by_generation_and_profiles(provider, generation, profiles)
            .await?
    };
    Ok(InventoryView {
        provider,
        generation,
        inventories,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryGateway;
    use chrono::Utc;
    use cirrus_proto::{Category, ErrorCategory, ObjectType, Placement, Suggestion};
    use uuid::Uuid;

    fn rec(generation: u64, profile: ProfileId) -> Recommendation {
        Recommendation {
            id: Uuid::new_v4(),
            generation: Generation(generation),
            provider: Provider::Oci,
            profile_id: profile,
            category: Category::OldSnapshot,
            suggestion: Suggestion::DeleteSnapshotOlder,
            resource_id: format!("ocid1.snapshot.{generation}"),
            resource_name: "snap".to_string(),
            object_type: ObjectType::Snapshot,
            placement: Placement::default(),
            details: Vec::new(),
            optimization_score: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_latest_resolves_to_max_generation() {
        let gw = MemoryGateway::new();
        let p = ProfileId::new();
        gw.add_recommendations(Provider::Oci, vec![rec(1, p), rec(2, p), rec(2, p)])
            .await
            .expect("add");

        let view = latest_recommendations(&gw, Provider::Oci, &[p], None)
            .await
            .expect("query");
        assert_eq!(view.generation, Generation(2));
        assert_eq!(view.recommendations.len(), 2);

        let historical = latest_recommendations(&gw, Provider::Oci, &[p], Some(Generation(1)))
            .await
            .expect("query");
        assert_eq!(historical.recommendations.len(), 1);
    }

    #[tokio::test]
    async fn test_latest_on_empty_store() {
        let gw = MemoryGateway::new();
        let view = latest_recommendations(&gw, Provider::Aws, &[], None)
            .await
            .expect("query");
        assert!(view.generation.is_zero());
        assert!(view.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_latest_errors_follow_error_only_generation() {
        let gw = MemoryGateway::new();
        let p = ProfileId::new();
        gw.add_recommendations(Provider::Oci, vec![rec(1, p)])
            .await
            .expect("add");
        gw.add_recommendation_errors(
            Provider::Oci,
            vec![RecommendationError::new(
                Provider::Oci,
                Generation(2),
                Some(p),
                ErrorCategory::Session,
                "bad key",
            )],
        )
        .await
        .expect("add errors");

        let errors = latest_errors(&gw, Provider::Oci, &[], None)
            .await
            .expect("query");
        assert_eq!(errors.generation, Generation(2));
        assert_eq!(errors.errors.len(), 1);

        let recs = latest_recommendations(&gw, Provider::Oci, &[], None)
            .await
            .expect("query");
        assert!(recs.recommendations.is_empty());
    }
}
