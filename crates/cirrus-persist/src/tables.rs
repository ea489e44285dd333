use crate::RetentionReport;
use chrono::{DateTime, Utc};
use cirrus_proto::{Generation, ProfileId, Recommendation, RecommendationError, ResourceInventory};

/// Recommendation, error and inventory rows of one provider.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProviderTables {
    pub recommendations: Vec<Recommendation>,
    pub errors: Vec<RecommendationError>,
    pub inventories: Vec<ResourceInventory>,
}

impl ProviderTables {
    pub fn last_generation(&self) -> Generation {
        let recs = self.recommendations.iter().map(|r| r.generation);
        let errs = self.errors.iter().map(|e| e.generation);
        recs.chain(errs).max().unwrap_or(Generation::ZERO)
    }

    pub fn recommendations_for(
        &self,
        generation: Generation,
        profiles: &[ProfileId],
    ) -> Vec<Recommendation> {
        self.recommendations
            .iter()
            .filter(|r| r.generation == generation)
            .filter(|r| profiles.is_empty() || profiles.contains(&r.profile_id))
            .cloned()
            .collect()
    }

    pub fn errors_for(
        &self,
        generation: Option<Generation>,
        profiles: &[ProfileId],
    ) -> Vec<RecommendationError> {
        self.errors
            .iter()
            .filter(|e| generation.is_none_or(|g| e.generation == g))
            .filter(|e| match e.profile_id {
                Some(id) => profiles.is_empty() || profiles.contains(&id),
                None => true,
            })
            .cloned()
            .collect()
    }

    pub fn inventories_for(
        &self,
        generation: Generation,
        profiles: &[ProfileId],
    ) -> Vec<ResourceInventory> {
        self.inventories
            .iter()
            .filter(|i| i.generation == generation)
            .filter(|i| profiles.is_empty() || profiles.contains(&i.profile_id))
            .cloned()
            .collect()
    }

    pub fn delete_older_than(&mut self, cutoff: DateTime<Utc>) -> RetentionReport {
        let recs_before = self.recommendations.len();
        let errs_before = self.errors.len();
        let inv_before = self.inventories.len();
        self.recommendations.retain(|r| r.created_at >= cutoff);
        self.errors.retain(|e| e.created_at >= cutoff);
        self.inventories.retain(|i| i.created_at >= cutoff);
        RetentionReport {
            recommendations: recs_before - self.recommendations.len(),
            errors: errs_before - self.errors.len(),
            inventories: inv_before - self.inventories.len(),
        }
    }
}
