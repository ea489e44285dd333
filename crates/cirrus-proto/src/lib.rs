//! Record types for the cirrus utilization auditing pipeline.
//!
//! Defines the cloud profiles a collection run reads, and the recommendation,
//! error and inventory records every run writes under one shared generation
//! number.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ─── Provider ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Gcp,
    Oci,
    Hetzner,
}

impl Provider {
    pub const ALL: [Provider; 4] = [Self::Aws, Self::Gcp, Self::Oci, Self::Hetzner];
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aws => write!(f, "aws"),
            Self::Gcp => write!(f, "gcp"),
            Self::Oci => write!(f, "oci"),
            Self::Hetzner => write!(f, "hetzner"),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown provider: {0}")]
pub struct ParseProviderError(pub String);

impl FromStr for Provider {
    type Err = ParseProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(Self::Aws),
            "gcp" => Ok(Self::Gcp),
            "oci" => Ok(Self::Oci),
            "hetzner" => Ok(Self::Hetzner),
            other => Err(ParseProviderError(other.to_string())),
        }
    }
}

// ─── Generation ───────────────────────────────────────────────────────────────

/// Run number shared by every record one collection run writes.
///
/// Generations are per provider and strictly increasing. The current snapshot
/// of a provider is the highest generation present in the store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Generation {
    /// Value reported by an empty store.
    pub const ZERO: Generation = Generation(0);

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── Profiles ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(pub Uuid);

impl ProfileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProfileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProfileId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Provider account credentials. Secrets never appear in `Debug` output.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum Credentials {
    Aws {
        access_key_id: String,
        secret_access_key: String,
    },
    Gcp {
        client_email: String,
        private_key: String,
        /// Only projects whose id contains this string are scanned.
        #[serde(default)]
        project_filter: Option<String>,
    },
    Oci {
        tenancy_ocid: String,
        user_ocid: String,
        fingerprint: String,
        private_key: String,
    },
    Hetzner {
        api_token: String,
    },
}

impl Credentials {
    pub fn provider(&self) -> Provider {
        match self {
            Self::Aws { .. } => Provider::Aws,
            Self::Gcp { .. } => Provider::Gcp,
            Self::Oci { .. } => Provider::Oci,
            Self::Hetzner { .. } => Provider::Hetzner,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aws { access_key_id, .. } => f
                .debug_struct("Aws")
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"<redacted>")
                .finish(),
            Self::Gcp {
                client_email,
                project_filter,
                ..
            } => f
                .debug_struct("Gcp")
                .field("client_email", client_email)
                .field("private_key", &"<redacted>")
                .field("project_filter", project_filter)
                .finish(),
            Self::Oci {
                tenancy_ocid,
                user_ocid,
                fingerprint,
                ..
            } => f
                .debug_struct("Oci")
                .field("tenancy_ocid", tenancy_ocid)
                .field("user_ocid", user_ocid)
                .field("fingerprint", fingerprint)
                .field("private_key", &"<redacted>")
                .finish(),
            Self::Hetzner { .. } => f
                .debug_struct("Hetzner")
                .field("api_token", &"<redacted>")
                .finish(),
        }
    }
}

/// A stored cloud account plus the operator's "selected for scanning" flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    pub credentials: Credentials,
    pub region: String,
    #[serde(default = "default_selected")]
    pub selected: bool,
    pub created_at: DateTime<Utc>,
}

fn default_selected() -> bool {
    true
}

impl Profile {
    pub fn new(name: impl Into<String>, credentials: Credentials, region: impl Into<String>) -> Self {
        Self {
            id: ProfileId::new(),
            name: name.into(),
            credentials,
            region: region.into(),
            selected: true,
            created_at: Utc::now(),
        }
    }

    pub fn provider(&self) -> Provider {
        self.credentials.provider()
    }
}

// ─── Recommendation Vocabulary ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    ComputeInstanceRightsizing,
    ComputeInstanceDecommissioning,
    ComputeInstanceIdle,
    ComputeInstanceWithoutMonitoring,
    BlockStorageRightsizing,
    UnusedStorage,
    UnusedResource,
    NotActiveResource,
    OldSnapshot,
    ObjectStorageOptimization,
    OversizedDatabase,
    UnusedServiceDecommissioning,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ComputeInstanceRightsizing => "Compute Instance Rightsizing",
            Self::ComputeInstanceDecommissioning => "Compute Instance Decommissioning",
            Self::ComputeInstanceIdle => "Compute Instance Idle",
            Self::ComputeInstanceWithoutMonitoring => "Compute Instance Without Monitoring",
            Self::BlockStorageRightsizing => "Block Storage Rightsizing",
            Self::UnusedStorage => "Unused Storage",
            Self::UnusedResource => "Unused Resource",
            Self::NotActiveResource => "Not Active Resource",
            Self::OldSnapshot => "Old Snapshot",
            Self::ObjectStorageOptimization => "Object Storage Optimization",
            Self::OversizedDatabase => "Oversized Database",
            Self::UnusedServiceDecommissioning => "Unused Service Decommissioning",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Suggestion {
    ResizeOversizedComputeInstance,
    DeleteComputeInstanceNotUsed,
    DeleteComputeInstanceNotActive,
    EnableComputeInstanceMonitoring,
    ResizeOversizedBlockStorage,
    DeleteBlockStorageNotUsed,
    DeleteSnapshotOlder,
    DeleteLoadBalancerNotActive,
    DeletePublicIpNotAssociated,
    ResizeOversizedDatabaseInstance,
    DeleteDatabaseInstanceNotActive,
    EnableBucketAutoTiering,
}

impl fmt::Display for Suggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ResizeOversizedComputeInstance => "Resize oversized compute instance",
            Self::DeleteComputeInstanceNotUsed => "Delete compute instance not used",
            Self::DeleteComputeInstanceNotActive => "Delete compute instance not active",
            Self::EnableComputeInstanceMonitoring => "Enable monitoring on compute instance",
            Self::ResizeOversizedBlockStorage => "Resize oversized block storage",
            Self::DeleteBlockStorageNotUsed => "Delete block storage not used",
            Self::DeleteSnapshotOlder => "Delete old snapshot",
            Self::DeleteLoadBalancerNotActive => "Delete load balancer not active",
            Self::DeletePublicIpNotAssociated => "Delete public IP not associated",
            Self::ResizeOversizedDatabaseInstance => "Resize oversized database instance",
            Self::DeleteDatabaseInstanceNotActive => "Delete database instance not active",
            Self::EnableBucketAutoTiering => "Enable bucket auto-tiering",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    ComputeInstance,
    BlockStorage,
    Snapshot,
    LoadBalancer,
    DatabaseInstance,
    ObjectStorage,
    PublicIp,
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ComputeInstance => "Compute Instance",
            Self::BlockStorage => "Block Storage",
            Self::Snapshot => "Snapshot",
            Self::LoadBalancer => "Load Balancer",
            Self::DatabaseInstance => "Database Instance",
            Self::ObjectStorage => "Object Storage",
            Self::PublicIp => "Public IP",
        };
        f.write_str(label)
    }
}

// ─── Recommendations ──────────────────────────────────────────────────────────

/// Where a resource lives: region, optional zone, and the hierarchy unit
/// (project or compartment) it was listed under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub region: String,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub unit_id: Option<String>,
    #[serde(default)]
    pub unit_name: Option<String>,
}

/// One human-readable evidence line of a recommendation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detail {
    pub label: String,
    pub value: String,
}

impl Detail {
    pub fn new(label: impl Into<String>, value: impl fmt::Display) -> Self {
        Self {
            label: label.into(),
            value: value.to_string(),
        }
    }
}

/// A persisted sizing or decommissioning suggestion. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub generation: Generation,
    pub provider: Provider,
    pub profile_id: ProfileId,
    pub category: Category,
    pub suggestion: Suggestion,
    pub resource_id: String,
    pub resource_name: String,
    pub object_type: ObjectType,
    #[serde(default)]
    pub placement: Placement,
    pub details: Vec<Detail>,
    #[serde(default)]
    pub optimization_score: Option<u8>,
    pub created_at: DateTime<Utc>,
}

// ─── Recommendation Errors ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// No provider client could be built for the profile.
    Session,
    /// A project or compartment listing failed.
    Hierarchy,
    /// A resource kind could not be enumerated.
    Listing,
    MetricQuery,
    /// A metric whose missing-data policy is `error` returned no series.
    MissingData,
    Cancelled,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Hierarchy => write!(f, "hierarchy"),
            Self::Listing => write!(f, "listing"),
            Self::MetricQuery => write!(f, "metric_query"),
            Self::MissingData => write!(f, "missing_data"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A non-fatal failure recorded alongside the recommendations of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationError {
    pub id: Uuid,
    pub generation: Generation,
    pub provider: Provider,
    /// `None` only for run-level failures such as cancellation.
    #[serde(default)]
    pub profile_id: Option<ProfileId>,
    pub category: ErrorCategory,
    #[serde(default)]
    pub resource_id: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl RecommendationError {
    pub fn new(
        provider: Provider,
        generation: Generation,
        profile_id: Option<ProfileId>,
        category: ErrorCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            generation,
            provider,
            profile_id,
            category,
            resource_id: None,
            message: message.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }
}

// ─── Resource Inventory ───────────────────────────────────────────────────────

/// Number of resources of one kind found in a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCount {
    pub name: String,
    pub count: u64,
}

impl ObjectCount {
    pub fn new(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

/// Per-profile resource counts written by one run, next to its
/// recommendations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInventory {
    pub id: Uuid,
    pub generation: Generation,
    pub provider: Provider,
    pub profile_id: ProfileId,
    pub profile_name: String,
    pub counts: Vec<ObjectCount>,
    pub created_at: DateTime<Utc>,
}

impl ResourceInventory {
    pub fn count(&self, name: &str) -> Option<u64> {
        self.counts.iter().find(|c| c.name == name).map(|c| c.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_recommendation() -> Recommendation {
        Recommendation {
            id: Uuid::new_v4(),
            generation: Generation(7),
            provider: Provider::Gcp,
            profile_id: ProfileId::new(),
            category: Category::BlockStorageRightsizing,
            suggestion: Suggestion::ResizeOversizedBlockStorage,
            resource_id: "1234567890".to_string(),
            resource_name: "disk-a".to_string(),
            object_type: ObjectType::BlockStorage,
            placement: Placement {
                region: "europe-west1".to_string(),
                zone: Some("europe-west1-b".to_string()),
                unit_id: Some("proj-1".to_string()),
                unit_name: Some("Project One".to_string()),
            },
            details: vec![
                Detail::new("Disk Name", "disk-a"),
                Detail::new("Max Read IOPS 5d", "120.00/3000.00"),
            ],
            optimization_score: Some(82),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_provider_display_and_parse() {
        for provider in Provider::ALL {
            let parsed: Provider = provider.to_string().parse().expect("parse");
            assert_eq!(parsed, provider);
        }
        assert_eq!("  GCP ".parse::<Provider>().expect("parse"), Provider::Gcp);
        assert!("azure".parse::<Provider>().is_err());
    }

    #[test]
    fn test_generation_next() {
        assert!(Generation::ZERO.is_zero());
        assert_eq!(Generation::ZERO.next(), Generation(1));
        assert_eq!(Generation(41).next(), Generation(42));
        assert_eq!(Generation(u64::MAX).next(), Generation(u64::MAX));
        assert!(Generation(3) > Generation(2));
    }

    #[test]
    fn test_generation_serializes_as_number() {
        let json = serde_json::to_string(&Generation(12)).expect("serialize");
        assert_eq!(json, "12");
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let creds = Credentials::Aws {
            access_key_id: "AKIAEXAMPLE".to_string(),
            secret_access_key: "super-secret".to_string(),
        };
        let out = format!("{creds:?}");
        assert!(out.contains("AKIAEXAMPLE"));
        assert!(!out.contains("super-secret"));

        let creds = Credentials::Hetzner {
            api_token: "tok-123".to_string(),
        };
        assert!(!format!("{creds:?}").contains("tok-123"));
    }

    #[test]
    fn test_profile_provider_follows_credentials() {
        let profile = Profile::new(
            "prod",
            Credentials::Oci {
                tenancy_ocid: "ocid1.tenancy".to_string(),
                user_ocid: "ocid1.user".to_string(),
                fingerprint: "aa:bb".to_string(),
                private_key: "key".to_string(),
            },
            "eu-frankfurt-1",
        );
        assert_eq!(profile.provider(), Provider::Oci);
        assert!(profile.selected);
    }

    #[test]
    fn test_profile_deserialize_defaults_selected() {
        let json = r#"{
            "id": "6f0e3c2a-8a47-4f6b-9d55-0d1b2f6c9a11",
            "name": "acct",
            "credentials": {"provider": "hetzner", "api_token": "t"},
            "region": "nbg1",
            "created_at": "2026-01-01T00:00:00Z"
        }"#;
        let profile: Profile = serde_json::from_str(json).expect("deserialize");
        assert!(profile.selected);
        assert_eq!(profile.provider(), Provider::Hetzner);
    }

    #[test]
    fn test_recommendation_serialization() {
        let rec = sample_recommendation();
        let json = serde_json::to_string(&rec).expect("serialize");
        assert!(json.contains("\"block_storage_rightsizing\""));
        let back: Recommendation = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.generation, Generation(7));
        assert_eq!(back.details, rec.details);
        assert_eq!(back.placement, rec.placement);
    }

    #[test]
    fn test_category_labels() {
        assert_eq!(
            Category::ComputeInstanceRightsizing.to_string(),
            "Compute Instance Rightsizing"
        );
        assert_eq!(ObjectType::PublicIp.to_string(), "Public IP");
        assert_eq!(
            Suggestion::EnableBucketAutoTiering.to_string(),
            "Enable bucket auto-tiering"
        );
    }

    #[test]
    fn test_inventory_count_lookup() {
        let inventory = ResourceInventory {
            id: Uuid::new_v4(),
            generation: Generation(2),
            provider: Provider::Aws,
            profile_id: ProfileId::new(),
            profile_name: "prod".to_string(),
            counts: vec![ObjectCount::new("Buckets", 4), ObjectCount::new("VPCs", 0)],
            created_at: Utc::now(),
        };
        assert_eq!(inventory.count("Buckets"), Some(4));
        assert_eq!(inventory.count("VPCs"), Some(0));
        assert_eq!(inventory.count("Volumes"), None);

        let json = serde_json::to_value(&inventory).expect("serialize");
        assert_eq!(json["counts"][0]["name"], "Buckets");
    }

    #[test]
    fn test_recommendation_error_builder() {
        let profile = ProfileId::new();
        let err = RecommendationError::new(
            Provider::Aws,
            Generation(3),
            Some(profile),
            ErrorCategory::MetricQuery,
            "throttled",
        )
        .with_resource("i-0abc");
        assert_eq!(err.profile_id, Some(profile));
        assert_eq!(err.resource_id.as_deref(), Some("i-0abc"));
        assert_eq!(err.category.to_string(), "metric_query");
    }
}
