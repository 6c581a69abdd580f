// Content access layer for the travel site: CMS query serialization, remote
// fetching, entity normalization and a tag-invalidated single-flight cache

pub mod accessors;
pub mod cache;
pub mod client;
pub mod config;
pub mod entity;
pub mod error;
pub mod normalize;
pub mod query;
pub mod telemetry;

// Re-export key types for convenience
pub use accessors::{CachedContent, ContentService};
pub use cache::{
    build_key, CacheConfig, CacheStatsReport, Clock, ContentCache, ManualClock, SystemClock,
};
pub use client::{
    CmsClient, ContentSource, CredentialProvider, EnvCredentials, Payload, StaticCredentials,
};
pub use config::{CacheSettings, CmsSettings, LogFormat, LoggingSettings, TtlTable};
pub use entity::{Entity, EntityKind};
pub use error::{ContentError, ContentResult};
pub use normalize::{
    normalize, normalize_list, AssetResolver, ImageFit, ImageFormat, ImageTransform,
};
pub use query::{Condition, FilterOperator, QueryOptions};
