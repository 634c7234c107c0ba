//! Feature storage backends and the query executor.
//!
//! - [`FeatureProvider`]: the adapter contract, with declared
//!   [`ProviderCapabilities`]
//! - [`adapters`]: memory, GeoJSON files, SQLite, PostGIS, Redis and remote
//!   OGC API services
//! - [`Dataset`]: runs a normalized query against one adapter, evaluating
//!   whatever the adapter cannot
//! - [`DatasetRegistry`]: datasets built from YAML configuration

pub mod adapters;
pub mod config;
pub mod error;
pub mod eval;
pub mod executor;
pub mod registry;
pub mod traits;

pub use config::{build_dataset, build_provider, CatalogConfig, DatasetConfig, ProviderConfig};
pub use error::{ProviderError, ProviderResult};
pub use eval::{FeatureSchema, Predicate};
pub use executor::{Dataset, ExecutorConfig};
pub use registry::DatasetRegistry;
pub use traits::{
    FeatureProvider, FeatureWriter, FetchRequest, FetchResult, FetchStart, MatchCount,
    ProviderCapabilities, ProviderRow,
};
