//! Feature query contract.
//!
//! This crate defines what a feature query *is*, independent of where the
//! data lives:
//!
//! - [`CapabilityDescriptor`]: static per-dataset metadata used to validate
//!   every query before it reaches a backend
//! - [`normalize`]: turns raw request parameters into a [`Query`]
//! - [`PageToken`]: opaque paging state with a total order over features
//! - [`FeatureResultEnvelope`]: the uniform result container
//!
//! # Example
//!
//! ```rust
//! use feature_query::{normalize, BackendKind, CapabilityDescriptor, RawQueryParams};
//!
//! let descriptor = CapabilityDescriptor::new("roads", BackendKind::Relational)
//!     .with_queryables(["name", "lanes"]);
//! let params = RawQueryParams::from_pairs([("bbox", "0,0,10,10"), ("filter", "lanes gt 2")]);
//! let query = normalize(&params, &descriptor).unwrap();
//! assert_eq!(query.filters.len(), 1);
//! ```

pub mod descriptor;
pub mod feature;
pub mod filter;
pub mod paging;
pub mod params;
pub mod query;
pub mod sort;

pub use descriptor::{BackendKind, CapabilityDescriptor, QueryLimits};
pub use feature::{Feature, FeatureResultEnvelope, RecordError};
pub use filter::{like_matches, parse_filter, FilterOp, Literal, PropertyFilter};
pub use paging::{compare_features, is_after, PageToken, PageTokenError};
pub use params::RawQueryParams;
pub use query::{normalize, PageRequest, Query, ResultType};
pub use sort::{compare_values, parse_sortby, SortDirection, SortKey};
