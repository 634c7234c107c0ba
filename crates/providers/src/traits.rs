//! The backend adapter contract.

use async_trait::async_trait;
use feature_query::{BackendKind, Feature, FilterOp, PropertyFilter, RecordError, SortKey};
use ogc_common::{BoundingBox, DateTimeFilter};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderResult;

/// One stored record: a decoded feature or the reason it could not be decoded.
pub type ProviderRow = Result<Feature, RecordError>;

/// Query clauses an adapter executes natively.
///
/// Anything not declared here is evaluated by the executor over a bounded
/// fetch window.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub bbox: bool,
    pub datetime: bool,
    pub filter_ops: Vec<FilterOp>,
    /// Arbitrary `sortby`. Every adapter orders by id.
    pub sort: bool,
    /// [`FetchStart::After`] paging.
    pub keyset: bool,
    /// [`FetchResult::matched`] is exact for native clauses.
    pub exact_count: bool,
    pub write: bool,
}

impl ProviderCapabilities {
    /// Everything native.
    pub fn full() -> Self {
        Self {
            bbox: true,
            datetime: true,
            filter_ops: FilterOp::all().to_vec(),
            sort: true,
            keyset: true,
            exact_count: true,
            write: true,
        }
    }

    pub fn supports_op(&self, op: FilterOp) -> bool {
        self.filter_ops.contains(&op)
    }
}

/// Where a fetch starts.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchStart {
    /// Skip this many natively matching rows.
    Offset(u64),
    /// Rows strictly after this position in (sort_by, id) order.
    After { key: Vec<Value>, id: String },
}

/// The natively executable part of a query.
///
/// Only clauses declared in [`ProviderCapabilities`] are ever set. The bbox
/// is in (x, y) order of the storage CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub bbox: Option<BoundingBox>,
    pub datetime: Option<DateTimeFilter>,
    pub filters: Vec<PropertyFilter>,
    /// Empty means id order.
    pub sort_by: Vec<SortKey>,
    pub start: FetchStart,
    /// Maximum rows to return; zero asks for the count only.
    pub limit: usize,
    /// Whether to report [`FetchResult::matched`].
    pub count: bool,
}

impl FetchRequest {
    /// Unfiltered request in id order.
    pub fn all(limit: usize) -> Self {
        Self {
            bbox: None,
            datetime: None,
            filters: Vec::new(),
            sort_by: Vec::new(),
            start: FetchStart::Offset(0),
            limit,
            count: false,
        }
    }

    pub fn has_clauses(&self) -> bool {
        self.bbox.is_some() || self.datetime.is_some() || !self.filters.is_empty()
    }
}

/// Number of rows satisfying the native clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCount {
    pub value: u64,
    pub exact: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchResult {
    pub rows: Vec<ProviderRow>,
    pub matched: Option<MatchCount>,
}

/// A storage backend for one dataset.
///
/// Implementations own their connections and must be safe to call
/// concurrently through `&self`. Adapters declaring `keyset` must set
/// [`RecordError::id`] on every undecodable row so paging can step past it.
#[async_trait]
pub trait FeatureProvider: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> ProviderCapabilities;

    async fn fetch(&self, request: &FetchRequest) -> ProviderResult<FetchResult>;

    /// Point lookup; `None` when absent.
    async fn get(&self, id: &str) -> ProviderResult<Option<ProviderRow>>;

    /// Write access, for adapters declaring `write`.
    fn writer(&self) -> Option<&dyn FeatureWriter> {
        None
    }
}

/// Single-feature transactional writes.
#[async_trait]
pub trait FeatureWriter: Send + Sync {
    /// Insert a new feature; an existing id is a conflict.
    async fn create(&self, feature: Feature) -> ProviderResult<String>;

    /// Replace a feature; `false` when the id does not exist.
    async fn update(&self, id: &str, feature: Feature) -> ProviderResult<bool>;

    /// `false` when the id does not exist.
    async fn delete(&self, id: &str) -> ProviderResult<bool>;
}
