//! Per-dataset capability metadata and query validation.

use std::collections::BTreeSet;

use ogc_common::{BoundingBox, CrsCode, OgcError, OgcResult, TimeInterval};
use serde::{Deserialize, Serialize};

use crate::query::Query;

/// Family of storage technology behind a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Relational,
    Document,
    SearchIndex,
    FlatFile,
    RemoteService,
}

/// Page size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryLimits {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 10_000,
        }
    }
}

impl QueryLimits {
    /// Clamp a requested limit into `1..=max_limit`.
    pub fn clamp(&self, limit: usize) -> usize {
        limit.clamp(1, self.max_limit.max(1))
    }
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_supported_crs() -> Vec<CrsCode> {
    vec![CrsCode::Crs84]
}

/// Static description of a dataset.
///
/// Loaded once by configuration and shared read-only behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub id: String,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Property holding the feature timestamp for `datetime` filters.
    #[serde(default)]
    pub time_field: Option<String>,

    #[serde(default)]
    pub storage_crs: CrsCode,

    #[serde(default = "default_supported_crs")]
    pub supported_crs: Vec<CrsCode>,

    #[serde(default)]
    pub queryables: BTreeSet<String>,

    /// Spatial extent in CRS84; `None` means unknown.
    #[serde(default)]
    pub spatial_extent: Option<BoundingBox>,

    #[serde(default)]
    pub temporal_extent: TimeInterval,

    pub backend_kind: BackendKind,

    #[serde(default)]
    pub limits: QueryLimits,
}

impl CapabilityDescriptor {
    pub fn new(id: impl Into<String>, backend_kind: BackendKind) -> Self {
        Self {
            id: id.into(),
            title: None,
            id_field: default_id_field(),
            time_field: None,
            storage_crs: CrsCode::Crs84,
            supported_crs: default_supported_crs(),
            queryables: BTreeSet::new(),
            spatial_extent: None,
            temporal_extent: TimeInterval::unbounded(),
            backend_kind,
            limits: QueryLimits::default(),
        }
    }

    pub fn with_queryables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queryables.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_storage_crs(mut self, crs: CrsCode) -> Self {
        self.storage_crs = crs;
        self
    }

    pub fn with_supported_crs(mut self, crs: impl IntoIterator<Item = CrsCode>) -> Self {
        self.supported_crs = crs.into_iter().collect();
        self
    }

    pub fn with_spatial_extent(mut self, extent: BoundingBox) -> Self {
        self.spatial_extent = Some(extent);
        self
    }

    pub fn with_time_field(mut self, field: impl Into<String>) -> Self {
        self.time_field = Some(field.into());
        self
    }

    pub fn with_limits(mut self, limits: QueryLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn default_limit(&self) -> usize {
        self.limits.clamp(self.limits.default_limit)
    }

    /// Whether a name may appear in filters, sorts or property selections.
    pub fn is_queryable(&self, name: &str) -> bool {
        name == self.id_field || self.queryables.contains(name)
    }

    /// Output CRSs: the declared list plus the storage CRS.
    pub fn supports_crs(&self, crs: CrsCode) -> bool {
        crs == self.storage_crs || self.supported_crs.contains(&crs)
    }

    /// Whether a CRS84 bbox can overlap the dataset at all.
    pub fn intersects_extent(&self, bbox_crs84: &BoundingBox) -> bool {
        self.spatial_extent
            .map_or(true, |extent| extent.intersects(bbox_crs84))
    }

    /// Check a query against this dataset and clamp its limit.
    ///
    /// Unknown properties, unsupported CRSs and inverted intervals are
    /// rejected before any backend is touched.
    pub fn validate(&self, mut query: Query) -> OgcResult<Query> {
        for filter in &query.filters {
            if !self.is_queryable(&filter.name) {
                return Err(OgcError::invalid_parameter(
                    "filter",
                    format!("'{}' is not a queryable property of '{}'", filter.name, self.id),
                ));
            }
        }

        for key in &query.sort_by {
            if !self.is_queryable(&key.field) {
                return Err(OgcError::invalid_parameter(
                    "sortby",
                    format!("'{}' is not a sortable property of '{}'", key.field, self.id),
                ));
            }
        }

        if let Some(names) = &query.properties {
            if let Some(unknown) = names.iter().find(|n| !self.is_queryable(n)) {
                return Err(OgcError::invalid_parameter(
                    "properties",
                    format!("'{}' is not a property of '{}'", unknown, self.id),
                ));
            }
        }

        if !self.supports_crs(query.output_crs) {
            return Err(OgcError::invalid_parameter(
                "crs",
                format!("{} is not supported by '{}'", query.output_crs, self.id),
            ));
        }

        if query.bbox.is_some()
            && query.bbox_crs != CrsCode::Crs84
            && !self.supports_crs(query.bbox_crs)
        {
            return Err(OgcError::invalid_parameter(
                "bbox-crs",
                format!("{} is not supported by '{}'", query.bbox_crs, self.id),
            ));
        }

        if let Some(bbox) = &query.bbox {
            bbox.validate()
                .map_err(|e| OgcError::invalid_parameter("bbox", e.to_string()))?;
        }

        if let Some(datetime) = &query.datetime {
            datetime
                .as_interval()
                .validate()
                .map_err(|e| OgcError::invalid_parameter("datetime", e.to_string()))?;
            if self.time_field.is_none() {
                return Err(OgcError::invalid_parameter(
                    "datetime",
                    format!("'{}' has no temporal property", self.id),
                ));
            }
        }

        query.limit = self.limits.clamp(query.limit);
        Ok(query)
    }
}
