//! The backend-agnostic query and its construction from request parameters.

use ogc_common::{BoundingBox, CrsCode, DateTimeFilter, OgcError, OgcResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::descriptor::CapabilityDescriptor;
use crate::filter::{parse_filter, Literal, PropertyFilter};
use crate::paging::PageToken;
use crate::params::RawQueryParams;
use crate::sort::{parse_sortby, SortKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    #[default]
    Results,
    Hits,
}

impl ResultType {
    pub fn is_hits(&self) -> bool {
        matches!(self, ResultType::Hits)
    }
}

/// Where the requested page starts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum PageRequest {
    #[default]
    First,
    Offset(u64),
    Token(PageToken),
}

/// A normalized feature query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// In (x, y) order of `bbox_crs`.
    pub bbox: Option<BoundingBox>,
    pub bbox_crs: CrsCode,
    pub datetime: Option<DateTimeFilter>,
    pub filters: Vec<PropertyFilter>,
    pub sort_by: Vec<SortKey>,
    pub result_type: ResultType,
    pub limit: usize,
    pub page: PageRequest,
    pub output_crs: CrsCode,
    /// Subset of properties to return; `None` returns all.
    pub properties: Option<Vec<String>>,
    pub skip_geometry: bool,
}

impl Query {
    /// An unfiltered first-page query.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            bbox: None,
            bbox_crs: CrsCode::Crs84,
            datetime: None,
            filters: Vec::new(),
            sort_by: Vec::new(),
            result_type: ResultType::Results,
            limit,
            page: PageRequest::First,
            output_crs: CrsCode::Crs84,
            properties: None,
            skip_geometry: false,
        }
    }

    pub fn bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn filter(mut self, filter: PropertyFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn sort(mut self, key: SortKey) -> Self {
        self.sort_by.push(key);
        self
    }

    pub fn page(mut self, page: PageRequest) -> Self {
        self.page = page;
        self
    }

    /// Continue from an encoded page token.
    pub fn after_token(self, token: &str) -> OgcResult<Self> {
        let token = PageToken::decode(token)?;
        Ok(self.page(PageRequest::Token(token)))
    }
}

const KNOWN_PARAMS: &[&str] = &[
    "bbox",
    "bbox-crs",
    "datetime",
    "filter",
    "sortby",
    "limit",
    "offset",
    "cursor",
    "crs",
    "resulttype",
    "properties",
    "skipGeometry",
    "f",
];

fn parse_crs(param: &str, value: &str) -> OgcResult<CrsCode> {
    CrsCode::parse(value).map_err(|e| OgcError::invalid_parameter(param, e.to_string()))
}

fn parse_bool(param: &str, value: &str) -> OgcResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(OgcError::invalid_parameter(
            param,
            format!("expected true or false, got '{}'", other),
        )),
    }
}

/// Build a [`Query`] from raw parameters and validate it against the dataset.
pub fn normalize(params: &RawQueryParams, descriptor: &CapabilityDescriptor) -> OgcResult<Query> {
    let limit = match params.get("limit")? {
        Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
            OgcError::invalid_parameter("limit", format!("'{}' is not a non-negative integer", raw))
        })?,
        None => descriptor.default_limit(),
    };
    let mut query = Query::with_limit(limit);

    if let Some(raw) = params.get("bbox-crs")? {
        query.bbox_crs = parse_crs("bbox-crs", raw)?;
    }
    if let Some(raw) = params.get("bbox")? {
        let [a, b, c, d] = BoundingBox::parse_values(raw)
            .map_err(|e| OgcError::invalid_parameter("bbox", e.to_string()))?;
        // values arrive in the authority axis order of bbox-crs
        let order = query.bbox_crs.axis_order();
        let (min_x, min_y) = order.to_xy(a, b);
        let (max_x, max_y) = order.to_xy(c, d);
        let bbox = BoundingBox::new(min_x, min_y, max_x, max_y);
        bbox.validate()
            .map_err(|e| OgcError::invalid_parameter("bbox", e.to_string()))?;
        query.bbox = Some(bbox);
    }

    if let Some(raw) = params.get("datetime")? {
        query.datetime = Some(
            DateTimeFilter::parse(raw)
                .map_err(|e| OgcError::invalid_parameter("datetime", e.to_string()))?,
        );
    }

    if let Some(raw) = params.get("filter")? {
        query.filters = parse_filter(raw)
            .map_err(|e| OgcError::invalid_parameter("filter", e.to_string()))?;
    }

    if let Some(raw) = params.get("sortby")? {
        query.sort_by = parse_sortby(raw).map_err(|e| OgcError::invalid_parameter("sortby", e))?;
    }

    match (params.get("offset")?, params.get("cursor")?) {
        (Some(_), Some(_)) => {
            return Err(OgcError::invalid_parameter(
                "offset",
                "offset and cursor cannot be combined",
            ))
        }
        (Some(raw), None) => {
            let offset = raw.trim().parse::<u64>().map_err(|_| {
                OgcError::invalid_parameter("offset", format!("'{}' is not a non-negative integer", raw))
            })?;
            query.page = PageRequest::Offset(offset);
        }
        (None, Some(raw)) => {
            query.page = PageRequest::Token(PageToken::decode(raw)?);
        }
        (None, None) => {}
    }

    if let Some(raw) = params.get("crs")? {
        query.output_crs = parse_crs("crs", raw)?;
    }

    if let Some(raw) = params.get("resulttype")? {
        query.result_type = match raw.trim().to_ascii_lowercase().as_str() {
            "results" => ResultType::Results,
            "hits" => ResultType::Hits,
            other => {
                return Err(OgcError::invalid_parameter(
                    "resulttype",
                    format!("expected results or hits, got '{}'", other),
                ))
            }
        };
    }

    if let Some(raw) = params.get("properties")? {
        let names: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        query.properties = Some(names);
    }

    if let Some(raw) = params.get("skipGeometry")? {
        query.skip_geometry = parse_bool("skipGeometry", raw)?;
    }

    // queryables used directly as parameters become equality filters
    for (key, value) in params.iter() {
        if KNOWN_PARAMS.contains(&key) {
            continue;
        }
        if descriptor.is_queryable(key) {
            query
                .filters
                .push(PropertyFilter::eq(key, Literal::from_bare(value)));
        } else {
            return Err(OgcError::invalid_parameter(key, "unknown query parameter"));
        }
    }

    let query = descriptor.validate(query)?;
    debug!(
        dataset = %descriptor.id,
        filters = query.filters.len(),
        limit = query.limit,
        "Normalized query"
    );
    Ok(query)
}
