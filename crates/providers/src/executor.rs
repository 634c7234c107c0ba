//! Capability-aware query execution.
//!
//! [`Dataset`] pairs a [`CapabilityDescriptor`] with a [`FeatureProvider`]
//! and turns a validated [`Query`] into a [`FeatureResultEnvelope`]:
//!
//! 1. a bbox outside the spatial extent short-circuits to an empty page
//! 2. clauses the adapter declares native are pushed down, the rest are
//!    evaluated in memory over a bounded scan
//! 3. sorts the adapter cannot execute are applied in memory, but only when
//!    the natively filtered set fits in the scan budget
//! 4. result geometries are reprojected from the storage CRS
//!
//! Every adapter call is bounded by a timeout and never retried.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use feature_query::{
    compare_features, CapabilityDescriptor, Feature, FeatureResultEnvelope, PageRequest,
    PageToken, PropertyFilter, Query, RecordError, SortKey,
};
use metrics::{counter, histogram};
use ogc_common::{BoundingBox, CrsCode, DateTimeFilter, OgcError, OgcResult};
use projection::{reproject_bbox, reproject_geometry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::error::ProviderResult;
use crate::eval::{FeatureSchema, Predicate};
use crate::traits::{
    FeatureProvider, FeatureWriter, FetchRequest, FetchResult, FetchStart, MatchCount,
    ProviderCapabilities, ProviderRow,
};

/// Executor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound on each adapter call.
    #[serde(with = "ogc_common::time::duration_secs")]
    pub backend_timeout: Duration,
    /// Rows fetched per batch during a residual scan.
    pub fetch_window: usize,
    /// Rows scanned per request before giving up on an exact count.
    pub max_scan: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            backend_timeout: Duration::from_secs(10),
            fetch_window: 500,
            max_scan: 10_000,
        }
    }
}

/// The split of a query into native and residual clauses.
struct Plan {
    native: FetchRequest,
    residual_bbox: Option<BoundingBox>,
    residual_datetime: Option<DateTimeFilter>,
    residual_filters: Vec<PropertyFilter>,
    /// Sort the adapter cannot do.
    memory_sort: bool,
    keyset: bool,
}

impl Plan {
    fn has_residual(&self) -> bool {
        self.residual_bbox.is_some()
            || self.residual_datetime.is_some()
            || !self.residual_filters.is_empty()
    }

    fn predicate(&self) -> Predicate<'_> {
        Predicate {
            bbox: self.residual_bbox.as_ref(),
            datetime: self.residual_datetime.as_ref(),
            filters: &self.residual_filters,
        }
    }
}

/// A raw row together with its position in fetch order.
struct ScannedRow {
    row: ProviderRow,
    /// Raw offset in the natively filtered stream.
    index: u64,
}

/// A dataset: descriptor plus adapter.
pub struct Dataset {
    descriptor: Arc<CapabilityDescriptor>,
    provider: Arc<dyn FeatureProvider>,
    schema: FeatureSchema,
    config: ExecutorConfig,
}

impl Dataset {
    pub fn new(
        descriptor: Arc<CapabilityDescriptor>,
        provider: Arc<dyn FeatureProvider>,
        config: ExecutorConfig,
    ) -> Self {
        let schema = FeatureSchema::from_descriptor(&descriptor);
        Self {
            descriptor,
            provider,
            schema,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &Arc<CapabilityDescriptor> {
        &self.descriptor
    }

    pub fn capabilities(&self) -> ProviderCapabilities {
        self.provider.capabilities()
    }

    /// Run an adapter call under the backend timeout.
    async fn call<T, F>(&self, operation: &str, fut: F) -> OgcResult<T>
    where
        F: Future<Output = ProviderResult<T>>,
    {
        match tokio::time::timeout(self.config.backend_timeout, fut).await {
            Ok(result) => result.map_err(|e| {
                warn!(dataset = %self.descriptor.id, operation, error = %e, "Backend call failed");
                OgcError::from(e)
            }),
            Err(_) => {
                warn!(
                    dataset = %self.descriptor.id,
                    operation,
                    timeout_ms = self.config.backend_timeout.as_millis() as u64,
                    "Backend call timed out"
                );
                Err(OgcError::BackendUnavailable(format!(
                    "{} on '{}' timed out after {:?}",
                    operation, self.descriptor.id, self.config.backend_timeout
                )))
            }
        }
    }

    async fn fetch(&self, request: &FetchRequest) -> OgcResult<FetchResult> {
        self.call("fetch", self.provider.fetch(request)).await
    }

    /// Execute a validated query.
    #[instrument(skip(self, query), fields(dataset = %self.descriptor.id))]
    pub async fn query(&self, query: Query) -> OgcResult<FeatureResultEnvelope> {
        let started = Instant::now();
        let result = self.execute(query).await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        counter!(
            "feature_queries_total",
            "dataset" => self.descriptor.id.clone(),
            "outcome" => outcome
        )
        .increment(1);
        histogram!("feature_query_duration_seconds", "dataset" => self.descriptor.id.clone())
            .record(started.elapsed().as_secs_f64());

        if let Ok(envelope) = &result {
            debug!(
                matched = envelope.number_matched,
                returned = envelope.number_returned,
                exact = envelope.number_matched_exact,
                integrity_errors = envelope.integrity_errors.len(),
                "Query complete"
            );
        }
        result
    }

    async fn execute(&self, query: Query) -> OgcResult<FeatureResultEnvelope> {
        let storage_bbox = match &query.bbox {
            Some(bbox) => {
                if self.descriptor.spatial_extent.is_some() {
                    let bbox84 = reproject_bbox(bbox, query.bbox_crs, CrsCode::Crs84)?;
                    if !self.descriptor.intersects_extent(&bbox84) {
                        debug!("bbox outside spatial extent, skipping backend");
                        return Ok(FeatureResultEnvelope::empty(query.output_crs));
                    }
                }
                Some(reproject_bbox(bbox, query.bbox_crs, self.descriptor.storage_crs)?)
            }
            None => None,
        };

        let plan = self.plan(&query, storage_bbox);

        if query.result_type.is_hits() {
            return self.hits(&query, plan).await;
        }

        let mut envelope = if plan.memory_sort {
            self.sorted_in_memory(&query, plan).await?
        } else if plan.has_residual() {
            self.residual_scan(&query, plan).await?
        } else {
            self.native_page(&query, plan).await?
        };

        self.finish(&query, &mut envelope)?;
        Ok(envelope)
    }

    fn plan(&self, query: &Query, storage_bbox: Option<BoundingBox>) -> Plan {
        let caps = self.provider.capabilities();

        let (native_filters, residual_filters): (Vec<_>, Vec<_>) = query
            .filters
            .iter()
            .cloned()
            .partition(|f| caps.supports_op(f.op));

        let (native_bbox, residual_bbox) = if caps.bbox {
            (storage_bbox, None)
        } else {
            (None, storage_bbox)
        };
        let (native_datetime, residual_datetime) = if caps.datetime {
            (query.datetime, None)
        } else {
            (None, query.datetime)
        };

        let memory_sort = !query.sort_by.is_empty() && !caps.sort;
        let native_sort = if memory_sort {
            Vec::new()
        } else {
            query.sort_by.clone()
        };

        Plan {
            native: FetchRequest {
                bbox: native_bbox,
                datetime: native_datetime,
                filters: native_filters,
                sort_by: native_sort,
                start: FetchStart::Offset(0),
                limit: 0,
                count: false,
            },
            residual_bbox,
            residual_datetime,
            residual_filters,
            memory_sort,
            keyset: caps.keyset,
        }
    }

    fn invalid_cursor(message: &str) -> OgcError {
        OgcError::invalid_parameter("cursor", message)
    }

    /// Keyset position of a row under the fetch order.
    fn position_of(&self, row: &ProviderRow, sort_by: &[SortKey]) -> (Vec<Value>, String) {
        match row {
            Ok(feature) => (
                feature.sort_values(sort_by, &self.schema.id_field),
                feature.id.clone(),
            ),
            Err(err) => (
                vec![Value::Null; sort_by.len()],
                err.id.clone().unwrap_or_default(),
            ),
        }
    }

    /// Fully native: one fetch of `limit + 1` rows.
    async fn native_page(&self, query: &Query, plan: Plan) -> OgcResult<FeatureResultEnvelope> {
        let limit = query.limit;
        let mut request = plan.native;

        let (start, matched_before, offset_mode) = match &query.page {
            PageRequest::First if plan.keyset => (FetchStart::Offset(0), 0, false),
            PageRequest::First => (FetchStart::Offset(0), 0, true),
            PageRequest::Offset(n) | PageRequest::Token(PageToken::Offset { offset: n }) => {
                (FetchStart::Offset(*n), *n, true)
            }
            PageRequest::Token(PageToken::After {
                key,
                id,
                matched_before,
            }) if plan.keyset => (
                FetchStart::After {
                    key: key.clone(),
                    id: id.clone(),
                },
                *matched_before,
                false,
            ),
            PageRequest::Token(_) => {
                return Err(Self::invalid_cursor("token does not apply to this query"))
            }
        };

        request.start = start;
        request.limit = limit + 1;
        request.count = true;

        let result = self.fetch(&request).await?;
        let mut rows = result.rows;
        let has_more = rows.len() > limit;
        rows.truncate(limit);

        let next_token = if has_more {
            if offset_mode {
                Some(PageToken::Offset {
                    offset: matched_before + limit as u64,
                })
            } else {
                rows.last().map(|row| {
                    let (key, id) = self.position_of(row, &request.sort_by);
                    PageToken::After {
                        key,
                        id,
                        matched_before: matched_before + limit as u64,
                    }
                })
            }
        } else {
            None
        };

        let returned = rows.len() as u64;
        let matched = result.matched.unwrap_or(MatchCount {
            value: matched_before + returned,
            exact: !has_more,
        });

        let mut envelope = self.envelope(rows, matched, query.output_crs);
        envelope.next_token = next_token.map(|t| t.encode());
        if offset_mode && matched_before > 0 {
            envelope.prev_token = Some(
                PageToken::Offset {
                    offset: matched_before.saturating_sub(limit as u64),
                }
                .encode(),
            );
        }
        Ok(envelope)
    }

    /// Residual clauses: scan natively filtered rows in windows, evaluating
    /// the rest in memory, until the page is full and the budget is spent or
    /// the data is exhausted.
    async fn residual_scan(&self, query: &Query, plan: Plan) -> OgcResult<FeatureResultEnvelope> {
        let limit = query.limit;

        // `skip` matches are consumed before the page starts
        let (mut cursor, matched_before, skip) = match &query.page {
            PageRequest::First => (FetchStart::Offset(0), 0, 0),
            PageRequest::Offset(n) | PageRequest::Token(PageToken::Offset { offset: n }) => {
                (FetchStart::Offset(0), 0, *n)
            }
            PageRequest::Token(PageToken::Scan {
                position,
                matched_before,
            }) => (FetchStart::Offset(*position), *matched_before, 0),
            PageRequest::Token(PageToken::After {
                key,
                id,
                matched_before,
            }) if plan.keyset => (
                FetchStart::After {
                    key: key.clone(),
                    id: id.clone(),
                },
                *matched_before,
                0,
            ),
            PageRequest::Token(_) => {
                return Err(Self::invalid_cursor("token does not apply to this query"))
            }
        };

        let base_index = match &cursor {
            FetchStart::Offset(n) => *n,
            FetchStart::After { .. } => 0,
        };

        let predicate = plan.predicate();
        let sort_by = plan.native.sort_by.clone();

        let mut native_count: Option<MatchCount> = None;
        let mut scanned: usize = 0;
        let mut matches_seen: u64 = 0;
        let mut page: Vec<ScannedRow> = Vec::with_capacity(limit);
        let mut integrity_errors = Vec::new();
        // first match past the page, if any
        let mut overflow: Option<ScannedRow> = None;
        let mut last_position: Option<(Vec<Value>, String)> = None;
        let mut exhausted = false;

        while scanned < self.config.max_scan {
            let window = self.config.fetch_window.min(self.config.max_scan - scanned).max(1);
            let mut request = plan.native.clone();
            request.start = cursor.clone();
            request.limit = window;
            request.count = native_count.is_none();

            let result = self.fetch(&request).await?;
            if native_count.is_none() {
                native_count = result.matched;
            }
            let fetched = result.rows.len();

            for row in result.rows {
                let index = base_index + scanned as u64;
                scanned += 1;
                last_position = Some(self.position_of(&row, &sort_by));

                let is_match = match &row {
                    Ok(feature) => predicate.matches(feature, &self.schema),
                    Err(err) => {
                        if page.len() < limit && overflow.is_none() {
                            integrity_errors.push(err.clone());
                        }
                        false
                    }
                };
                if !is_match {
                    continue;
                }

                matches_seen += 1;
                if matches_seen <= skip {
                    continue;
                }
                if page.len() < limit {
                    page.push(ScannedRow { row, index });
                } else if overflow.is_none() {
                    overflow = Some(ScannedRow { row, index });
                }
            }

            if fetched < window {
                exhausted = true;
                break;
            }
            cursor = match &last_position {
                Some((key, id)) if plan.keyset => FetchStart::After {
                    key: key.clone(),
                    id: id.clone(),
                },
                _ => FetchStart::Offset(base_index + scanned as u64),
            };
        }

        let returned = page.len() as u64;
        let keyset_cursor =
            plan.keyset && !matches!(query.page, PageRequest::Token(PageToken::Scan { .. }));
        let next_matched_before = matched_before + skip.min(matches_seen) + returned;

        let next_token = if let (Some(_), Some(last)) = (&overflow, page.last()) {
            // resume right after the last returned match
            Some(if keyset_cursor {
                let (key, id) = self.position_of(&last.row, &sort_by);
                PageToken::After {
                    key,
                    id,
                    matched_before: next_matched_before,
                }
            } else {
                PageToken::Scan {
                    position: last.index + 1,
                    matched_before: next_matched_before,
                }
            })
        } else if !exhausted {
            // budget spent: resume where the scan stopped
            Some(match (&last_position, keyset_cursor) {
                (Some((key, id)), true) => PageToken::After {
                    key: key.clone(),
                    id: id.clone(),
                    matched_before: next_matched_before,
                },
                _ => PageToken::Scan {
                    position: base_index + scanned as u64,
                    matched_before: next_matched_before,
                },
            })
        } else {
            None
        };

        let matched = if exhausted {
            MatchCount {
                value: matched_before + matches_seen,
                exact: true,
            }
        } else {
            let lower = matched_before + matches_seen;
            MatchCount {
                value: native_count.map_or(lower, |c| c.value.max(lower)),
                exact: false,
            }
        };

        if !exhausted {
            info!(
                scanned,
                matches_seen,
                max_scan = self.config.max_scan,
                "Residual scan hit its budget, numberMatched is an estimate"
            );
        }

        let rows = page.into_iter().map(|r| r.row).collect();
        let mut envelope = self.envelope(rows, matched, query.output_crs);
        envelope.integrity_errors.extend(integrity_errors);
        envelope.next_token = next_token.map(|t| t.encode());
        Ok(envelope)
    }

    /// Fetch every natively filtered row, bounded by `max_scan`.
    async fn fetch_all(&self, plan: &Plan) -> OgcResult<Vec<ProviderRow>> {
        let mut rows: Vec<ProviderRow> = Vec::new();
        let mut cursor = FetchStart::Offset(0);
        loop {
            let remaining = self.config.max_scan + 1 - rows.len();
            let window = self.config.fetch_window.min(remaining).max(1);
            let mut request = plan.native.clone();
            request.start = cursor;
            request.limit = window;

            let batch = self.fetch(&request).await?.rows;
            let fetched = batch.len();
            let last = batch.last().map(|row| self.position_of(row, &request.sort_by));
            rows.extend(batch);

            if rows.len() > self.config.max_scan {
                return Err(OgcError::Validation(format!(
                    "sorting '{}' requires scanning more than {} rows; narrow the query",
                    self.descriptor.id, self.config.max_scan
                )));
            }
            if fetched < window {
                return Ok(rows);
            }
            cursor = match last {
                Some((key, id)) if plan.keyset => FetchStart::After { key, id },
                _ => FetchStart::Offset(rows.len() as u64),
            };
        }
    }

    /// Sort the adapter cannot execute: load the whole natively filtered set
    /// (bounded), filter, sort and slice.
    async fn sorted_in_memory(&self, query: &Query, plan: Plan) -> OgcResult<FeatureResultEnvelope> {
        let offset = match &query.page {
            PageRequest::First => 0,
            PageRequest::Offset(n) | PageRequest::Token(PageToken::Offset { offset: n }) => *n,
            PageRequest::Token(_) => {
                return Err(Self::invalid_cursor("token does not apply to this query"))
            }
        };

        let rows = self.fetch_all(&plan).await?;
        let predicate = plan.predicate();

        let mut integrity_errors = Vec::new();
        let mut features: Vec<Feature> = Vec::new();
        for row in rows {
            match row {
                Ok(feature) if predicate.matches(&feature, &self.schema) => features.push(feature),
                Ok(_) => {}
                Err(err) => integrity_errors.push(err),
            }
        }
        features.sort_by(|a, b| compare_features(a, b, &query.sort_by, &self.schema.id_field));

        let total = features.len() as u64;
        let start = offset.min(total) as usize;
        let end = (start + query.limit).min(features.len());
        let page: Vec<ProviderRow> = features.drain(start..end).map(Ok).collect();

        let mut envelope = self.envelope(
            page,
            MatchCount {
                value: total,
                exact: true,
            },
            query.output_crs,
        );
        // reported once, with the first page
        if offset == 0 {
            envelope.integrity_errors.extend(integrity_errors);
        }
        if (end as u64) < total {
            envelope.next_token = Some(PageToken::Offset { offset: end as u64 }.encode());
        }
        if offset > 0 {
            envelope.prev_token = Some(
                PageToken::Offset {
                    offset: offset.saturating_sub(query.limit as u64),
                }
                .encode(),
            );
        }
        Ok(envelope)
    }

    /// `resulttype=hits`.
    async fn hits(&self, query: &Query, mut plan: Plan) -> OgcResult<FeatureResultEnvelope> {
        if !plan.has_residual() {
            plan.native.limit = 0;
            plan.native.count = true;
            let result = self.fetch(&plan.native).await?;
            let matched = match result.matched {
                Some(count) => count,
                None => {
                    // adapter cannot count: count rows within the budget
                    plan.native.limit = self.config.max_scan + 1;
                    plan.native.count = false;
                    let rows = self.fetch(&plan.native).await?.rows.len() as u64;
                    MatchCount {
                        value: rows.min(self.config.max_scan as u64),
                        exact: rows <= self.config.max_scan as u64,
                    }
                }
            };
            return Ok(FeatureResultEnvelope::hits(
                matched.value,
                matched.exact,
                query.output_crs,
            ));
        }

        let mut counting = query.clone();
        counting.page = PageRequest::First;
        counting.limit = 1;
        let envelope = self.residual_scan(&counting, plan).await?;
        Ok(FeatureResultEnvelope::hits(
            envelope.number_matched,
            envelope.number_matched_exact,
            query.output_crs,
        ))
    }

    fn envelope(
        &self,
        rows: Vec<ProviderRow>,
        matched: MatchCount,
        crs: CrsCode,
    ) -> FeatureResultEnvelope {
        let mut features = Vec::with_capacity(rows.len());
        let mut errors: Vec<RecordError> = Vec::new();
        for row in rows {
            match row {
                Ok(feature) => features.push(feature),
                Err(err) => errors.push(err),
            }
        }
        let mut envelope = FeatureResultEnvelope::new(features, matched.value, crs);
        envelope.number_matched_exact = matched.exact;
        envelope.integrity_errors = errors;
        envelope
    }

    /// Reproject and shape returned features.
    fn finish(&self, query: &Query, envelope: &mut FeatureResultEnvelope) -> OgcResult<()> {
        for feature in &mut envelope.features {
            self.shape(feature, query.output_crs, query.properties.as_deref(), query.skip_geometry)?;
        }
        if !envelope.integrity_errors.is_empty() {
            warn!(
                count = envelope.integrity_errors.len(),
                "Page contains undecodable records"
            );
        }
        Ok(())
    }

    fn shape(
        &self,
        feature: &mut Feature,
        output_crs: CrsCode,
        properties: Option<&[String]>,
        skip_geometry: bool,
    ) -> OgcResult<()> {
        if skip_geometry {
            feature.geometry = None;
        } else if let Some(geometry) = &feature.geometry {
            let reprojected =
                reproject_geometry(geometry, self.descriptor.storage_crs, output_crs)?;
            feature.geometry = Some(reprojected);
        }
        if let Some(names) = properties {
            feature.retain_properties(names);
        }
        Ok(())
    }

    /// Point lookup, reprojected to `output_crs`.
    pub async fn get(&self, id: &str, output_crs: CrsCode) -> OgcResult<Option<Feature>> {
        if !self.descriptor.supports_crs(output_crs) {
            return Err(OgcError::invalid_parameter(
                "crs",
                format!("{} is not supported by '{}'", output_crs, self.descriptor.id),
            ));
        }
        match self.call("get", self.provider.get(id)).await? {
            None => Ok(None),
            Some(Err(err)) => Err(err.into()),
            Some(Ok(mut feature)) => {
                self.shape(&mut feature, output_crs, None, false)?;
                Ok(Some(feature))
            }
        }
    }

    fn writer(&self) -> OgcResult<&dyn FeatureWriter> {
        if !self.provider.capabilities().write {
            return Err(OgcError::Validation(format!(
                "dataset '{}' is read-only",
                self.descriptor.id
            )));
        }
        self.provider.writer().ok_or_else(|| {
            OgcError::Validation(format!("dataset '{}' is read-only", self.descriptor.id))
        })
    }

    /// Validate and reproject an incoming feature into the storage CRS.
    fn prepare(&self, mut feature: Feature, crs: CrsCode) -> OgcResult<Feature> {
        if let Some(geometry) = &feature.geometry {
            geometry
                .validate()
                .map_err(|e| OgcError::Validation(format!("invalid geometry: {}", e)))?;
            feature.geometry = Some(reproject_geometry(
                geometry,
                crs,
                self.descriptor.storage_crs,
            )?);
        }
        Ok(feature)
    }

    /// Insert a feature given in `crs`; returns its id.
    pub async fn create(&self, feature: Feature, crs: CrsCode) -> OgcResult<String> {
        let writer = self.writer()?;
        let feature = self.prepare(feature, crs)?;
        let id = self.call("create", writer.create(feature)).await?;
        info!(dataset = %self.descriptor.id, id = %id, "Feature created");
        Ok(id)
    }

    /// Replace a feature given in `crs`.
    pub async fn update(&self, id: &str, feature: Feature, crs: CrsCode) -> OgcResult<()> {
        let writer = self.writer()?;
        let mut feature = self.prepare(feature, crs)?;
        feature.id = id.to_string();
        if !self.call("update", writer.update(id, feature)).await? {
            return Err(OgcError::NotFound(format!(
                "feature '{}' in '{}'",
                id, self.descriptor.id
            )));
        }
        info!(dataset = %self.descriptor.id, id, "Feature updated");
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> OgcResult<()> {
        let writer = self.writer()?;
        if !self.call("delete", writer.delete(id)).await? {
            return Err(OgcError::NotFound(format!(
                "feature '{}' in '{}'",
                id, self.descriptor.id
            )));
        }
        info!(dataset = %self.descriptor.id, id, "Feature deleted");
        Ok(())
    }
}
