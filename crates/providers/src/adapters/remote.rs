//! A collection on a remote OGC API Features service.
//!
//! Bbox, datetime and equality filters are forwarded as query parameters;
//! the remote pages by offset. Nothing here retries.

use std::time::Duration;

use async_trait::async_trait;
use feature_query::{BackendKind, Feature, FilterOp, Literal, RecordError};
use ogc_common::{CrsCode, DateTimeFilter};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{ProviderError, ProviderResult};
use crate::eval::FeatureSchema;
use crate::traits::{
    FeatureProvider, FetchRequest, FetchResult, FetchStart, MatchCount, ProviderCapabilities,
    ProviderRow,
};

pub struct RemoteProvider {
    client: Client,
    items_url: String,
    schema: FeatureSchema,
}

fn literal_param(literal: &Literal) -> ProviderResult<String> {
    match literal {
        Literal::String(s) => Ok(s.clone()),
        Literal::Number(n) => Ok(n.to_string()),
        Literal::Bool(b) => Ok(b.to_string()),
        Literal::Null | Literal::List(_) => Err(ProviderError::Unsupported(format!(
            "{} cannot be sent to a remote service",
            literal
        ))),
    }
}

fn datetime_param(datetime: &DateTimeFilter) -> String {
    let fmt = |t: &chrono::DateTime<chrono::Utc>| t.to_rfc3339();
    match datetime {
        DateTimeFilter::Instant(t) => fmt(t),
        DateTimeFilter::Interval(i) => format!(
            "{}/{}",
            i.start.as_ref().map_or("..".to_string(), fmt),
            i.end.as_ref().map_or("..".to_string(), fmt)
        ),
    }
}

/// Map a non-success status to an adapter error.
fn status_error(status: StatusCode, url: &str) -> ProviderError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::Unavailable(format!("{} returned {}", url, status))
    } else {
        ProviderError::Unsupported(format!("{} rejected the request: {}", url, status))
    }
}

impl RemoteProvider {
    pub fn new(
        base_url: &str,
        collection: &str,
        timeout: Duration,
        schema: FeatureSchema,
    ) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| ProviderError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            items_url: format!(
                "{}/collections/{}/items",
                base_url.trim_end_matches('/'),
                collection
            ),
            schema,
        })
    }

    fn decode(&self, index: usize, value: Value) -> ProviderRow {
        Feature::from_geojson(value, &self.schema.id_field).map_err(|e| RecordError {
            id: e.id.or_else(|| Some(format!("#{}", index))),
            message: e.message,
        })
    }

    fn query_params(&self, request: &FetchRequest) -> ProviderResult<Vec<(String, String)>> {
        let offset = match request.start {
            FetchStart::Offset(n) => n,
            FetchStart::After { .. } => {
                return Err(ProviderError::Unsupported(
                    "remote collections page by offset".to_string(),
                ))
            }
        };
        let crs = self.schema.crs;
        let mut params = vec![
            ("f".to_string(), "json".to_string()),
            ("limit".to_string(), request.limit.max(1).to_string()),
            ("offset".to_string(), offset.to_string()),
        ];
        if crs != CrsCode::Crs84 {
            params.push(("crs".to_string(), crs.uri()));
        }
        if let Some(bbox) = &request.bbox {
            let order = crs.axis_order();
            let (a1, b1) = order.from_xy(bbox.min_x, bbox.min_y);
            let (a2, b2) = order.from_xy(bbox.max_x, bbox.max_y);
            params.push(("bbox".to_string(), format!("{},{},{},{}", a1, b1, a2, b2)));
            if crs != CrsCode::Crs84 {
                params.push(("bbox-crs".to_string(), crs.uri()));
            }
        }
        if let Some(datetime) = &request.datetime {
            params.push(("datetime".to_string(), datetime_param(datetime)));
        }
        for filter in &request.filters {
            if filter.op != FilterOp::Eq {
                return Err(ProviderError::Unsupported(format!(
                    "'{}' cannot be sent to a remote service",
                    filter.op
                )));
            }
            params.push((filter.name.clone(), literal_param(&filter.value)?));
        }
        if !request.sort_by.is_empty() {
            return Err(ProviderError::Unsupported(
                "remote collections are not sortable".to_string(),
            ));
        }
        Ok(params)
    }
}

#[async_trait]
impl FeatureProvider for RemoteProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteService
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            bbox: true,
            datetime: true,
            filter_ops: vec![FilterOp::Eq],
            ..ProviderCapabilities::default()
        }
    }

    #[instrument(skip(self, request), fields(url = %self.items_url))]
    async fn fetch(&self, request: &FetchRequest) -> ProviderResult<FetchResult> {
        let params = self.query_params(request)?;
        let response = self.client.get(&self.items_url).query(&params).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), &self.items_url));
        }
        let mut body: Value = response.json().await?;

        let features = match body.get_mut("features").map(Value::take) {
            Some(Value::Array(features)) => features,
            _ => {
                return Err(ProviderError::Malformed(
                    "response has no features array".to_string(),
                ))
            }
        };
        let matched = request
            .count
            .then(|| body.get("numberMatched").and_then(Value::as_u64))
            .flatten()
            .map(|value| MatchCount { value, exact: true });

        let rows: Vec<ProviderRow> = if request.limit == 0 {
            Vec::new()
        } else {
            features
                .into_iter()
                .take(request.limit)
                .enumerate()
                .map(|(i, f)| self.decode(i, f))
                .collect()
        };
        debug!(rows = rows.len(), "Remote fetch");
        Ok(FetchResult { rows, matched })
    }

    async fn get(&self, id: &str) -> ProviderResult<Option<ProviderRow>> {
        let url = format!("{}/{}", self.items_url, id);
        let mut request = self.client.get(&url).query(&[("f", "json")]);
        if self.schema.crs != CrsCode::Crs84 {
            request = request.query(&[("crs", self.schema.crs.uri())]);
        }
        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let value: Value = response.json().await?;
                Ok(Some(self.decode(0, value)))
            }
            status => Err(status_error(status, &url)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feature_query::PropertyFilter;
    use ogc_common::BoundingBox;

    fn provider(crs: CrsCode) -> RemoteProvider {
        let schema = FeatureSchema {
            crs,
            ..FeatureSchema::default()
        };
        RemoteProvider::new("http://example.test/api/", "lakes", Duration::from_secs(1), schema)
            .unwrap()
    }

    #[test]
    fn test_items_url() {
        assert_eq!(
            provider(CrsCode::Crs84).items_url,
            "http://example.test/api/collections/lakes/items"
        );
    }

    #[test]
    fn test_query_params_use_authority_axis_order() {
        let mut request = FetchRequest::all(10);
        request.bbox = Some(BoundingBox::new(5.0, 50.0, 6.0, 51.0));
        request.filters = vec![PropertyFilter::eq("kind", Literal::String("fresh".into()))];
        request.start = FetchStart::Offset(30);

        let params = provider(CrsCode::Epsg4326).query_params(&request).unwrap();
        let get = |k: &str| params.iter().find(|(n, _)| n == k).map(|(_, v)| v.as_str());
        assert_eq!(get("bbox"), Some("50,5,51,6"));
        assert_eq!(get("bbox-crs"), Some("http://www.opengis.net/def/crs/EPSG/0/4326"));
        assert_eq!(get("offset"), Some("30"));
        assert_eq!(get("kind"), Some("fresh"));
    }

    #[test]
    fn test_null_filter_is_unsupported() {
        let mut request = FetchRequest::all(10);
        request.filters = vec![PropertyFilter::eq("kind", Literal::Null)];
        assert!(provider(CrsCode::Crs84).query_params(&request).is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, "u"),
            ProviderError::Unavailable(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, "u"),
            ProviderError::Unsupported(_)
        ));
    }
}
