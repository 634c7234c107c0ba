//! Features and the result envelope returned by every query.

use ogc_common::{CrsCode, Geometry, OgcError};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::sort::SortKey;

/// A GeoJSON-shaped feature.
///
/// Geometry is expressed in the CRS of the surrounding envelope and may be
/// absent for non-spatial records. Property values are scalars or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Feature")]
pub struct Feature {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,

    #[serde(default)]
    pub geometry: Option<Geometry>,

    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// GeoJSON allows numeric ids; they are carried as strings.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "feature id must be a string or number, got {}",
            other
        ))),
    }
}

impl Feature {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            geometry: None,
            properties: Map::new(),
        }
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Property value, treating the id field as a property.
    pub fn value_of(&self, name: &str, id_field: &str) -> Option<Value> {
        if name == id_field {
            return Some(Value::String(self.id.clone()));
        }
        self.properties.get(name).cloned()
    }

    /// Values of the sort fields, null where absent.
    pub fn sort_values(&self, sort_by: &[SortKey], id_field: &str) -> Vec<Value> {
        sort_by
            .iter()
            .map(|k| self.value_of(&k.field, id_field).unwrap_or(Value::Null))
            .collect()
    }

    /// Keep only the named properties, in their stored order.
    pub fn retain_properties(&mut self, names: &[String]) {
        self.properties.retain(|k, _| names.iter().any(|n| n == k));
    }

    /// Decode a stored GeoJSON feature object.
    ///
    /// The id comes from the `id` member, falling back to
    /// `properties[id_field]`. Nested property values are rejected.
    pub fn from_geojson(value: Value, id_field: &str) -> Result<Feature, RecordError> {
        let Value::Object(mut object) = value else {
            return Err(RecordError::new(None, "record is not a JSON object"));
        };

        let properties = match object.remove("properties") {
            Some(Value::Object(props)) => props,
            Some(Value::Null) | None => Map::new(),
            Some(_) => return Err(RecordError::new(None, "properties is not an object")),
        };

        let id = match object.remove("id").or_else(|| properties.get(id_field).cloned()) {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(RecordError::new(None, "record has no usable id")),
        };

        let geometry = match object.remove("geometry") {
            None | Some(Value::Null) => None,
            Some(raw) => {
                let geometry: Geometry = serde_json::from_value(raw)
                    .map_err(|e| RecordError::new(Some(&id), format!("invalid geometry: {}", e)))?;
                geometry
                    .validate()
                    .map_err(|e| RecordError::new(Some(&id), e.to_string()))?;
                Some(geometry)
            }
        };

        if let Some((name, _)) = properties
            .iter()
            .find(|(_, v)| matches!(v, Value::Array(_) | Value::Object(_)))
        {
            return Err(RecordError::new(
                Some(&id),
                format!("property '{}' is not a scalar", name),
            ));
        }

        Ok(Feature {
            id,
            geometry,
            properties,
        })
    }
}

/// A record that could not be decoded into a [`Feature`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub message: String,
}

impl RecordError {
    pub fn new(id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            id: id.map(str::to_string),
            message: message.into(),
        }
    }
}

impl From<RecordError> for OgcError {
    fn from(err: RecordError) -> Self {
        OgcError::DataIntegrity {
            id: err.id.unwrap_or_else(|| "<unknown>".to_string()),
            message: err.message,
        }
    }
}

/// Uniform container for a page of query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "FeatureCollection", rename_all = "camelCase")]
pub struct FeatureResultEnvelope {
    pub features: Vec<Feature>,

    /// Features satisfying the query, independent of paging.
    pub number_matched: u64,

    /// Always `features.len()`.
    pub number_returned: usize,

    /// False when `number_matched` is an upper-bound estimate.
    pub number_matched_exact: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_token: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub integrity_errors: Vec<RecordError>,

    /// Output CRS URI.
    pub crs: String,
}

impl FeatureResultEnvelope {
    pub fn new(features: Vec<Feature>, number_matched: u64, crs: CrsCode) -> Self {
        Self {
            number_returned: features.len(),
            features,
            number_matched,
            number_matched_exact: true,
            next_token: None,
            prev_token: None,
            integrity_errors: Vec::new(),
            crs: crs.uri(),
        }
    }

    /// Empty result set with an exact zero count.
    pub fn empty(crs: CrsCode) -> Self {
        Self::new(Vec::new(), 0, crs)
    }

    /// `resulttype=hits`: count only.
    pub fn hits(number_matched: u64, exact: bool, crs: CrsCode) -> Self {
        let mut envelope = Self::new(Vec::new(), number_matched, crs);
        envelope.number_matched_exact = exact;
        envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_feature_geojson_shape() {
        let feature = Feature::new("f1")
            .with_geometry(Geometry::point(1.0, 2.0))
            .with_property("name", "one")
            .with_property("rank", 3);
        let json = serde_json::to_value(&feature).unwrap();
        assert_eq!(json["type"], "Feature");
        assert_eq!(json["id"], "f1");
        assert_eq!(json["geometry"]["type"], "Point");
        assert_eq!(json["properties"]["rank"], 3);

        let back: Feature = serde_json::from_value(json).unwrap();
        assert_eq!(back, feature);
    }

    #[test]
    fn test_properties_keep_insertion_order() {
        let feature = Feature::new("f")
            .with_property("zeta", 1)
            .with_property("alpha", 2)
            .with_property("mid", 3);
        let keys: Vec<&String> = feature.properties.keys().collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_from_geojson_numeric_id_and_fallback() {
        let f = Feature::from_geojson(
            json!({"type": "Feature", "id": 7, "geometry": null, "properties": {}}),
            "fid",
        )
        .unwrap();
        assert_eq!(f.id, "7");
        assert!(f.geometry.is_none());

        let f = Feature::from_geojson(
            json!({"type": "Feature", "properties": {"fid": "abc"}}),
            "fid",
        )
        .unwrap();
        assert_eq!(f.id, "abc");
    }

    #[test]
    fn test_from_geojson_integrity_errors() {
        let err = Feature::from_geojson(json!([1, 2]), "id").unwrap_err();
        assert!(err.id.is_none());

        let err = Feature::from_geojson(
            json!({"id": "bad", "geometry": {"type": "Point", "coordinates": "x"}}),
            "id",
        )
        .unwrap_err();
        assert_eq!(err.id.as_deref(), Some("bad"));

        let err = Feature::from_geojson(
            json!({"id": "nested", "properties": {"tags": ["a"]}}),
            "id",
        )
        .unwrap_err();
        assert!(err.message.contains("tags"));
    }

    #[test]
    fn test_envelope_serializes_camel_case() {
        let mut envelope = FeatureResultEnvelope::new(vec![Feature::new("a")], 5, CrsCode::Crs84);
        envelope.next_token = Some("abc".into());
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "FeatureCollection");
        assert_eq!(json["numberMatched"], 5);
        assert_eq!(json["numberReturned"], 1);
        assert_eq!(json["nextToken"], "abc");
        assert!(json.get("prevToken").is_none());
        assert!(json.get("integrityErrors").is_none());
        assert_eq!(json["crs"], "http://www.opengis.net/def/crs/OGC/1.3/CRS84");
    }

    #[test]
    fn test_record_error_into_ogc_error() {
        let err: OgcError = RecordError::new(Some("x"), "broken").into();
        assert_eq!(
            err,
            OgcError::DataIntegrity {
                id: "x".into(),
                message: "broken".into()
            }
        );
    }
}
