//! Page tokens.
//!
//! A token is the URL-safe base64 of a small JSON document describing where
//! the next page starts. Callers treat it as opaque.

use std::cmp::Ordering;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ogc_common::OgcError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::feature::Feature;
use crate::sort::{compare_keys, SortKey};

/// Resume state carried between pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PageToken {
    /// Skip this many matching features.
    Offset { offset: u64 },

    /// Resume a residual scan at this raw position in the natively
    /// filtered stream; `matched_before` matches precede it.
    Scan { position: u64, matched_before: u64 },

    /// Resume after the feature with these sort values and id.
    After {
        key: Vec<Value>,
        id: String,
        matched_before: u64,
    },
}

impl PageToken {
    pub fn encode(&self) -> String {
        // serializing a tagged enum of plain values cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, PageTokenError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| PageTokenError::Encoding(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| PageTokenError::State(e.to_string()))
    }

    /// Matches that precede the page this token starts.
    pub fn matched_before(&self) -> u64 {
        match self {
            PageToken::Offset { offset } => *offset,
            PageToken::Scan { matched_before, .. } | PageToken::After { matched_before, .. } => {
                *matched_before
            }
        }
    }

    /// Keyset token positioned after `feature`.
    pub fn after(feature: &Feature, sort_by: &[SortKey], id_field: &str, matched_before: u64) -> Self {
        PageToken::After {
            key: feature.sort_values(sort_by, id_field),
            id: feature.id.clone(),
            matched_before,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PageTokenError {
    #[error("token is not valid base64: {0}")]
    Encoding(String),

    #[error("token does not describe a page: {0}")]
    State(String),
}

impl From<PageTokenError> for OgcError {
    fn from(err: PageTokenError) -> Self {
        OgcError::invalid_parameter("cursor", err.to_string())
    }
}

/// Total order used for paging: the sort keys, then id ascending.
pub fn compare_features(a: &Feature, b: &Feature, sort_by: &[SortKey], id_field: &str) -> Ordering {
    compare_keys(
        sort_by,
        &a.sort_values(sort_by, id_field),
        &b.sort_values(sort_by, id_field),
    )
    .then_with(|| a.id.cmp(&b.id))
}

/// Whether `feature` sorts strictly after the keyset position `(key, id)`.
pub fn is_after(feature: &Feature, key: &[Value], id: &str, sort_by: &[SortKey], id_field: &str) -> bool {
    compare_keys(sort_by, &feature.sort_values(sort_by, id_field), key)
        .then_with(|| feature.id.as_str().cmp(id))
        == Ordering::Greater
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_token_round_trip() {
        let states = vec![
            PageToken::Offset { offset: 0 },
            PageToken::Offset { offset: 40 },
            PageToken::Scan {
                position: 1234,
                matched_before: 20,
            },
            PageToken::After {
                key: vec![json!(3.5), Value::Null, json!("O'Hare / ünïcode")],
                id: "feature-9".into(),
                matched_before: 2,
            },
            PageToken::After {
                key: vec![],
                id: String::new(),
                matched_before: 0,
            },
        ];
        for state in states {
            let token = state.encode();
            assert!(token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
            assert_eq!(PageToken::decode(&token).unwrap(), state);
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            PageToken::decode("!!not base64!!"),
            Err(PageTokenError::Encoding(_))
        ));
        let not_a_state = URL_SAFE_NO_PAD.encode(b"{\"mode\":\"sideways\"}");
        assert!(matches!(
            PageToken::decode(&not_a_state),
            Err(PageTokenError::State(_))
        ));

        let err: OgcError = PageTokenError::State("x".into()).into();
        assert!(matches!(err, OgcError::InvalidParameter { ref param, .. } if param == "cursor"));
    }

    #[test]
    fn test_id_breaks_ties() {
        let sort = vec![SortKey::asc("rank")];
        let a = Feature::new("a").with_property("rank", 1);
        let b = Feature::new("b").with_property("rank", 1);
        let c = Feature::new("c").with_property("rank", 0);
        let mut features = vec![b.clone(), a.clone(), c.clone()];
        features.sort_by(|x, y| compare_features(x, y, &sort, "id"));
        let ids: Vec<&str> = features.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);

        assert!(is_after(&b, &[json!(1)], "a", &sort, "id"));
        assert!(!is_after(&a, &[json!(1)], "a", &sort, "id"));
        assert!(!is_after(&c, &[json!(1)], "a", &sort, "id"));
    }

    #[test]
    fn test_sort_on_id_field() {
        let sort = vec![SortKey::desc("fid")];
        let a = Feature::new("a");
        let b = Feature::new("b");
        assert_eq!(compare_features(&a, &b, &sort, "fid"), Ordering::Greater);
    }
}
