//! Raw request parameters as handed over by the transport layer.

use ogc_common::{OgcError, OgcResult};

/// Ordered key/value pairs from a request, already percent-decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawQueryParams {
    pairs: Vec<(String, String)>,
}

impl RawQueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse `key=value` strings such as command-line arguments.
    pub fn parse_assignments<I, S>(items: I) -> OgcResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut params = Self::new();
        for item in items {
            let item = item.as_ref();
            let (key, value) = item.split_once('=').ok_or_else(|| {
                OgcError::Validation(format!("expected key=value, got '{}'", item))
            })?;
            params.insert(key.trim(), value);
        }
        Ok(params)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Single value of a parameter; repeated keys are an error.
    pub fn get(&self, key: &str) -> OgcResult<Option<&str>> {
        let mut values = self.pairs.iter().filter(|(k, _)| k == key);
        let first = values.next().map(|(_, v)| v.as_str());
        if values.next().is_some() {
            return Err(OgcError::invalid_parameter(key, "specified more than once"));
        }
        Ok(first)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
