//! `sortby` parsing and the value ordering shared by every sort path.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    pub fn is_desc(&self) -> bool {
        self.direction == SortDirection::Desc
    }
}

/// Parse `sortby=[+|-]field[,...]`.
///
/// A leading space is treated as `+`, since an unescaped `+` in a query
/// string decodes to a space.
pub fn parse_sortby(value: &str) -> Result<Vec<SortKey>, String> {
    let mut keys = Vec::new();
    for part in value.split(',') {
        let part = part.trim();
        let (direction, field) = match part.strip_prefix('-') {
            Some(rest) => (SortDirection::Desc, rest),
            None => (SortDirection::Asc, part.strip_prefix('+').unwrap_or(part)),
        };
        let field = field.trim();
        if field.is_empty() {
            return Err(format!("empty sort field in '{}'", value));
        }
        if keys.iter().any(|k: &SortKey| k.field == field) {
            return Err(format!("field '{}' sorted more than once", field));
        }
        keys.push(SortKey {
            field: field.to_string(),
            direction,
        });
    }
    Ok(keys)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over property values: null lowest, then booleans, numbers
/// and strings. Values of different types order by type.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            a.to_string().cmp(&b.to_string())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Compare two sort-key tuples under the given directions.
///
/// `keys` and the value slices line up index by index; `None` values
/// (missing properties) order as null.
pub fn compare_keys(keys: &[SortKey], a: &[Value], b: &[Value]) -> Ordering {
    for (i, key) in keys.iter().enumerate() {
        let x = a.get(i).unwrap_or(&Value::Null);
        let y = b.get(i).unwrap_or(&Value::Null);
        let ord = compare_values(x, y);
        let ord = if key.is_desc() { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
