//! Scratch directories and fixture files.

use std::path::{Path, PathBuf};

use serde_json::Value;

/// A directory deleted when the handle drops.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("scratch directory")
}

/// Write `value` as pretty JSON to `dir/name`.
pub fn write_json(dir: &Path, name: &str, value: &Value) -> PathBuf {
    let path = dir.join(name);
    let text = serde_json::to_string_pretty(value).expect("fixture serializes");
    std::fs::write(&path, text).expect("fixture file written");
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_json_lands_in_dir() {
        let dir = temp_test_dir();
        let path = write_json(dir.path(), "collection.json", &json!({"type": "FeatureCollection"}));
        assert!(path.starts_with(dir.path()));
        let back: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back["type"], "FeatureCollection");
    }
}
