//! Loading resource documents and their schema fragments.
//!
//! Documents come from files, strings, or HTTP URLs. External `$ref`s are
//! inlined relative to the referencing file so every tier schema compiles
//! standalone.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::error::LoadError;

#[cfg(feature = "remote")]
use std::time::Duration;

#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Load a JSON value from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::InvalidJson` if the file isn't valid JSON.
pub fn load_json(path: &Path) -> Result<Value, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    debug!(path = %path.display(), "loading file");
    let content = std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    load_json_str(&content)
}

/// Parse a JSON value from a string.
///
/// # Errors
///
/// Returns `LoadError::InvalidJson` if the string isn't valid JSON.
pub fn load_json_str(content: &str) -> Result<Value, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })
}

/// Fetch a JSON value from an HTTP/HTTPS URL.
///
/// # Errors
///
/// Returns `LoadError::NetworkError` if the request fails, returns an error
/// status, or the body isn't valid JSON.
#[cfg(feature = "remote")]
pub fn load_json_url(url: &str) -> Result<Value, LoadError> {
    let network = |source| LoadError::NetworkError {
        url: url.to_string(),
        source,
    };

    debug!(url, "fetching document");
    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network)?;

    client
        .get(url)
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.json())
        .map_err(network)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Load from a file path or URL, whichever `source` looks like.
///
/// # Errors
///
/// Returns the error of the underlying loader. Without the `remote` feature
/// a URL is reported as `FileNotFound`.
pub fn load_json_auto(source: &str) -> Result<Value, LoadError> {
    if is_url(source) {
        #[cfg(feature = "remote")]
        {
            load_json_url(source)
        }
        #[cfg(not(feature = "remote"))]
        {
            Err(LoadError::FileNotFound {
                path: PathBuf::from(source),
            })
        }
    } else {
        load_json(Path::new(source))
    }
}

/// Navigate a JSON Pointer fragment such as `#/$defs/widget`.
///
/// # Errors
///
/// Returns `LoadError::BundleError` if any segment is missing.
pub fn navigate_fragment(value: &Value, fragment: &str) -> Result<Value, LoadError> {
    let path = fragment.trim_start_matches('#').trim_start_matches('/');
    if path.is_empty() {
        return Ok(value.clone());
    }

    let mut current = value;
    for part in path.split('/') {
        // ~1 = /, ~0 = ~
        let key = part.replace("~1", "/").replace("~0", "~");
        current = match current {
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            other => other.get(&key),
        }
        .ok_or_else(|| LoadError::BundleError {
            message: format!("fragment not found: {}", fragment),
        })?;
    }
    Ok(current.clone())
}

/// Inline every external `$ref` in `value`, resolving paths against `base_dir`.
///
/// Internal refs (`#/...`) of the root document are left for the validator;
/// internal refs inside loaded files are resolved against that file. `"#"`
/// self-references are left as-is.
///
/// # Errors
///
/// Returns `LoadError` if a referenced file can't be loaded, a fragment is
/// missing, or references form a cycle.
pub fn bundle_refs(value: &mut Value, base_dir: &Path) -> Result<(), LoadError> {
    bundle_inner(value, base_dir, None, &mut HashSet::new())
}

fn bundle_inner(
    value: &mut Value,
    base_dir: &Path,
    file_root: Option<&Value>,
    visited: &mut HashSet<String>,
) -> Result<(), LoadError> {
    match value {
        Value::Object(obj) => {
            let reference = obj.get("$ref").and_then(Value::as_str).map(str::to_string);

            if let Some(reference) = reference {
                let target = match (reference.strip_prefix('#'), file_root) {
                    (Some(""), _) | (Some(_), None) => None,
                    (Some(_), Some(root)) => {
                        let mut target = navigate_fragment(root, &reference)?;
                        bundle_inner(&mut target, base_dir, file_root, visited)?;
                        Some(target)
                    }
                    (None, _) => Some(load_external(&reference, base_dir, visited)?),
                };

                if let Some(target) = target {
                    obj.remove("$ref");
                    if let Value::Object(inlined) = target {
                        for (k, v) in inlined {
                            obj.entry(k).or_insert(v);
                        }
                    }
                    return Ok(());
                }
            }

            for child in obj.values_mut() {
                bundle_inner(child, base_dir, file_root, visited)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                bundle_inner(item, base_dir, file_root, visited)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn load_external(
    reference: &str,
    base_dir: &Path,
    visited: &mut HashSet<String>,
) -> Result<Value, LoadError> {
    let (file_part, fragment) = match reference.find('#') {
        Some(idx) => (&reference[..idx], Some(&reference[idx..])),
        None => (reference, None),
    };

    let path = base_dir.join(file_part);
    let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
    let visit_key = format!("{}|{}", canonical.display(), fragment.unwrap_or(""));
    if visited.contains(&visit_key) {
        return Err(LoadError::BundleError {
            message: format!("circular reference detected: {}", reference),
        });
    }

    let loaded = load_json(&path)?;
    let mut target = match fragment {
        Some(fragment) => navigate_fragment(&loaded, fragment)?,
        None => loaded.clone(),
    };

    visited.insert(visit_key.clone());
    let ref_dir: PathBuf = path.parent().map_or_else(|| base_dir.to_path_buf(), Path::to_path_buf);
    bundle_inner(&mut target, &ref_dir, Some(&loaded), visited)?;
    visited.remove(&visit_key);

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn load_json_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"name": "widget"}}"#).unwrap();

        let doc = load_json(file.path()).unwrap();
        assert_eq!(doc["name"], "widget");
    }

    #[test]
    fn load_json_file_not_found() {
        let result = load_json(Path::new("/nonexistent/widget.json"));
        assert!(matches!(result, Err(LoadError::FileNotFound { .. })));
    }

    #[test]
    fn load_json_invalid() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not valid json").unwrap();

        let result = load_json(file.path());
        assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
    }

    #[test]
    fn is_url_detects_scheme() {
        assert!(is_url("https://example.com/widget.json"));
        assert!(is_url("http://example.com/widget.json"));
        assert!(!is_url("./widget.json"));
        assert!(!is_url("widget.json"));
    }

    #[test]
    fn navigate_fragment_handles_arrays_and_escapes() {
        let doc = json!({ "a/b": { "items": [{ "x": 1 }, { "x": 2 }] } });
        assert_eq!(navigate_fragment(&doc, "#/a~1b/items/1/x").unwrap(), json!(2));
        assert!(matches!(
            navigate_fragment(&doc, "#/missing"),
            Err(LoadError::BundleError { .. })
        ));
    }

    #[test]
    fn bundle_inlines_external_refs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("common.json"),
            r##"{
                "$defs": {
                    "id": { "type": "string", "minLength": 1 },
                    "owner": { "type": "object", "properties": { "id": { "$ref": "#/$defs/id" } } }
                }
            }"##,
        )
        .unwrap();

        let mut doc = json!({
            "properties": {
                "owner": { "$ref": "common.json#/$defs/owner" },
                "local": { "$ref": "#/$defs/kept" }
            }
        });
        bundle_refs(&mut doc, dir.path()).unwrap();

        assert_eq!(
            doc["properties"]["owner"]["properties"]["id"],
            json!({ "type": "string", "minLength": 1 })
        );
        assert_eq!(doc["properties"]["local"], json!({ "$ref": "#/$defs/kept" }));
    }

    #[test]
    fn bundle_detects_cycles() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.json"), r#"{ "$ref": "b.json" }"#).unwrap();
        std::fs::write(dir.path().join("b.json"), r#"{ "$ref": "a.json" }"#).unwrap();

        let mut doc = json!({ "$ref": "a.json" });
        let err = bundle_refs(&mut doc, dir.path()).unwrap_err();
        assert!(err.to_string().contains("circular reference"));
    }

    #[cfg(feature = "remote")]
    mod remote {
        use super::*;

        #[test]
        fn load_json_url_valid() {
            let mut server = mockito::Server::new();
            let mock = server
                .mock("GET", "/widget.json")
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(r#"{"name": "widget"}"#)
                .create();

            let doc = load_json_auto(&format!("{}/widget.json", server.url())).unwrap();
            assert_eq!(doc["name"], "widget");
            mock.assert();
        }

        #[test]
        fn load_json_url_error_status() {
            let mut server = mockito::Server::new();
            let _mock = server.mock("GET", "/missing.json").with_status(404).create();

            let result = load_json_url(&format!("{}/missing.json", server.url()));
            assert!(matches!(result, Err(LoadError::NetworkError { .. })));
        }
    }
}
