//! Model catalog: the bench's configured models, loaded from `models.json`.
//!
//! ```json
//! [
//!   { "id": "seedream", "name": "Seedream 4.5", "driver": "doubao",
//!     "model": "doubao-seedream-4-5-251128", "options": { "size": "2K" } },
//!   { "id": "trellis-local", "name": "TRELLIS.2", "driver": "trellis",
//!     "options": { "url": "http://gpu-box:8000", "textureSize": 2048 } }
//! ]
//! ```
//!
//! A `{ "models": [...] }` wrapper object is accepted as well.

use crate::driver::{Driver, DriverKind, DriverOptions, GenerationRequest};
use crate::error::{DriverError, Result};
use crate::registry::{self, DriverSettings};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// One configured model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEntry {
    /// Unique catalog id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Driver that serves this model.
    pub driver: DriverKind,
    /// Vendor model identifier passed to the driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Environment variable holding this entry's API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Default driver options; request options override them.
    #[serde(default)]
    pub options: DriverOptions,
}

impl ModelEntry {
    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Driver settings for this entry.
    ///
    /// The key is read from `api_key_env` when set; otherwise the driver
    /// falls back to its own environment variables.
    pub fn settings(&self) -> DriverSettings {
        let api_key = self
            .api_key_env
            .as_deref()
            .filter(|var| !var.trim().is_empty())
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty());

        DriverSettings {
            api_key,
            ..DriverSettings::default()
        }
    }

    /// A request prefilled with this entry's model and default options.
    pub fn request(&self, prompt: impl Into<String>) -> GenerationRequest {
        let mut request = GenerationRequest::new(prompt).with_options(self.options.clone());
        if let Some(model) = self.model.as_deref().filter(|m| !m.trim().is_empty()) {
            request = request.with_model(model);
        }
        request
    }

    /// Builds the driver for this entry.
    pub fn build_driver(&self) -> Result<Box<dyn Driver>> {
        registry::build_driver(self.driver, &self.settings())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    List(Vec<ModelEntry>),
    Wrapped { models: Vec<ModelEntry> },
}

/// The set of configured models.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    entries: Vec<ModelEntry>,
}

impl Catalog {
    /// Builds a catalog, rejecting duplicate ids.
    pub fn new(entries: Vec<ModelEntry>) -> Result<Self> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.id.trim().is_empty() {
                return Err(DriverError::InvalidRequest(
                    "catalog entry with empty id".into(),
                ));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(DriverError::InvalidRequest(format!(
                    "duplicate model id in catalog: {}",
                    entry.id
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Parses a catalog from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let entries = match serde_json::from_str::<CatalogFile>(json) {
            Ok(CatalogFile::List(entries)) | Ok(CatalogFile::Wrapped { models: entries }) => entries,
            // Untagged errors are vague; reparse as a list for the real message
            Err(_) => serde_json::from_str::<Vec<ModelEntry>>(json)?,
        };
        Self::new(entries)
    }

    /// Loads a catalog file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let catalog = Self::from_json_str(&text)?;
        tracing::debug!(path = %path.display(), models = catalog.entries.len(), "loaded model catalog");
        Ok(catalog)
    }

    /// Looks up an entry by id.
    pub fn get(&self, id: &str) -> Option<&ModelEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// All entries, in file order.
    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the catalog has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CATALOG: &str = r#"[
        { "id": "wanx", "name": "Wanx v1", "driver": "dashscope", "model": "wanx-v1" },
        { "id": "trellis-local", "driver": "trellis2", "options": { "url": "http://gpu:8000", "remesh": true } },
        { "id": "tripo-team", "name": "Tripo", "driver": "tripo", "apiKeyEnv": "EVALGEN_TEST_TRIPO_KEY" }
    ]"#;

    #[test]
    fn test_parse_list() {
        let catalog = Catalog::from_json_str(CATALOG).unwrap();
        assert_eq!(catalog.len(), 3);

        let trellis = catalog.get("trellis-local").unwrap();
        assert_eq!(trellis.driver, DriverKind::Trellis);
        assert_eq!(trellis.display_name(), "trellis-local");
        assert_eq!(trellis.options.get_str("url").as_deref(), Some("http://gpu:8000"));

        let ids: Vec<&str> = catalog.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["wanx", "trellis-local", "tripo-team"]);
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn test_parse_wrapped() {
        let catalog = Catalog::from_json_str(
            r#"{ "models": [ { "id": "g", "name": "Gemini", "driver": "gemini" } ] }"#,
        )
        .unwrap();
        assert_eq!(catalog.get("g").unwrap().driver, DriverKind::Gemini);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = Catalog::from_json_str(
            r#"[ { "id": "a", "driver": "trellis" }, { "id": "a", "driver": "ltx2" } ]"#,
        )
        .unwrap_err();
        assert!(matches!(err, DriverError::InvalidRequest(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn test_unknown_driver_fails_at_load() {
        let err = Catalog::from_json_str(r#"[ { "id": "a", "driver": "midjourney" } ]"#).unwrap_err();
        match err {
            DriverError::Json(e) => assert!(e.to_string().contains("unknown driver")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_request_prefills_model_and_options() {
        let catalog = Catalog::from_json_str(CATALOG).unwrap();

        let wanx = catalog.get("wanx").unwrap().request("a lighthouse");
        assert_eq!(wanx.model.as_deref(), Some("wanx-v1"));
        assert_eq!(wanx.prompt, "a lighthouse");

        let trellis = catalog.get("trellis-local").unwrap().request("");
        assert!(trellis.model.is_none());
        assert!(trellis.options.is_explicitly_true("remesh"));
    }

    #[test]
    fn test_settings_read_entry_key_env() {
        std::env::set_var("EVALGEN_TEST_TRIPO_KEY", "tsk_from_env");
        let catalog = Catalog::from_json_str(CATALOG).unwrap();

        let settings = catalog.get("tripo-team").unwrap().settings();
        assert_eq!(settings.api_key.as_deref(), Some("tsk_from_env"));
        assert!(catalog.get("wanx").unwrap().settings().api_key.is_none());
        std::env::remove_var("EVALGEN_TEST_TRIPO_KEY");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();

        let catalog = Catalog::load(file.path()).unwrap();
        assert_eq!(catalog.len(), 3);
        assert!(Catalog::load(file.path().with_extension("missing")).is_err());
    }

    #[cfg(feature = "trellis")]
    #[test]
    fn test_build_driver() {
        let catalog = Catalog::from_json_str(CATALOG).unwrap();
        let driver = catalog.get("trellis-local").unwrap().build_driver().unwrap();
        assert_eq!(driver.kind(), DriverKind::Trellis);
    }
}
