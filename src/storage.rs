//! Per-website snippet storage.
//!
//! One JSON document holds every website's snippets under the hostname and
//! its enabled flags under `<hostname>_enabled`:
//!
//! ```json
//! {
//!   "example.com": { "hide_ads": "document.querySelectorAll('.ad')..." },
//!   "example.com_enabled": { "hide_ads": true }
//! }
//! ```
//!
//! The document is read and written wholesale; concurrent writers are last
//! writer wins. Keys this module does not own are carried through untouched.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::{PagetweakError, Result};
use crate::snippet::Snippet;

const ENABLED_SUFFIX: &str = "_enabled";

/// Snippet store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct SnippetStore {
    path: PathBuf,
    data: Map<String, Value>,
}

impl SnippetStore {
    /// Load the store at `path`. A missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Map::new()
            } else {
                match serde_json::from_str(&content)? {
                    Value::Object(map) => map,
                    _ => {
                        return Err(PagetweakError::StorageError(format!(
                            "{} does not contain a JSON object",
                            path.display()
                        )))
                    }
                }
            }
        } else {
            Map::new()
        };

        tracing::debug!(path = %path.display(), keys = data.len(), "Loaded snippet storage");
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the whole document back to disk.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    /// Hostnames with at least one stored snippet.
    pub fn hosts(&self) -> Vec<String> {
        self.data
            .iter()
            .filter(|(_, value)| {
                value
                    .as_object()
                    .is_some_and(|m| !m.is_empty() && m.values().all(Value::is_string))
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// All snippets stored for `host`, in insertion order.
    pub fn snippets(&self, host: &str) -> Vec<Snippet> {
        self.section(host)
            .map(|section| {
                section
                    .iter()
                    .filter_map(|(id, source)| {
                        source.as_str().map(|source| Snippet::new(id.clone(), source, host))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn snippet(&self, host: &str, id: &str) -> Option<Snippet> {
        self.section(host)?
            .get(id)?
            .as_str()
            .map(|source| Snippet::new(id, source, host))
    }

    /// Store `source` under `id`, or under the first free `id_N` when `id` is
    /// taken. Returns the id actually used.
    pub fn insert_snippet(&mut self, host: &str, id: &str, source: &str) -> String {
        let section = self.section_mut(host.to_string());
        let id = unique_id(section, id);
        section.insert(id.clone(), Value::String(source.to_string()));
        tracing::debug!(host, id = %id, "Snippet stored");
        id
    }

    /// Drop the snippet and its enabled flag.
    pub fn remove_snippet(&mut self, host: &str, id: &str) -> Result<Snippet> {
        let removed = self
            .data
            .get_mut(host)
            .and_then(Value::as_object_mut)
            .and_then(|section| section.shift_remove(id))
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| PagetweakError::SnippetNotFound(format!("{} on {}", id, host)))?;

        if let Some(flags) = self
            .data
            .get_mut(&enabled_key(host))
            .and_then(Value::as_object_mut)
        {
            flags.shift_remove(id);
        }
        Ok(Snippet::new(id, removed, host))
    }

    pub fn is_enabled(&self, host: &str, id: &str) -> bool {
        self.section(&enabled_key(host))
            .and_then(|flags| flags.get(id))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_enabled(&mut self, host: &str, id: &str, enabled: bool) -> Result<()> {
        if self.snippet(host, id).is_none() {
            return Err(PagetweakError::SnippetNotFound(format!("{} on {}", id, host)));
        }
        self.section_mut(enabled_key(host))
            .insert(id.to_string(), Value::Bool(enabled));
        Ok(())
    }

    /// Ids flagged enabled, in the order the flags were stored. Flags left
    /// behind for deleted snippets are skipped.
    pub fn enabled_ids(&self, host: &str) -> Vec<String> {
        let Some(flags) = self.section(&enabled_key(host)) else {
            return Vec::new();
        };
        flags
            .iter()
            .filter(|(_, flag)| flag.as_bool() == Some(true))
            .filter(|(id, _)| self.snippet(host, id).is_some())
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn section(&self, key: &str) -> Option<&Map<String, Value>> {
        self.data.get(key).and_then(Value::as_object)
    }

    fn section_mut(&mut self, key: String) -> &mut Map<String, Value> {
        let entry = self
            .data
            .entry(key)
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry {
            Value::Object(map) => map,
            _ => unreachable!("entry was just replaced with an object"),
        }
    }
}

fn enabled_key(host: &str) -> String {
    format!("{}{}", host, ENABLED_SUFFIX)
}

fn unique_id(section: &Map<String, Value>, id: &str) -> String {
    if !section.contains_key(id) {
        return id.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", id, n))
        .find(|candidate| !section.contains_key(candidate))
        .unwrap_or_else(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SnippetStore {
        SnippetStore::load(dir.path().join("storage.json")).unwrap()
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.snippets("example.com").is_empty());
        assert!(store.enabled_ids("example.com").is_empty());
        assert!(store.hosts().is_empty());
    }

    #[test]
    fn layout_matches_the_extension_storage() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.insert_snippet("example.com", "hide_ads", "document.querySelector('.ad').remove()");
        store.set_enabled("example.com", "hide_ads", true).unwrap();
        store.save().unwrap();

        let raw: Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({
                "example.com": { "hide_ads": "document.querySelector('.ad').remove()" },
                "example.com_enabled": { "hide_ads": true }
            })
        );
    }

    #[test]
    fn taken_ids_get_a_numeric_suffix() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        assert_eq!(store.insert_snippet("a.test", "hide", "one"), "hide");
        assert_eq!(store.insert_snippet("a.test", "hide", "two"), "hide_2");
        assert_eq!(store.insert_snippet("a.test", "hide", "three"), "hide_3");
        assert_eq!(store.snippet("a.test", "hide").unwrap().source_text, "one");
        assert_eq!(store.insert_snippet("b.test", "hide", "other"), "hide");
    }

    #[test]
    fn remove_drops_the_enabled_flag() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.insert_snippet("a.test", "x", "code");
        store.set_enabled("a.test", "x", true).unwrap();

        let removed = store.remove_snippet("a.test", "x").unwrap();
        assert_eq!(removed.source_text, "code");
        assert!(!store.is_enabled("a.test", "x"));
        assert!(matches!(
            store.remove_snippet("a.test", "x"),
            Err(PagetweakError::SnippetNotFound(_))
        ));
    }

    #[test]
    fn enabling_an_unknown_snippet_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        assert!(matches!(
            store.set_enabled("a.test", "ghost", true),
            Err(PagetweakError::SnippetNotFound(_))
        ));
    }

    #[test]
    fn enabled_ids_follow_flag_order_and_skip_orphans() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(
            &path,
            r#"{
                "a.test": { "one": "1", "two": "2", "three": "3" },
                "a.test_enabled": { "three": true, "ghost": true, "one": true, "two": false }
            }"#,
        )
        .unwrap();

        let store = SnippetStore::load(&path).unwrap();
        assert_eq!(store.enabled_ids("a.test"), vec!["three", "one"]);
    }

    #[test]
    fn unrelated_keys_survive_a_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, r#"{"openai_api_key": "sk-test", "a.test": {}}"#).unwrap();

        let mut store = SnippetStore::load(&path).unwrap();
        store.insert_snippet("a.test", "x", "code");
        store.save().unwrap();

        let reloaded = SnippetStore::load(&path).unwrap();
        assert_eq!(reloaded.snippets("a.test").len(), 1);
        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["openai_api_key"], "sk-test");
    }

    #[test]
    fn hosts_lists_sites_with_snippets() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.insert_snippet("a.test", "x", "1");
        store.insert_snippet("b.test", "y", "2");
        store.set_enabled("b.test", "y", true).unwrap();
        assert_eq!(store.hosts(), vec!["a.test", "b.test"]);
    }

    #[test]
    fn non_object_document_is_a_storage_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            SnippetStore::load(&path),
            Err(PagetweakError::StorageError(_))
        ));
    }
}
