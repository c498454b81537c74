//! A small JSON key/value map saved to disk on every change.
//!
//! Backs both the tool state (`~/.smugsync/state.json`: credentials, the
//! cached user, thread defaults) and the per-directory `.smugsync` file
//! holding the sync ignore list.

use crate::api_client::SmugError;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub struct PersistentDict {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl PersistentDict {
    /// Loads the map stored at `path`.
    ///
    /// A missing or unreadable file gives an empty map. A file that is not a
    /// JSON object is a configuration error naming the file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SmugError> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Map::new(),
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(values)) => values,
                _ => return Err(invalid_file(&path)),
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Map::new(),
            Err(e) => {
                tracing::warn!("Cannot read {}: {}", path.display(), e);
                Map::new()
            }
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.values.lock().get(key).cloned()?;
        serde_json::from_value(value).ok()
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }

    pub fn set<T: Serialize>(&self, key: &str, value: T) -> Result<(), SmugError> {
        let value = serde_json::to_value(value)?;
        let mut values = self.values.lock();
        values.insert(key.to_string(), value);
        self.save(&values)
    }

    /// Removes `key`, returning whether it was present.
    pub fn remove(&self, key: &str) -> Result<bool, SmugError> {
        let mut values = self.values.lock();
        if values.remove(key).is_none() {
            return Ok(false);
        }
        self.save(&values)?;
        Ok(true)
    }

    fn save(&self, values: &Map<String, Value>) -> Result<(), SmugError> {
        if values.is_empty() {
            return match fs::remove_file(&self.path) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut text = serde_json::to_string_pretty(values)?;
        text.push('\n');
        fs::write(&self.path, text)?;
        Ok(())
    }
}

fn invalid_file(path: &Path) -> SmugError {
    SmugError::Config(format!(
        "Config file ({}) is invalid. Please fix or delete the file.",
        path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let dict = PersistentDict::open(dir.path().join("state.json")).unwrap();
        assert!(!dict.contains("anything"));
        assert_eq!(dict.get::<String>("anything"), None);
    }

    #[test]
    fn test_changes_are_saved_immediately() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let dict = PersistentDict::open(&path).unwrap();
        dict.set("file_threads", 8).unwrap();
        dict.set("ignore", vec!["b.jpg", "a.jpg"]).unwrap();

        let reloaded = PersistentDict::open(&path).unwrap();
        assert_eq!(reloaded.get::<u64>("file_threads"), Some(8));
        assert_eq!(
            reloaded.get::<Vec<String>>("ignore"),
            Some(vec!["b.jpg".to_string(), "a.jpg".to_string()])
        );

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.find("file_threads").unwrap() < text.find("ignore").unwrap());
    }

    #[test]
    fn test_emptied_dict_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".smugsync");
        let dict = PersistentDict::open(&path).unwrap();
        dict.set("ignore", vec!["x"]).unwrap();
        assert!(path.exists());

        assert!(dict.remove("ignore").unwrap());
        assert!(!path.exists());
        assert!(!dict.remove("ignore").unwrap());
    }

    #[test]
    fn test_invalid_file_is_reported_with_its_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let err = PersistentDict::open(&path).err().unwrap();
        assert_eq!(
            err.to_string(),
            format!(
                "Config file ({}) is invalid. Please fix or delete the file.",
                path.display()
            )
        );
    }
}
