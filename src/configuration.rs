use crate::api_client::SmugError;
use crate::foundation::console::Console;
use config::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    /// Children requested per page when listing a node.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_media_extensions")]
    pub media_extensions: Vec<String>,
    /// Compared by modification time instead of checksum.
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
    /// Deepest node chain the server accepts, counting the root.
    #[serde(default = "default_folder_depth_limit")]
    pub folder_depth_limit: usize,
    #[serde(default)]
    pub threads: ThreadSettings,
    #[serde(default)]
    pub api_settings: ApiSettings,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ThreadSettings {
    pub folder: usize,
    pub file: usize,
    pub upload: usize,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ApiSettings {
    pub api_base_url: String,
    pub upload_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            media_extensions: default_media_extensions(),
            video_extensions: default_video_extensions(),
            folder_depth_limit: default_folder_depth_limit(),
            threads: ThreadSettings::default(),
            api_settings: ApiSettings::default(),
        }
    }
}

impl Default for ThreadSettings {
    fn default() -> Self {
        Self {
            folder: 4,
            file: 16,
            upload: 3,
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self::new("https://api.smugmug.com", "https://upload.smugmug.com/")
    }
}

impl ApiSettings {
    pub fn new(api_base_url: &str, upload_url: &str) -> Self {
        Self {
            api_base_url: api_base_url.to_string(),
            upload_url: upload_url.to_string(),
        }
    }
}

fn default_page_size() -> usize {
    1000
}

fn default_media_extensions() -> Vec<String> {
    ["gif", "jpeg", "jpg", "mov", "mp4", "png", "heic"]
        .map(String::from)
        .to_vec()
}

fn default_video_extensions() -> Vec<String> {
    ["mov", "mp4"].map(String::from).to_vec()
}

fn default_folder_depth_limit() -> usize {
    7
}

/// Reads `cfg_file` if it exists, then `SMUGSYNC_*` environment overrides
/// (`SMUGSYNC_THREADS__UPLOAD=5` sets `threads.upload`).
pub fn get_configuration(cfg_file: &Path) -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(
            config::File::new(&cfg_file.to_string_lossy(), config::FileFormat::Yaml)
                .required(false),
        )
        .add_source(
            config::Environment::with_prefix("SMUGSYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}

/// Loads the settings of `cfg_folder`, reporting a broken file by name.
pub fn load_settings(cfg_folder: &ConfigFolder) -> Result<Settings, SmugError> {
    get_configuration(&cfg_folder.config_file).map_err(|e| {
        tracing::warn!("Failed to load {}: {}", cfg_folder.config_file.display(), e);
        SmugError::Config(format!(
            "Config file ({}) is invalid. Please fix or delete the file.",
            cfg_folder.config_file.display()
        ))
    })
}

pub struct ConfigFolder {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub state_file: PathBuf,
}

impl ConfigFolder {
    /// `~/.smugsync`.
    pub fn new() -> Result<Self, SmugError> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| SmugError::Config("Cannot find the home directory.".to_string()))?;
        Ok(Self::at(home_dir.join(".smugsync")))
    }

    pub fn at(config_dir: PathBuf) -> Self {
        Self {
            config_file: config_dir.join("config.yaml"),
            state_file: config_dir.join("state.json"),
            config_dir,
        }
    }
}

pub fn create_config(cfg_folder: &ConfigFolder, console: &Console) -> Result<(), SmugError> {
    console.println("\x1b[1m\x1b[32mCreating configuration...\x1b[0m");

    if cfg_folder.config_file.exists() && !confirm_overwrite(console) {
        console.println("\x1b[33mOperation cancelled.\x1b[0m");
        return Ok(());
    }

    fs::create_dir_all(&cfg_folder.config_dir)?;
    let config_content = include_str!("config_template.yaml");
    fs::write(&cfg_folder.config_file, config_content)?;

    console.println("\x1b[32mConfiguration file created at:");
    console.println(format!("  -> {}", cfg_folder.config_file.display()));
    console.println("\x1b[0mEdit it to change thread counts, media extensions or API endpoints.");
    Ok(())
}

fn confirm_overwrite(console: &Console) -> bool {
    console.println("\x1b[31mThe configuration file already exists.");
    console.ask("Do you want to overwrite it? Your changes will be lost. (y/N)\x1b[0m ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::console::{MemorySink, MockPrompter};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn console(reply: &'static str) -> (Console, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let mut prompter = MockPrompter::new();
        prompter
            .expect_read_reply()
            .returning(move || Ok(reply.to_string()));
        (Console::new(sink.clone(), Arc::new(prompter)), sink)
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = get_configuration(&dir.path().join("config.yaml")).unwrap();
        assert_eq!(settings.page_size, 1000);
        assert_eq!(settings.folder_depth_limit, 7);
        assert_eq!(settings.threads.file, 16);
        assert!(settings.media_extensions.contains(&"heic".to_string()));
        assert_eq!(settings.api_settings.api_base_url, "https://api.smugmug.com");
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("config.yaml");
        fs::write(
            &file,
            "page_size: 50\nvideo_extensions: [mov]\nthreads:\n  folder: 1\n  file: 2\n  upload: 3\n",
        )
        .unwrap();

        let settings = get_configuration(&file).unwrap();
        assert_eq!(settings.page_size, 50);
        assert_eq!(settings.video_extensions, vec!["mov"]);
        assert_eq!(settings.threads.folder, 1);
        assert_eq!(settings.folder_depth_limit, 7);
    }

    #[test]
    fn test_template_parses() {
        let dir = TempDir::new().unwrap();
        let folder = ConfigFolder::at(dir.path().join(".smugsync"));
        let (console, _) = console("y");
        create_config(&folder, &console).unwrap();

        let settings = load_settings(&folder).unwrap();
        assert_eq!(settings.threads.upload, 3);
        assert_eq!(settings.api_settings.upload_url, "https://upload.smugmug.com/");
    }

    #[test]
    fn test_invalid_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let folder = ConfigFolder::at(dir.path().to_path_buf());
        fs::write(&folder.config_file, "page_size: [not, a, number]\n").unwrap();

        let err = load_settings(&folder).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!(
                "Config file ({}) is invalid. Please fix or delete the file.",
                folder.config_file.display()
            )
        );
    }

    #[test]
    fn test_existing_config_is_kept_when_declined() {
        let dir = TempDir::new().unwrap();
        let folder = ConfigFolder::at(dir.path().to_path_buf());
        fs::write(&folder.config_file, "page_size: 5\n").unwrap();
        let (console, sink) = console("n");

        create_config(&folder, &console).unwrap();

        assert_eq!(fs::read_to_string(&folder.config_file).unwrap(), "page_size: 5\n");
        assert!(sink.contents().contains("Operation cancelled."));
    }
}
