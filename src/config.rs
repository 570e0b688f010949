//! Application paths and typed settings.
//!
//! Settings are loaded from `config.yml` (user data dir first, then project
//! root), with the Gemini API key overridable through the environment.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub project_root: PathBuf,
    pub user_data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub db_path: PathBuf,
    pub index_db_path: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let project_root = discover_project_root();
        let user_data_dir = discover_user_data_dir(&project_root);
        let log_dir = user_data_dir.join("logs");
        let db_path = user_data_dir.join("lumina_chat.db");
        let index_db_path = user_data_dir.join("lumina_docs.db");

        for dir in [&user_data_dir, &log_dir] {
            let _ = fs::create_dir_all(dir);
        }

        AppPaths {
            project_root,
            user_data_dir,
            log_dir,
            db_path,
            index_db_path,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

fn discover_project_root() -> PathBuf {
    if let Ok(root) = env::var("LUMINA_ROOT") {
        return PathBuf::from(root);
    }

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    if manifest_dir.join("config.yml").exists() {
        return manifest_dir;
    }

    env::current_dir().unwrap_or(manifest_dir)
}

fn discover_user_data_dir(project_root: &Path) -> PathBuf {
    if let Ok(dir) = env::var("LUMINA_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if cfg!(debug_assertions) {
        return project_root.to_path_buf();
    }

    if cfg!(target_os = "windows") {
        let base = env::var("LOCALAPPDATA")
            .unwrap_or_else(|_| env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string()));
        return PathBuf::from(base).join("Lumina");
    }

    if cfg!(target_os = "macos") {
        return home_dir()
            .join("Library")
            .join("Application Support")
            .join("Lumina");
    }

    let xdg = env::var("XDG_DATA_HOME").unwrap_or_else(|_| {
        home_dir()
            .join(".local/share")
            .to_string_lossy()
            .to_string()
    });
    PathBuf::from(xdg).join("lumina")
}

fn home_dir() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Base URL of the generation/embedding API.
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    /// Loaded from config or the LUMINA_GEMINI_API_KEY / GEMINI_API_KEY env vars.
    pub api_key: String,
    pub temperature: f64,
    /// Hard deadline for a single generation call, seconds.
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
            model: "gemini-1.5-flash-latest".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            api_key: String::new(),
            temperature: 0.2,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Maximum documents returned per query.
    pub limit: usize,
    /// Cosine-distance cutoff; vector matches at or above it are discarded.
    pub distance_cutoff: f64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            limit: 5,
            distance_cutoff: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub greeting_message: String,
    pub fallback_message: String,
    /// Idle seconds after which a conversation leaves the working set.
    pub conversation_timeout_secs: u64,
    pub query_cache_max_entries: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            greeting_message: "Hello! I'm the Lumina Assistant. I'm here to help with any \
                               questions about our ERP solutions and services. How can I \
                               assist you today?"
                .to_string(),
            fallback_message: "I'm sorry, I couldn't find specific information about that in \
                               our documentation. Would you like me to connect you with a \
                               human support agent?"
                .to_string(),
            conversation_timeout_secs: 1800,
            query_cache_max_entries: 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub llm: LlmSettings,
    pub retrieval: RetrievalSettings,
    pub chat: ChatSettings,
}

impl Settings {
    /// Load settings from the first `config.yml` found, falling back to
    /// defaults when the file is missing or unreadable.
    pub fn load(paths: &AppPaths) -> Self {
        let mut settings = load_settings_file(&config_path(paths));

        if let Ok(key) = env::var("LUMINA_GEMINI_API_KEY").or_else(|_| env::var("GEMINI_API_KEY"))
        {
            if !key.trim().is_empty() {
                settings.llm.api_key = key;
            }
        }

        settings
    }
}

fn config_path(paths: &AppPaths) -> PathBuf {
    if let Ok(path) = env::var("LUMINA_CONFIG_PATH") {
        return PathBuf::from(path);
    }

    let user_config = paths.user_data_dir.join("config.yml");
    if user_config.exists() {
        return user_config;
    }

    paths.project_root.join("config.yml")
}

fn load_settings_file(path: &Path) -> Settings {
    if !path.exists() {
        return Settings::default();
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Settings>(&contents) {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!("Failed to parse {}: {}; using defaults", path.display(), err);
                Settings::default()
            }
        },
        Err(err) => {
            tracing::warn!("Failed to read {}: {}; using defaults", path.display(), err);
            Settings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_expected_tuning() {
        let settings = Settings::default();
        assert_eq!(settings.retrieval.limit, 5);
        assert!((settings.retrieval.distance_cutoff - 0.8).abs() < f64::EPSILON);
        assert_eq!(settings.chat.conversation_timeout_secs, 1800);
        assert_eq!(settings.server.port, 8000);
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let parsed: Settings =
            serde_yaml::from_str("retrieval:\n  limit: 3\n").expect("valid yaml");
        assert_eq!(parsed.retrieval.limit, 3);
        assert!((parsed.retrieval.distance_cutoff - 0.8).abs() < f64::EPSILON);
        assert_eq!(parsed.llm.model, "gemini-1.5-flash-latest");
    }
}
