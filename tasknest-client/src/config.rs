use std::path::PathBuf;

use chrono::NaiveDate;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use tasknest_shared::domain::Difficulty;

use crate::AppError;

pub const ENV_CONFIG: &str = "TASKNEST_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server_url: String,
    pub household_id: String,
    pub member_id: String,
    pub device_id: String,
    /// Optional override for the local task cache location.
    #[serde(default)]
    pub task_cache: Option<PathBuf>,
}

impl ClientConfig {
    pub fn find_and_load(cli_value: Option<PathBuf>) -> Result<(PathBuf, Self), AppError> {
        let path = resolve_config_path(cli_value)?;
        let cfg = load_config(&path)?;
        Ok((path, cfg))
    }

    pub fn task_cache_path(&self) -> Result<PathBuf, AppError> {
        if let Some(p) = &self.task_cache {
            return Ok(p.clone());
        }
        default_task_cache_path()
            .ok_or_else(|| AppError::Config("could not determine data dir".into()))
    }
}

pub fn resolve_config_path(cli_value: Option<PathBuf>) -> Result<PathBuf, AppError> {
    if let Some(p) = cli_value {
        return Ok(p);
    }
    if let Ok(p) = std::env::var(ENV_CONFIG) {
        return Ok(PathBuf::from(p));
    }
    default_config_path().ok_or_else(|| AppError::Config("could not determine config dir".into()))
}

pub fn default_config_path() -> Option<PathBuf> {
    let pd = ProjectDirs::from("dev", "tasknest", "tasknest")?;
    Some(pd.config_dir().join("client.yaml"))
}

pub fn default_task_cache_path() -> Option<PathBuf> {
    let pd = ProjectDirs::from("dev", "tasknest", "tasknest")?;
    Some(pd.data_dir().join("tasks.yaml"))
}

pub fn load_config(path: &PathBuf) -> Result<ClientConfig, AppError> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("read {} failed: {e}", path.display())))?;
    let cfg: ClientConfig = serde_yaml::from_str(&data)
        .map_err(|e| AppError::Config(format!("parse {} failed: {e}", path.display())))?;
    Ok(cfg)
}

pub fn save_config(path: &PathBuf, cfg: &ClientConfig) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let data = serde_yaml::to_string(cfg)
        .map_err(|e| AppError::Config(format!("serialize config failed: {e}")))?;
    std::fs::write(path, data)
        .map_err(|e| AppError::Config(format!("write {} failed: {e}", path.display())))
}

pub fn normalize_server_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", trimmed.trim_end_matches('/'))
    }
}

/// One task mirrored from the server into the local cache; the scheduling
/// client reads only this file, never the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub details: String,
    pub due_date: NaiveDate,
    #[serde(default = "default_difficulty")]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub completed: bool,
}

fn default_difficulty() -> Difficulty {
    Difficulty::Easy
}

pub fn load_task_cache(path: &PathBuf) -> Result<Vec<CachedTask>, AppError> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("read {} failed: {e}", path.display())))?;
    let tasks: Vec<CachedTask> = serde_yaml::from_str(&data)
        .map_err(|e| AppError::Config(format!("parse {} failed: {e}", path.display())))?;
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_url_normalization() {
        assert_eq!(
            normalize_server_url("example.com:5151/"),
            "http://example.com:5151"
        );
        assert_eq!(
            normalize_server_url("https://nest.example/ "),
            "https://nest.example"
        );
    }

    #[test]
    fn task_cache_parses_with_defaults() {
        let yaml = r#"
- id: a3f9b2c1
  title: Clean the garage
  due_date: 2026-08-15
  difficulty: hard
- id: b4c5d6e7
  title: Water plants
  due_date: 2026-08-10
"#;
        let tasks: Vec<CachedTask> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].difficulty, Difficulty::Hard);
        assert_eq!(tasks[1].difficulty, Difficulty::Easy);
        assert!(!tasks[1].completed);
        assert!(tasks[1].details.is_empty());
    }
}
