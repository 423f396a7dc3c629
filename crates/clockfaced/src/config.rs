use clockface_core::{AttendancePolicy, DeletePolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One day; longer gaps would lock an employee out of their own shift.
const MAX_GAP_SECS: u64 = 86_400;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bad config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    System,
    Session,
}

/// Optional `CLOCKFACE_CONFIG` TOML file. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    match_threshold: Option<f32>,
    min_gap_secs: Option<u64>,
    delete_policy: Option<DeletePolicy>,
    bus: Option<BusKind>,
    history_limit: Option<usize>,
}

/// Daemon configuration: TOML file, then `CLOCKFACE_*` environment
/// variables, then defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory containing the ArcFace ONNX model.
    pub model_dir: PathBuf,
    /// Cosine distance a probe must stay below to be identified.
    pub match_threshold: f32,
    /// Minimum seconds between two recorded events of one employee.
    pub min_gap_secs: u64,
    pub delete_policy: DeletePolicy,
    pub bus: BusKind,
    /// Rows returned by `History` when the caller passes a limit of 0.
    pub history_limit: usize,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("CLOCKFACE_CONFIG") {
            Ok(path) => Some(read_file(Path::new(&path))?),
            Err(_) => None,
        };
        Self::from_sources(file.as_deref(), |key| std::env::var(key).ok())
    }

    /// Merge an optional TOML document with an environment lookup.
    pub fn from_sources(
        file: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file: FileConfig = match file {
            Some(text) => toml::from_str(text)?,
            None => FileConfig::default(),
        };

        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("clockface");

        let db_path = env("CLOCKFACE_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| data_dir.join("attendance.db"));

        let model_dir = env("CLOCKFACE_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(clockface_core::default_model_dir);

        let match_threshold = parse_env(&env, "CLOCKFACE_MATCH_THRESHOLD")?
            .or(file.match_threshold)
            .unwrap_or(0.40);
        if !(match_threshold > 0.0 && match_threshold <= 2.0) {
            return Err(ConfigError::Invalid {
                key: "match_threshold",
                value: match_threshold.to_string(),
            });
        }

        let delete_policy = match env("CLOCKFACE_DELETE_POLICY") {
            Some(raw) => DeletePolicy::parse(&raw).ok_or(ConfigError::Invalid {
                key: "CLOCKFACE_DELETE_POLICY",
                value: raw,
            })?,
            None => file.delete_policy.unwrap_or_default(),
        };

        let bus = match env("CLOCKFACE_BUS").as_deref() {
            Some("system") => BusKind::System,
            Some("session") => BusKind::Session,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "CLOCKFACE_BUS",
                    value: other.to_string(),
                })
            }
            None => file.bus.unwrap_or(BusKind::System),
        };

        let min_gap_secs = parse_env(&env, "CLOCKFACE_MIN_GAP_SECS")?
            .or(file.min_gap_secs)
            .unwrap_or(30);
        if min_gap_secs > MAX_GAP_SECS {
            return Err(ConfigError::Invalid {
                key: "min_gap_secs",
                value: min_gap_secs.to_string(),
            });
        }

        Ok(Self {
            db_path,
            model_dir,
            match_threshold,
            min_gap_secs,
            delete_policy,
            bus,
            history_limit: parse_env(&env, "CLOCKFACE_HISTORY_LIMIT")?
                .or(file.history_limit)
                .unwrap_or(200),
        })
    }

    pub fn policy(&self) -> AttendancePolicy {
        AttendancePolicy {
            match_threshold: self.match_threshold,
            min_gap: chrono::Duration::seconds(self.min_gap_secs as i64),
            delete_policy: self.delete_policy,
        }
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_env<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(None, env_of(&[("HOME", "/home/ada")])).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/home/ada/.local/share/clockface/attendance.db"));
        assert_eq!(config.match_threshold, 0.40);
        assert_eq!(config.min_gap_secs, 30);
        assert_eq!(config.delete_policy, DeletePolicy::Preserve);
        assert_eq!(config.bus, BusKind::System);
        assert_eq!(config.policy().min_gap, chrono::Duration::seconds(30));
    }

    #[test]
    fn test_file_then_env_precedence() {
        let file = r#"
            match_threshold = 0.35
            min_gap_secs = 60
            delete_policy = "cascade"
            bus = "session"
            db_path = "/var/lib/clockface/file.db"
        "#;
        let config = Config::from_sources(
            Some(file),
            env_of(&[("CLOCKFACE_MIN_GAP_SECS", "45"), ("CLOCKFACE_DB_PATH", "/srv/env.db")]),
        )
        .unwrap();
        assert_eq!(config.match_threshold, 0.35);
        assert_eq!(config.min_gap_secs, 45);
        assert_eq!(config.delete_policy, DeletePolicy::Cascade);
        assert_eq!(config.bus, BusKind::Session);
        assert_eq!(config.db_path, PathBuf::from("/srv/env.db"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_gap = Config::from_sources(None, env_of(&[("CLOCKFACE_MIN_GAP_SECS", "soon")]));
        assert!(matches!(bad_gap, Err(ConfigError::Invalid { key: "CLOCKFACE_MIN_GAP_SECS", .. })));

        let bad_threshold = Config::from_sources(None, env_of(&[("CLOCKFACE_MATCH_THRESHOLD", "0")]));
        assert!(matches!(bad_threshold, Err(ConfigError::Invalid { key: "match_threshold", .. })));

        let bad_long_gap = Config::from_sources(None, env_of(&[("CLOCKFACE_MIN_GAP_SECS", "90000")]));
        assert!(matches!(bad_long_gap, Err(ConfigError::Invalid { key: "min_gap_secs", .. })));

        let bad_policy = Config::from_sources(None, env_of(&[("CLOCKFACE_DELETE_POLICY", "shred")]));
        assert!(bad_policy.is_err());

        assert!(matches!(
            Config::from_sources(Some("gap = 3"), env_of(&[])),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_model_path() {
        let config = Config::from_sources(None, env_of(&[("CLOCKFACE_MODEL_DIR", "/opt/models")])).unwrap();
        assert_eq!(config.arcface_model_path(), "/opt/models/w600k_r50.onnx");
    }
}
