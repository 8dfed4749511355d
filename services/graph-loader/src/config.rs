//! Run configuration: a JSON payload, with environment overrides.
//!
//! Two payload layouts are accepted:
//!
//! ```json
//! {"NEO4J_CONSTANTS": [{"NEO4J_URI": "...", "NEO4J_USERNAME": "...", "NEO4J_PASSWORD": "..."}],
//!  "FOLDER_PATH": "./data"}
//! ```
//!
//! or the same keys flat at the top level. Any key set in the environment
//! (or `.env`) wins over the file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::orchestrator::DEFAULT_CONCURRENCY;

#[derive(Debug, Default, Deserialize)]
struct Neo4jConstants {
    #[serde(rename = "NEO4J_URI")]
    uri: Option<String>,
    #[serde(rename = "NEO4J_USERNAME")]
    username: Option<String>,
    #[serde(rename = "NEO4J_PASSWORD")]
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(rename = "NEO4J_CONSTANTS", default)]
    neo4j_constants: Vec<Neo4jConstants>,
    #[serde(flatten)]
    flat: Neo4jConstants,
    #[serde(rename = "FOLDER_PATH")]
    folder_path: Option<String>,
    #[serde(rename = "MAX_CONCURRENT_FILES")]
    max_concurrent_files: Option<usize>,
}

/// Connection settings; only required when writing to a live store.
#[derive(Clone)]
pub struct Neo4jSettings {
    pub uri: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Neo4jSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Neo4jSettings")
            .field("uri", &self.uri)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub folder_path: PathBuf,
    pub max_concurrent_files: usize,
    neo4j_uri: Option<String>,
    neo4j_username: Option<String>,
    neo4j_password: Option<String>,
}

impl Config {
    /// Read `path`, applying overrides from the process environment.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content, |key| std::env::var(key).ok())
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse a payload; `env` looks up override values by key.
    pub fn parse(content: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(content).context("Config is not valid JSON")?;
        let nested = file.neo4j_constants.into_iter().next().unwrap_or_default();

        let pick = |key: &str, flat: Option<String>, nested: Option<String>| {
            env(key)
                .filter(|v| !v.trim().is_empty())
                .or(flat)
                .or(nested)
        };

        let folder_path = pick("FOLDER_PATH", file.folder_path, None)
            .context("FOLDER_PATH missing from config")?;

        let max_concurrent_files = match env("MAX_CONCURRENT_FILES") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("MAX_CONCURRENT_FILES is not a number: {:?}", raw))?,
            None => file.max_concurrent_files.unwrap_or(DEFAULT_CONCURRENCY),
        };
        if max_concurrent_files == 0 {
            bail!("MAX_CONCURRENT_FILES must be at least 1");
        }

        Ok(Self {
            folder_path: PathBuf::from(folder_path),
            max_concurrent_files,
            neo4j_uri: pick("NEO4J_URI", file.flat.uri, nested.uri),
            neo4j_username: pick("NEO4J_USERNAME", file.flat.username, nested.username),
            neo4j_password: pick("NEO4J_PASSWORD", file.flat.password, nested.password),
        })
    }

    /// Store credentials, failing with every missing key named.
    pub fn neo4j(&self) -> Result<Neo4jSettings> {
        let missing: Vec<&str> = [
            ("NEO4J_URI", &self.neo4j_uri),
            ("NEO4J_USERNAME", &self.neo4j_username),
            ("NEO4J_PASSWORD", &self.neo4j_password),
        ]
        .iter()
        .filter(|(_, value)| value.is_none())
        .map(|(key, _)| *key)
        .collect();

        match (&self.neo4j_uri, &self.neo4j_username, &self.neo4j_password) {
            (Some(uri), Some(username), Some(password)) => Ok(Neo4jSettings {
                uri: uri.clone(),
                username: username.clone(),
                password: password.clone(),
            }),
            _ => bail!("Config missing required keys: {}", missing.join(", ")),
        }
    }
}
