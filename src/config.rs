use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::join::{JoinOptions, JoinPredicate};
use crate::session::Role;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub join: JoinConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub chart: ChartConfig,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub boundaries: String, // URL or local path to a GeoJSON FeatureCollection
    pub points: String,     // URL or local path to a CSV with LAT/LON columns
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct JoinConfig {
    #[serde(default)]
    pub predicate: JoinPredicate,
    #[serde(default)]
    pub deduplicate: bool,
}

impl JoinConfig {
    pub fn options(&self) -> JoinOptions {
        JoinOptions {
            predicate: self.predicate,
            deduplicate: self.deduplicate,
        }
    }
}

/// Default value substituted for a boundary attribute the source lacks.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum FieldDefault {
    Integer(u64),
    Text(String),
}

/// Normalization tables applied to every boundary feature at load.
#[derive(Debug, Deserialize, Clone)]
pub struct SchemaConfig {
    /// Source property name (already lowercased) -> canonical name.
    #[serde(default = "default_aliases")]
    pub aliases: BTreeMap<String, String>,
    /// Canonical property name -> value used when the property is absent.
    #[serde(default = "default_field_defaults")]
    pub defaults: BTreeMap<String, FieldDefault>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            aliases: default_aliases(),
            defaults: default_field_defaults(),
        }
    }
}

fn default_aliases() -> BTreeMap<String, String> {
    [
        ("lregion", "region"),
        ("lcercle", "cercle"),
        ("lcommune", "commune"),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect()
}

fn default_field_defaults() -> BTreeMap<String, FieldDefault> {
    let mut defaults = BTreeMap::new();
    for field in ["region", "cercle", "commune", "idse_new"] {
        defaults.insert(field.to_string(), FieldDefault::Text(String::new()));
    }
    for field in ["pop_se", "pop_se_ct"] {
        defaults.insert(field.to_string(), FieldDefault::Integer(0));
    }
    defaults
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChartConfig {
    /// Population field -> label shown in the long-form chart data.
    #[serde(default = "default_labels")]
    pub labels: BTreeMap<String, String>,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            labels: default_labels(),
        }
    }
}

fn default_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("pop_se".to_string(), "declared".to_string()),
        ("pop_se_ct".to_string(), "current".to_string()),
    ])
}

#[derive(Debug, Deserialize, Clone)]
pub struct UserConfig {
    pub name: String,
    pub password: String,
    pub role: Role,
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }
}
