use std::path::Path;

use serde::{Deserialize, Serialize};

/// Server configuration loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// Store location: a directory (`file:` or plain path) or a database URL
    #[serde(default = "default_store_uri")]
    pub store_uri: String,

    #[serde(default)]
    pub store_account: String,

    #[serde(default)]
    pub store_password: String,

    #[serde(default = "default_config_unit")]
    pub config_unit: String,

    #[serde(default = "default_rating_unit")]
    pub rating_unit: String,

    #[serde(default = "default_user_unit")]
    pub user_unit: String,

    #[serde(default = "default_item_unit")]
    pub item_unit: String,

    #[serde(default = "default_nominal_unit")]
    pub nominal_unit: String,

    #[serde(default = "default_account_unit")]
    pub account_unit: String,

    #[serde(default = "default_attribute_map_unit")]
    pub attribute_map_unit: String,

    #[serde(default = "default_context_template_unit")]
    pub context_template_unit: String,

    #[serde(default = "default_context_unit")]
    pub context_unit: String,

    #[serde(default = "default_sample_unit")]
    pub sample_unit: String,

    /// Dataset materialization: snapshot, scanner or semi_scanner
    #[serde(default = "default_parser")]
    pub parser: String,

    #[serde(default)]
    pub data_driver: String,

    #[serde(default = "default_min_rating")]
    pub min_rating: f64,

    #[serde(default = "default_max_rating")]
    pub max_rating: f64,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Period of the background retrain task
    #[serde(default = "default_server_tasks_period_ms")]
    pub server_tasks_period_ms: u64,

    /// Whether the background task retrains and swaps the recommender
    #[serde(default)]
    pub period_learn: bool,

    /// Recommender algorithm name
    #[serde(default = "default_recommender")]
    pub recommender: String,

    /// Where the configuration is persisted on shutdown
    #[serde(default)]
    pub config_path: Option<String>,
}

fn default_store_uri() -> String {
    "file:./store".to_string()
}

fn default_config_unit() -> String {
    "hdp_config".to_string()
}

fn default_rating_unit() -> String {
    "hdp_rating".to_string()
}

fn default_user_unit() -> String {
    "hdp_user".to_string()
}

fn default_item_unit() -> String {
    "hdp_item".to_string()
}

fn default_nominal_unit() -> String {
    "hdp_nominal".to_string()
}

fn default_account_unit() -> String {
    "hdp_account".to_string()
}

fn default_attribute_map_unit() -> String {
    "hdp_attribute_map".to_string()
}

fn default_context_template_unit() -> String {
    "hdp_context_template".to_string()
}

fn default_context_unit() -> String {
    "hdp_context".to_string()
}

fn default_sample_unit() -> String {
    "hdp_sample".to_string()
}

fn default_parser() -> String {
    "snapshot".to_string()
}

fn default_min_rating() -> f64 {
    1.0
}

fn default_max_rating() -> f64 {
    5.0
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    10151
}

fn default_server_tasks_period_ms() -> u64 {
    60_000
}

fn default_recommender() -> String {
    "item_mean".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            store_uri: default_store_uri(),
            store_account: String::new(),
            store_password: String::new(),
            config_unit: default_config_unit(),
            rating_unit: default_rating_unit(),
            user_unit: default_user_unit(),
            item_unit: default_item_unit(),
            nominal_unit: default_nominal_unit(),
            account_unit: default_account_unit(),
            attribute_map_unit: default_attribute_map_unit(),
            context_template_unit: default_context_template_unit(),
            context_unit: default_context_unit(),
            sample_unit: default_sample_unit(),
            parser: default_parser(),
            data_driver: String::new(),
            min_rating: default_min_rating(),
            max_rating: default_max_rating(),
            host: default_host(),
            port: default_port(),
            server_tasks_period_ms: default_server_tasks_period_ms(),
            period_learn: false,
            recommender: default_recommender(),
            config_path: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<ServerConfig>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    /// Load configuration from a dotenv file previously written by [`ServerConfig::save`]
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let pairs = dotenvy::from_path_iter(path.as_ref())?
            .collect::<Result<Vec<(String, String)>, _>>()?;
        envy::from_iter::<_, ServerConfig>(pairs)
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    /// Storage-facing part of the configuration
    pub fn data_config(&self) -> DataConfig {
        DataConfig {
            store_uri: self.store_uri.clone(),
            store_account: self.store_account.clone(),
            store_password: self.store_password.clone(),
            units: UnitNames {
                config: self.config_unit.clone(),
                rating: self.rating_unit.clone(),
                user: self.user_unit.clone(),
                item: self.item_unit.clone(),
                nominal: self.nominal_unit.clone(),
                account: self.account_unit.clone(),
                attribute_map: self.attribute_map_unit.clone(),
                context_template: self.context_template_unit.clone(),
                context: self.context_unit.clone(),
                sample: self.sample_unit.clone(),
            },
            min_rating: self.min_rating,
            max_rating: self.max_rating,
            parser: self.parser.clone(),
            data_driver: self.data_driver.clone(),
        }
    }

    /// Render the configuration as dotenv `KEY=VALUE` lines
    pub fn to_dotenv(&self) -> anyhow::Result<String> {
        let value = serde_json::to_value(self)?;
        let mut lines = Vec::new();
        if let serde_json::Value::Object(map) = value {
            for (key, value) in map {
                let text = match value {
                    serde_json::Value::Null => continue,
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                lines.push(format!("{}={}", key.to_uppercase(), dotenv_quote(&text)));
            }
        }
        Ok(lines.join("\n") + "\n")
    }

    /// Persist the configuration to `config_path`, if one is set
    pub async fn save(&self) -> anyhow::Result<bool> {
        let Some(path) = self.config_path.as_deref() else {
            return Ok(false);
        };
        tokio::fs::write(path, self.to_dotenv()?).await?;
        tracing::info!(path = %path, "Configuration saved");
        Ok(true)
    }
}

/// Double-quoted dotenv value that `dotenvy` reads back verbatim.
///
/// Inside double quotes dotenvy substitutes `$NAME`, so `$` is escaped along with
/// backslashes and quotes.
pub fn dotenv_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' | '"' | '$' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\n' => quoted.push_str("\\n"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Unit names of the fixed unit set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitNames {
    pub config: String,
    pub rating: String,
    pub user: String,
    pub item: String,
    pub nominal: String,
    pub account: String,
    pub attribute_map: String,
    pub context_template: String,
    pub context: String,
    pub sample: String,
}

impl UnitNames {
    /// Creation order used by schema bootstrap
    pub fn in_creation_order(&self) -> [&str; 10] {
        [
            &self.config,
            &self.user,
            &self.item,
            &self.rating,
            &self.nominal,
            &self.account,
            &self.attribute_map,
            &self.context_template,
            &self.context,
            &self.sample,
        ]
    }

    /// Whether `unit` belongs to the fixed unit set
    pub fn contains(&self, unit: &str) -> bool {
        self.in_creation_order().contains(&unit)
    }
}

impl Default for UnitNames {
    fn default() -> Self {
        ServerConfig::default().data_config().units
    }
}

/// Configuration owned by every Provider and Dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    pub store_uri: String,
    pub store_account: String,
    pub store_password: String,
    pub units: UnitNames,
    pub min_rating: f64,
    pub max_rating: f64,
    pub parser: String,
    pub data_driver: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        ServerConfig::default().data_config()
    }
}

impl DataConfig {
    /// Same configuration pointed at another store
    pub fn with_store_uri(&self, store_uri: impl Into<String>) -> Self {
        Self {
            store_uri: store_uri.into(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_use_fixed_unit_names() {
        let config = ServerConfig::default().data_config();
        assert_eq!(config.units.rating, "hdp_rating");
        assert_eq!(config.units.context_template, "hdp_context_template");
        assert_eq!(config.min_rating, 1.0);
        assert_eq!(config.max_rating, 5.0);
        assert!(config.units.contains("hdp_sample"));
        assert!(!config.units.contains("hdp_rating-0.5-1.base"));
    }

    #[test]
    fn test_creation_order_starts_with_config() {
        let units = UnitNames::default();
        let order = units.in_creation_order();
        assert_eq!(order[0], "hdp_config");
        assert_eq!(order[3], "hdp_rating");
        assert_eq!(order[9], "hdp_sample");
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.env");
        let config = ServerConfig {
            store_uri: "sqlite://ratings.db".to_string(),
            port: 9000,
            period_learn: true,
            config_path: Some(path.to_string_lossy().into_owned()),
            ..ServerConfig::default()
        };

        assert!(config.save().await.unwrap());
        let reloaded = ServerConfig::from_path(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_reload_keeps_special_characters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.env");
        let config = ServerConfig {
            store_uri: "postgres://db/ratings?opt=\"a b\"".to_string(),
            store_account: "o'brien".to_string(),
            store_password: "pa$word\\$HOME\"'#x".to_string(),
            config_path: Some(path.to_string_lossy().into_owned()),
            ..ServerConfig::default()
        };

        assert!(config.save().await.unwrap());
        let reloaded = ServerConfig::from_path(&path).unwrap();
        assert_eq!(reloaded.store_password, "pa$word\\$HOME\"'#x");
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_dotenv_quote_escapes_substitution() {
        assert_eq!(dotenv_quote("plain"), "\"plain\"");
        assert_eq!(dotenv_quote("a$b"), "\"a\\$b\"");
        assert_eq!(dotenv_quote("say \"hi\""), "\"say \\\"hi\\\"\"");
    }

    #[tokio::test]
    async fn test_save_without_path_is_noop() {
        let config = ServerConfig::default();
        assert!(!config.save().await.unwrap());
    }
}
