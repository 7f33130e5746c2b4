//! Persisted form of a dataset pool plus the algorithms to evaluate on it
//!
//! The text form is dotenv-style `key="value"` lines with the keys `algorithms`,
//! `trainingsets`, `testingsets` and `wholesets`. Dataset lists are comma separated
//! `uri|parser[|driver]` entries; an absent testing or whole set is written as
//! [`NULL_TOKEN`].

use std::collections::HashMap;
use std::path::Path;

use crate::{
    config::dotenv_quote,
    dataset::pool::{DatasetPair, DatasetPool, DatasetRef},
    error::{AppError, AppResult},
};

pub const ALGORITHMS: &str = "algorithms";
pub const TRAINING_SETS: &str = "trainingsets";
pub const TESTING_SETS: &str = "testingsets";
pub const WHOLE_SETS: &str = "wholesets";

/// Placeholder for a missing dataset in a list
pub const NULL_TOKEN: &str = "nullpointer";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchScript {
    pub algorithms: Vec<String>,
    pub pool: DatasetPool,
}

fn split_list(text: &str) -> Vec<&str> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn optional_ref(text: &str) -> AppResult<Option<DatasetRef>> {
    if text == NULL_TOKEN {
        Ok(None)
    } else {
        text.parse().map(Some)
    }
}

fn render_optional(dataset: Option<&DatasetRef>) -> String {
    dataset.map_or_else(|| NULL_TOKEN.to_string(), DatasetRef::to_string)
}

impl BatchScript {
    pub fn new(algorithms: Vec<String>, pool: DatasetPool) -> Self {
        Self { algorithms, pool }
    }

    /// Algorithm names in first-seen order
    pub fn algorithm_names_no_duplicate(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in &self.algorithms {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Renders the script; requires at least one pair
    pub fn to_text(&self) -> AppResult<String> {
        if self.pool.is_empty() {
            return Err(AppError::InvalidInput("Batch script has no dataset pair".into()));
        }

        let pairs = self.pool.pairs();
        let training: Vec<String> = pairs.iter().map(|p| p.training.to_string()).collect();
        let testing: Vec<String> = pairs.iter().map(|p| render_optional(p.testing.as_ref())).collect();
        let whole: Vec<String> = pairs.iter().map(|p| render_optional(p.whole.as_ref())).collect();

        let lines = [
            (ALGORITHMS, self.algorithms.join(",")),
            (TRAINING_SETS, training.join(",")),
            (TESTING_SETS, testing.join(",")),
            (WHOLE_SETS, whole.join(",")),
        ];
        Ok(lines
            .iter()
            .map(|(key, value)| format!("{}={}\n", key, dotenv_quote(value)))
            .collect())
    }

    /// Parses a script. `Ok(None)` means the script is well formed but names no dataset.
    pub fn parse(text: &str) -> AppResult<Option<BatchScript>> {
        let entries: HashMap<String, String> = dotenvy::from_read_iter(text.as_bytes())
            .collect::<Result<_, _>>()
            .map_err(|e| AppError::InvalidInput(format!("Malformed batch script: {}", e)))?;

        let field = |key: &str| {
            entries
                .get(key)
                .map(String::as_str)
                .ok_or_else(|| AppError::InvalidInput(format!("Batch script is missing {}", key)))
        };
        let algorithms = split_list(field(ALGORITHMS)?)
            .into_iter()
            .map(str::to_string)
            .collect();
        let training = split_list(field(TRAINING_SETS)?);
        let testing = split_list(field(TESTING_SETS)?);
        let whole = entries.get(WHOLE_SETS).map(|w| split_list(w)).unwrap_or_default();

        if training.len() != testing.len() || (!whole.is_empty() && whole.len() != training.len()) {
            return Err(AppError::InvalidInput(format!(
                "Batch script set counts differ: {} training, {} testing, {} whole",
                training.len(),
                testing.len(),
                whole.len()
            )));
        }

        let mut pool = DatasetPool::new();
        for (i, training) in training.iter().enumerate() {
            let mut pair = DatasetPair::new(training.parse()?, optional_ref(testing[i])?);
            if let Some(whole) = whole.get(i) {
                pair.whole = optional_ref(whole)?;
            }
            pool.add(pair);
        }

        if pool.is_empty() {
            return Ok(None);
        }
        Ok(Some(BatchScript::new(algorithms, pool)))
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> AppResult<()> {
        tokio::fs::write(path.as_ref(), self.to_text()?).await?;
        tracing::info!(path = %path.as_ref().display(), pairs = self.pool.size(), "Batch script saved");
        Ok(())
    }

    pub async fn load(path: impl AsRef<Path>) -> AppResult<Option<BatchScript>> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        BatchScript::parse(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_pair() -> BatchScript {
        let mut pool = DatasetPool::new();
        pool.add(DatasetPair::new(
            DatasetRef::new("file:/a.base", "flat"),
            Some(DatasetRef::new("file:/a.test", "flat")),
        ));
        BatchScript::new(vec!["item_mean".into(), "item_mean".into()], pool)
    }

    #[test]
    fn test_save_then_parse_keeps_pool() {
        let text = single_pair().to_text().unwrap();
        let parsed = BatchScript::parse(&text).unwrap().unwrap();

        assert_eq!(parsed.pool.size(), 1);
        let pair = parsed.pool.get(0).unwrap();
        assert_eq!(pair.training.uri, "file:/a.base");
        assert_eq!(pair.testing.as_ref().unwrap().uri, "file:/a.test");
        assert_eq!(pair.training.parser, "flat");
        assert_eq!(parsed.algorithm_names_no_duplicate(), vec!["item_mean".to_string()]);
    }

    #[test]
    fn test_missing_testing_set_uses_null_token() {
        let mut pool = DatasetPool::new();
        pool.add(DatasetPair::new(DatasetRef::new("file:/b", "snapshot"), None));
        let text = BatchScript::new(vec!["item_mean".into()], pool).to_text().unwrap();
        assert!(text.contains(NULL_TOKEN));

        let parsed = BatchScript::parse(&text).unwrap().unwrap();
        assert!(parsed.pool.get(0).unwrap().testing.is_none());
    }

    #[test]
    fn test_rejects_empty_and_mismatched_scripts() {
        assert!(BatchScript::default().to_text().is_err());

        let mismatched = "algorithms=\"x\"\ntrainingsets=\"file:/a|flat,file:/b|flat\"\ntestingsets=\"file:/t|flat\"\n";
        assert!(BatchScript::parse(mismatched).is_err());

        let missing = "algorithms=\"x\"\ntrainingsets=\"file:/a|flat\"\n";
        assert!(BatchScript::parse(missing).is_err());

        let empty = "algorithms=\"x\"\ntrainingsets=\"\"\ntestingsets=\"\"\n";
        assert!(BatchScript::parse(empty).unwrap().is_none());
    }

    #[test]
    fn test_dollar_in_store_uri_survives_reload() {
        let mut pool = DatasetPool::new();
        pool.add(DatasetPair::new(
            DatasetRef::new("postgres://u:pa$word@db/ratings", "snapshot"),
            Some(DatasetRef::new("postgres://u:$HOME@db/test", "snapshot")),
        ));
        let script = BatchScript::new(vec!["item_mean".into()], pool);

        let parsed = BatchScript::parse(&script.to_text().unwrap()).unwrap().unwrap();
        let pair = parsed.pool.get(0).unwrap();
        assert_eq!(pair.training.uri, "postgres://u:pa$word@db/ratings");
        assert_eq!(pair.testing.as_ref().unwrap().uri, "postgres://u:$HOME@db/test");
        assert_eq!(parsed.pool, script.pool);
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.script");
        single_pair().save(&path).await.unwrap();
        let loaded = BatchScript::load(&path).await.unwrap().unwrap();
        assert_eq!(loaded.pool, single_pair().pool);
    }
}
