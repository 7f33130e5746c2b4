use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Names a loadable dataset: store location, materialization and optional data driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRef {
    pub uri: String,
    pub parser: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
}

impl DatasetRef {
    pub fn new(uri: impl Into<String>, parser: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            parser: parser.into(),
            driver: None,
        }
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }
}

/// `uri|parser[|driver]`
impl Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.uri, self.parser)?;
        if let Some(driver) = &self.driver {
            write!(f, "|{}", driver)?;
        }
        Ok(())
    }
}

impl FromStr for DatasetRef {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('|').map(str::trim).collect();
        match parts.as_slice() {
            [uri, parser] if !uri.is_empty() && !parser.is_empty() => {
                Ok(DatasetRef::new(*uri, *parser))
            }
            [uri, parser, driver] if !uri.is_empty() && !parser.is_empty() => {
                let dataset = DatasetRef::new(*uri, *parser);
                Ok(if driver.is_empty() {
                    dataset
                } else {
                    dataset.with_driver(*driver)
                })
            }
            _ => Err(AppError::InvalidInput(format!("Malformed dataset reference: {}", s))),
        }
    }
}

/// Training set with its optional testing and whole sets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetPair {
    pub training: DatasetRef,
    pub testing: Option<DatasetRef>,
    pub whole: Option<DatasetRef>,
}

impl DatasetPair {
    pub fn new(training: DatasetRef, testing: Option<DatasetRef>) -> Self {
        Self {
            training,
            testing,
            whole: None,
        }
    }

    pub fn with_whole(mut self, whole: DatasetRef) -> Self {
        self.whole = Some(whole);
        self
    }
}

/// Ordered list of dataset pairs evaluated in batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetPool {
    pairs: Vec<DatasetPair>,
}

impl DatasetPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pair: DatasetPair) {
        self.pairs.push(pair);
    }

    pub fn get(&self, index: usize) -> Option<&DatasetPair> {
        self.pairs.get(index)
    }

    pub fn size(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[DatasetPair] {
        &self.pairs
    }

    /// Whole set recorded for the pair whose training or testing set is `uri`
    pub fn find_whole_set(&self, uri: &str) -> Option<&DatasetRef> {
        self.pairs
            .iter()
            .find(|pair| {
                pair.training.uri == uri
                    || pair.testing.as_ref().is_some_and(|t| t.uri == uri)
            })
            .and_then(|pair| pair.whole.as_ref())
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_ref_text_form() {
        let dataset: DatasetRef = "postgres://db/ratings | scanner | pg".parse().unwrap();
        assert_eq!(dataset.uri, "postgres://db/ratings");
        assert_eq!(dataset.driver.as_deref(), Some("pg"));
        assert_eq!(dataset.to_string(), "postgres://db/ratings|scanner|pg");

        assert!("file:/a.base".parse::<DatasetRef>().is_err());
        assert!("|flat".parse::<DatasetRef>().is_err());
    }

    #[test]
    fn test_find_whole_set() {
        let mut pool = DatasetPool::new();
        pool.add(
            DatasetPair::new(
                DatasetRef::new("file:/a.base", "flat"),
                Some(DatasetRef::new("file:/a.test", "flat")),
            )
            .with_whole(DatasetRef::new("file:/a", "flat")),
        );
        pool.add(DatasetPair::new(DatasetRef::new("file:/b.base", "flat"), None));

        assert_eq!(pool.find_whole_set("file:/a.test").map(|d| d.uri.as_str()), Some("file:/a"));
        assert!(pool.find_whole_set("file:/b.base").is_none());
        assert_eq!(pool.size(), 2);

        pool.clear();
        assert!(pool.is_empty());
    }
}
