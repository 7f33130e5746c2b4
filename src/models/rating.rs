use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::Context;

/// A single rating value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rating {
    pub value: f64,
    #[serde(default)]
    pub rated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub contexts: Vec<Context>,
}

impl Rating {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            rated_at: None,
            contexts: Vec::new(),
        }
    }

    pub fn rated_at(mut self, at: DateTime<Utc>) -> Self {
        self.rated_at = Some(at);
        self
    }

    pub fn with_contexts(mut self, contexts: Vec<Context>) -> Self {
        self.contexts = contexts;
        self
    }
}

/// Sparse map from counterpart id to rating, owned by one user or one item
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RatingVector {
    pub id: i64,
    ratings: BTreeMap<i64, Rating>,
}

impl RatingVector {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ratings: BTreeMap::new(),
        }
    }

    pub fn put(&mut self, counterpart: i64, rating: Rating) {
        self.ratings.insert(counterpart, rating);
    }

    pub fn get(&self, counterpart: i64) -> Option<&Rating> {
        self.ratings.get(&counterpart)
    }

    pub fn remove(&mut self, counterpart: i64) -> Option<Rating> {
        self.ratings.remove(&counterpart)
    }

    pub fn contains(&self, counterpart: i64) -> bool {
        self.ratings.contains_key(&counterpart)
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &Rating)> {
        self.ratings.iter().map(|(id, r)| (*id, r))
    }

    pub fn counterpart_ids(&self) -> Vec<i64> {
        self.ratings.keys().copied().collect()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.ratings.is_empty() {
            return None;
        }
        let sum: f64 = self.ratings.values().map(|r| r.value).sum();
        Some(sum / self.ratings.len() as f64)
    }

    /// Keeps only ratings accepted by `keep`
    pub fn retain(&mut self, mut keep: impl FnMut(i64, &Rating) -> bool) {
        self.ratings.retain(|id, r| keep(*id, r));
    }
}

/// (user, item, rating) as stored in the rating unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatingTriple {
    pub user_id: i64,
    pub item_id: i64,
    pub rating: Rating,
}

impl RatingTriple {
    pub fn new(user_id: i64, item_id: i64, rating: Rating) -> Self {
        Self {
            user_id,
            item_id,
            rating,
        }
    }
}

/// Global rating bounds kept as dataset metadata
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RatingRange {
    pub min: f64,
    pub max: f64,
}

impl RatingRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min.min(self.max), self.max.max(self.min))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_vector_basics() {
        let mut vector = RatingVector::new(1);
        assert_eq!(vector.mean(), None);

        vector.put(10, Rating::new(4.0));
        vector.put(11, Rating::new(2.0));
        assert_eq!(vector.len(), 2);
        assert_eq!(vector.mean(), Some(3.0));
        assert_eq!(vector.counterpart_ids(), vec![10, 11]);

        vector.retain(|id, _| id != 10);
        assert!(!vector.contains(10));
        assert!(vector.remove(11).is_some());
        assert!(vector.is_empty());
    }

    #[test]
    fn test_range_clamp() {
        let range = RatingRange::new(1.0, 5.0);
        assert_eq!(range.clamp(7.3), 5.0);
        assert_eq!(range.clamp(-1.0), 1.0);
        assert_eq!(range.clamp(3.5), 3.5);
    }
}
