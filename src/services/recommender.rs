//! Pluggable recommendation algorithms and evaluation metrics
//!
//! Concrete algorithms are external collaborators. This module defines the seam they plug
//! into, a baseline item-mean algorithm used by the binary, and the evaluator registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    dataset::Dataset,
    error::{AppError, AppResult},
    models::{Context, Profile, RatingVector},
};

/// Capability class of an algorithm, resolved once when it is described
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlgKind {
    MemoryBased,
    ModelBased,
    Service,
    Composite,
}

/// Descriptor of an algorithm
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlgDesc {
    pub name: String,
    pub kind: AlgKind,
}

impl AlgDesc {
    pub fn new(name: impl Into<String>, kind: AlgKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Input of a recommendation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendParam {
    pub user_id: i64,
    #[serde(default)]
    pub ratings: RatingVector,
    #[serde(skip)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub contexts: Vec<Context>,
}

impl RecommendParam {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            ratings: RatingVector::new(user_id),
            profile: None,
            contexts: Vec::new(),
        }
    }

    pub fn with_ratings(mut self, ratings: RatingVector) -> Self {
        self.ratings = ratings;
        self
    }

    pub fn with_profile(mut self, profile: Option<Profile>) -> Self {
        self.profile = profile;
        self
    }
}

/// A trained recommendation algorithm
///
/// Implementations own their dataset. Results are rating vectors keyed by item id.
#[async_trait::async_trait]
pub trait Recommender: Send + Sync {
    fn desc(&self) -> AlgDesc;

    /// Dataset the algorithm was set up with
    fn dataset(&self) -> Option<Arc<Dataset>>;

    /// Predicted ratings of `item_ids` for the requesting user
    async fn estimate(&self, param: &RecommendParam, item_ids: &[i64]) -> Option<RatingVector>;

    /// Up to `max` unrated items with the highest predicted rating; `max == 0` means no limit
    async fn recommend(&self, param: &RecommendParam, max: usize) -> Option<RatingVector>;

    /// Releases resources held since setup
    async fn unsetup(&self);
}

/// Builds fresh recommenders, used at start and by the periodic retrain task
#[async_trait::async_trait]
pub trait RecommenderFactory: Send + Sync {
    fn name(&self) -> &str;

    async fn create(&self, dataset: Arc<Dataset>) -> AppResult<Arc<dyn Recommender>>;
}

/// Baseline: predicts the item's mean rating, falling back to the user's mean
pub struct ItemMeanRecommender {
    dataset: Arc<Dataset>,
    item_means: BTreeMap<i64, f64>,
    global_mean: Option<f64>,
}

impl ItemMeanRecommender {
    pub const NAME: &'static str = "item_mean";

    pub async fn setup(dataset: Arc<Dataset>) -> Self {
        let mut item_means = BTreeMap::new();
        let mut total = 0.0;
        let mut count = 0usize;
        for vector in dataset.item_ratings().await {
            if let Some(mean) = vector.mean() {
                item_means.insert(vector.id, mean);
                total += mean * vector.len() as f64;
                count += vector.len();
            }
        }
        let global_mean = (count > 0).then(|| total / count as f64);
        tracing::info!(items = item_means.len(), ratings = count, "Item-mean recommender set up");
        Self {
            dataset,
            item_means,
            global_mean,
        }
    }

    fn predict(&self, param: &RecommendParam, item_id: i64) -> Option<f64> {
        self.item_means
            .get(&item_id)
            .copied()
            .or_else(|| param.ratings.mean())
            .or(self.global_mean)
    }
}

#[async_trait::async_trait]
impl Recommender for ItemMeanRecommender {
    fn desc(&self) -> AlgDesc {
        AlgDesc::new(Self::NAME, AlgKind::MemoryBased)
    }

    fn dataset(&self) -> Option<Arc<Dataset>> {
        Some(self.dataset.clone())
    }

    async fn estimate(&self, param: &RecommendParam, item_ids: &[i64]) -> Option<RatingVector> {
        let mut result = RatingVector::new(param.user_id);
        for &item_id in item_ids {
            if let Some(value) = self.predict(param, item_id) {
                result.put(item_id, crate::models::Rating::new(value));
            }
        }
        (!result.is_empty()).then_some(result)
    }

    async fn recommend(&self, param: &RecommendParam, max: usize) -> Option<RatingVector> {
        let mut ranked: Vec<(i64, f64)> = self
            .item_means
            .iter()
            .filter(|(item_id, _)| !param.ratings.contains(**item_id))
            .map(|(item_id, mean)| (*item_id, *mean))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        if max > 0 {
            ranked.truncate(max);
        }

        let mut result = RatingVector::new(param.user_id);
        for (item_id, value) in ranked {
            result.put(item_id, crate::models::Rating::new(value));
        }
        (!result.is_empty()).then_some(result)
    }

    async fn unsetup(&self) {
        tracing::debug!("Item-mean recommender released");
    }
}

pub struct ItemMeanFactory;

#[async_trait::async_trait]
impl RecommenderFactory for ItemMeanFactory {
    fn name(&self) -> &str {
        ItemMeanRecommender::NAME
    }

    async fn create(&self, dataset: Arc<Dataset>) -> AppResult<Arc<dyn Recommender>> {
        Ok(Arc::new(ItemMeanRecommender::setup(dataset).await))
    }
}

/// Factory of the algorithm named by the `RECOMMENDER` setting
pub fn recommender_factory(name: &str) -> AppResult<Arc<dyn RecommenderFactory>> {
    match name.trim() {
        ItemMeanRecommender::NAME => Ok(Arc::new(ItemMeanFactory)),
        other => Err(AppError::InvalidInput(format!("Unknown recommender: {}", other))),
    }
}

/// Accuracy metric computed over a testing dataset
#[async_trait::async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(&self, recommender: &dyn Recommender, testing: &Dataset) -> Option<f64>;
}

/// Collects (predicted, actual) pairs for every rating of `testing`
async fn prediction_errors(recommender: &dyn Recommender, testing: &Dataset) -> Vec<f64> {
    let mut errors = Vec::new();
    for vector in testing.user_ratings().await {
        let param = RecommendParam::new(vector.id);
        let item_ids = vector.counterpart_ids();
        let Some(estimated) = recommender.estimate(&param, &item_ids).await else {
            continue;
        };
        for (item_id, actual) in vector.iter() {
            if let Some(predicted) = estimated.get(item_id) {
                errors.push(predicted.value - actual.value);
            }
        }
    }
    errors
}

/// Mean absolute error
pub struct MaeEvaluator;

#[async_trait::async_trait]
impl Evaluator for MaeEvaluator {
    fn name(&self) -> &str {
        "mae"
    }

    async fn evaluate(&self, recommender: &dyn Recommender, testing: &Dataset) -> Option<f64> {
        let errors = prediction_errors(recommender, testing).await;
        if errors.is_empty() {
            return None;
        }
        Some(errors.iter().map(|e| e.abs()).sum::<f64>() / errors.len() as f64)
    }
}

/// Root mean squared error
pub struct RmseEvaluator;

#[async_trait::async_trait]
impl Evaluator for RmseEvaluator {
    fn name(&self) -> &str {
        "rmse"
    }

    async fn evaluate(&self, recommender: &dyn Recommender, testing: &Dataset) -> Option<f64> {
        let errors = prediction_errors(recommender, testing).await;
        if errors.is_empty() {
            return None;
        }
        Some((errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64).sqrt())
    }
}

/// Evaluators addressable by name
#[derive(Clone)]
pub struct EvaluatorRegistry {
    evaluators: BTreeMap<String, Arc<dyn Evaluator>>,
}

impl Default for EvaluatorRegistry {
    fn default() -> Self {
        let mut registry = Self {
            evaluators: BTreeMap::new(),
        };
        registry.register(Arc::new(MaeEvaluator));
        registry.register(Arc::new(RmseEvaluator));
        registry
    }
}

impl EvaluatorRegistry {
    pub fn register(&mut self, evaluator: Arc<dyn Evaluator>) {
        self.evaluators.insert(evaluator.name().to_string(), evaluator);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Evaluator>> {
        self.evaluators.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.evaluators.keys().cloned().collect()
    }
}
