use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::{
    config::DataConfig,
    dataset::{Dataset, Snapshot},
    error::AppResult,
    models::{
        AttributeList, ExternalRecord, InterchangeAttributeMap, Nominal, Profile, ProfileKind,
        Rating, RatingTriple, RatingVector,
    },
    server::transaction::Transaction,
    services::{
        provider::Provider,
        recommender::{AlgDesc, Evaluator, EvaluatorRegistry, RecommendParam, Recommender, RecommenderFactory},
    },
};

/// Recommendation service around one active recommender
///
/// Reads run under the transaction's read lock and writes under its write lock. Writes go
/// to a provider derived from the recommender's dataset; when the dataset has no store
/// behind it every write returns false.
pub struct Service {
    transaction: Transaction,
    recommender: RwLock<Option<Arc<dyn Recommender>>>,
    provider: Mutex<Option<Arc<Provider>>>,
    evaluators: EvaluatorRegistry,
}

impl Service {
    pub fn new(transaction: Transaction) -> Self {
        Self {
            transaction,
            recommender: RwLock::new(None),
            provider: Mutex::new(None),
            evaluators: EvaluatorRegistry::default(),
        }
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Loads the configured dataset, trains a recommender on it and makes it active
    pub async fn open(&self, config: &DataConfig, factory: &dyn RecommenderFactory) -> AppResult<()> {
        let dataset = Arc::new(Dataset::open(config.clone()).await?);
        let recommender = factory.create(dataset).await?;
        tracing::info!(
            recommender = %recommender.desc().name,
            store = %config.store_uri,
            "Service opened"
        );
        self.open_with(recommender).await;
        Ok(())
    }

    /// Makes `recommender` active, releasing the previous one
    pub async fn open_with(&self, recommender: Arc<dyn Recommender>) {
        let previous = {
            let _guard = self.transaction.write().await;
            let recommender = self.recommender.write().await.replace(recommender);
            let provider = self.provider.lock().await.take();
            (recommender, provider)
        };
        Self::release(previous).await;
    }

    async fn release(previous: (Option<Arc<dyn Recommender>>, Option<Arc<Provider>>)) {
        let (recommender, provider) = previous;
        if let Some(recommender) = recommender {
            recommender.unsetup().await;
        }
        if let Some(provider) = provider {
            provider.close().await;
        }
    }

    /// Releases the recommender and provider; calling it again does nothing
    pub async fn close(&self) {
        let previous = {
            let _guard = self.transaction.write().await;
            let recommender = self.recommender.write().await.take();
            let provider = self.provider.lock().await.take();
            (recommender, provider)
        };
        if previous.0.is_some() {
            tracing::info!("Service closed");
        }
        Self::release(previous).await;
    }

    pub async fn is_opened(&self) -> bool {
        self.recommender.read().await.is_some()
    }

    /// Moves this service's recommender into `target`, swapping it in under the target's
    /// write lock. Requests already running on `target` finish against its old recommender.
    pub async fn transfer_to(&self, target: &Service) -> bool {
        let Some(recommender) = self.recommender.write().await.take() else {
            return false;
        };
        let provider = self.provider.lock().await.take();

        let previous = {
            let _guard = target.transaction.write().await;
            let old_recommender = target.recommender.write().await.replace(recommender);
            let old_provider = std::mem::replace(&mut *target.provider.lock().await, provider);
            (old_recommender, old_provider)
        };
        Self::release(previous).await;
        tracing::info!("Recommender transferred to live service");
        true
    }

    async fn active(&self) -> Option<Arc<dyn Recommender>> {
        self.recommender.read().await.clone()
    }

    async fn dataset(&self) -> Option<Arc<Dataset>> {
        self.active().await.and_then(|r| r.dataset())
    }

    /// Provider used for writes, derived from the active dataset on first use
    pub async fn provider(&self) -> Option<Arc<Provider>> {
        let mut slot = self.provider.lock().await;
        if let Some(provider) = slot.as_ref() {
            return Some(provider.clone());
        }

        let dataset = self.dataset().await?;
        let provider = match dataset.provider() {
            Some(provider) => provider,
            None if dataset.config().store_uri.is_empty() => return None,
            None => match Provider::open(dataset.config().clone()).await {
                Ok(provider) => Arc::new(provider),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to open service provider");
                    return None;
                }
            },
        };
        *slot = Some(provider.clone());
        Some(provider)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn desc(&self) -> Option<AlgDesc> {
        let _guard = self.transaction.read().await;
        self.active().await.map(|r| r.desc())
    }

    pub async fn estimate(&self, param: &RecommendParam, item_ids: &[i64]) -> Option<RatingVector> {
        let _guard = self.transaction.read().await;
        self.active().await?.estimate(param, item_ids).await
    }

    pub async fn recommend(&self, param: &RecommendParam, max: usize) -> Option<RatingVector> {
        let _guard = self.transaction.read().await;
        self.active().await?.recommend(param, max).await
    }

    /// Recommends for a stored user. When the dataset-built request yields nothing, retries
    /// once with a request built from the store.
    pub async fn recommend_user(&self, user_id: i64, max: usize) -> Option<RatingVector> {
        let _guard = self.transaction.read().await;
        let recommender = self.active().await?;

        if let Some(dataset) = recommender.dataset() {
            let param = RecommendParam::new(user_id)
                .with_ratings(
                    dataset
                        .user_rating(user_id)
                        .await
                        .unwrap_or_else(|| RatingVector::new(user_id)),
                )
                .with_profile(dataset.user_profile(user_id).await);
            if let Some(result) = recommender.recommend(&param, max).await {
                return Some(result);
            }
        }

        let param = self.provider().await?.get_recommend_param(user_id).await?;
        recommender.recommend(&param, max).await
    }

    pub async fn ids(&self, kind: ProfileKind) -> Vec<i64> {
        let _guard = self.transaction.read().await;
        match self.dataset().await {
            Some(dataset) => dataset.ids(kind).await,
            None => Vec::new(),
        }
    }

    pub async fn rating(&self, user: i64, item: i64) -> Option<Rating> {
        let _guard = self.transaction.read().await;
        self.dataset().await?.rating(user, item).await
    }

    pub async fn rating_vector(&self, kind: ProfileKind, id: i64) -> Option<RatingVector> {
        let _guard = self.transaction.read().await;
        self.dataset().await?.rating_vector(kind, id).await
    }

    pub async fn profile(&self, kind: ProfileKind, id: i64) -> Option<Profile> {
        let _guard = self.transaction.read().await;
        self.dataset().await?.profile(kind, id).await
    }

    pub async fn profiles(&self, kind: ProfileKind) -> Vec<Profile> {
        let _guard = self.transaction.read().await;
        match self.dataset().await {
            Some(dataset) => dataset.profiles(kind).await,
            None => Vec::new(),
        }
    }

    /// Rows of any unit matching `condition`, read from the store
    pub async fn get_profile(&self, unit: &str, condition: &Profile) -> Option<Profile> {
        let _guard = self.transaction.read().await;
        self.provider().await?.get_profile(unit, condition).await
    }

    pub async fn attributes(&self, kind: ProfileKind) -> Option<AttributeList> {
        let _guard = self.transaction.read().await;
        self.dataset().await?.attributes(kind).await
    }

    pub async fn external_record(&self, kind: ProfileKind, id: i64) -> Option<ExternalRecord> {
        let _guard = self.transaction.read().await;
        self.dataset().await?.external_record(kind, id).await
    }

    pub async fn external_records(&self, kind: ProfileKind) -> BTreeMap<i64, ExternalRecord> {
        let _guard = self.transaction.read().await;
        match self.dataset().await {
            Some(dataset) => dataset.external_records(kind).await,
            None => BTreeMap::new(),
        }
    }

    pub async fn find_id_by_external(&self, kind: ProfileKind, external: &ExternalRecord) -> Option<i64> {
        let _guard = self.transaction.read().await;
        self.dataset().await?.find_id_by_external(kind, external).await
    }

    /// In-memory copy of the active dataset
    pub async fn snapshot(&self) -> Option<Snapshot> {
        let _guard = self.transaction.read().await;
        Some(self.dataset().await?.to_snapshot().await)
    }

    pub fn evaluator(&self, name: &str) -> Option<Arc<dyn Evaluator>> {
        self.evaluators.get(name)
    }

    pub fn evaluator_names(&self) -> Vec<String> {
        self.evaluators.names()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    pub async fn update_rating(&self, triple: &RatingTriple) -> bool {
        let _guard = self.transaction.write().await;
        match self.provider().await {
            Some(provider) => provider.update_rating(triple).await,
            None => false,
        }
    }

    pub async fn delete_rating(&self, user: i64, item: i64) -> bool {
        let _guard = self.transaction.write().await;
        match self.provider().await {
            Some(provider) => provider.delete_rating(user, item).await,
            None => false,
        }
    }

    /// Upserts a user-owned (`ProfileKind::User`) or item-owned rating vector
    pub async fn update_rating_vector(&self, kind: ProfileKind, vector: &RatingVector) -> bool {
        let _guard = self.transaction.write().await;
        match self.provider().await {
            Some(provider) => provider.update_rating_vector(kind, vector).await,
            None => false,
        }
    }

    /// Deletes every rating of a user or an item
    pub async fn delete_rating_vector(&self, kind: ProfileKind, id: i64) -> bool {
        let _guard = self.transaction.write().await;
        let Some(provider) = self.provider().await else {
            return false;
        };
        match kind {
            ProfileKind::User => provider.delete_user_rating(id).await,
            ProfileKind::Item => provider.delete_item_rating(id).await,
        }
    }

    pub async fn update_profile(&self, kind: ProfileKind, profile: &Profile) -> bool {
        let _guard = self.transaction.write().await;
        match self.provider().await {
            Some(provider) => provider.update_profile(kind, profile).await,
            None => false,
        }
    }

    pub async fn delete_profile(&self, kind: ProfileKind, id: i64) -> bool {
        let _guard = self.transaction.write().await;
        match self.provider().await {
            Some(provider) => provider.delete_profile(kind, id).await,
            None => false,
        }
    }

    pub async fn insert_nominal(&self, unit: &str, attribute: &str, nominal: &Nominal) -> bool {
        let _guard = self.transaction.write().await;
        match self.provider().await {
            Some(provider) => provider.insert_nominal(unit, attribute, nominal).await,
            None => false,
        }
    }

    pub async fn delete_nominal(&self, unit: &str, attribute: Option<&str>) -> bool {
        let _guard = self.transaction.write().await;
        match self.provider().await {
            Some(provider) => provider.delete_nominal(unit, attribute).await,
            None => false,
        }
    }

    /// Maps a user or item to `external`, replacing any previous mapping
    pub async fn update_external_record(&self, kind: ProfileKind, id: i64, external: ExternalRecord) -> bool {
        let _guard = self.transaction.write().await;
        let Some(provider) = self.provider().await else {
            return false;
        };
        let map = InterchangeAttributeMap::new(provider.internal_record(kind, id), external);
        provider.update_attribute_map(&map).await
    }

    pub async fn delete_external_record(&self, kind: ProfileKind, id: i64) -> bool {
        let _guard = self.transaction.write().await;
        let Some(provider) = self.provider().await else {
            return false;
        };
        provider
            .delete_attribute_map(&provider.internal_record(kind, id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RatingRange;
    use crate::services::recommender::ItemMeanRecommender;

    async fn in_memory_service() -> Service {
        let snapshot = Snapshot::from_triples(
            DataConfig::default().with_store_uri(""),
            RatingRange::new(1.0, 5.0),
            vec![
                RatingTriple::new(1, 1, Rating::new(4.0)),
                RatingTriple::new(2, 2, Rating::new(2.0)),
            ],
        );
        let recommender = ItemMeanRecommender::setup(Arc::new(Dataset::Snapshot(snapshot))).await;
        let service = Service::new(Transaction::new());
        service.open_with(Arc::new(recommender)).await;
        service
    }

    #[tokio::test]
    async fn test_reads_without_store() {
        let service = in_memory_service().await;
        assert!(service.is_opened().await);
        assert_eq!(service.ids(ProfileKind::User).await, vec![1, 2]);
        assert_eq!(service.desc().await.unwrap().name, "item_mean");

        let result = service.recommend_user(1, 5).await.unwrap();
        assert_eq!(result.counterpart_ids(), vec![2]);
        assert_eq!(service.snapshot().await.unwrap().ids(ProfileKind::Item), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_writes_fail_without_store() {
        let service = in_memory_service().await;
        assert!(service.provider().await.is_none());
        assert!(!service.update_rating(&RatingTriple::new(1, 2, Rating::new(3.0))).await);
        assert!(!service.delete_profile(ProfileKind::Item, 1).await);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let service = in_memory_service().await;
        service.close().await;
        service.close().await;
        assert!(!service.is_opened().await);
        assert!(service.estimate(&RecommendParam::new(1), &[1]).await.is_none());
    }

    #[tokio::test]
    async fn test_transfer_moves_recommender() {
        let source = in_memory_service().await;
        let target = Service::new(Transaction::new());
        assert!(source.transfer_to(&target).await);
        assert!(!source.is_opened().await);
        assert!(target.is_opened().await);
        assert!(!source.transfer_to(&target).await);
    }
}
