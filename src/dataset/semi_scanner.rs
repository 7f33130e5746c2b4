use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{
    models::{ProfileKind, Rating, RatingVector},
    services::provider::Provider,
};

#[derive(Default)]
struct RatingCache {
    loaded: bool,
    users: BTreeMap<i64, RatingVector>,
    items: BTreeMap<i64, RatingVector>,
}

/// Dataset that bulk-loads the rating indexes once and reads everything else from the store
///
/// Until the load has happened, or after [`SemiScanner::clear`], rating reads fall back to
/// the store.
pub struct SemiScanner {
    provider: Arc<Provider>,
    cache: RwLock<RatingCache>,
}

impl SemiScanner {
    /// Creates the dataset and loads both rating indexes
    pub async fn load(provider: Arc<Provider>) -> Self {
        let scanner = Self {
            provider,
            cache: RwLock::new(RatingCache::default()),
        };
        scanner.reload().await;
        scanner
    }

    pub fn provider(&self) -> &Arc<Provider> {
        &self.provider
    }

    pub async fn reload(&self) {
        let mut users: BTreeMap<i64, RatingVector> = BTreeMap::new();
        let mut items: BTreeMap<i64, RatingVector> = BTreeMap::new();
        for triple in self.provider.get_ratings().await {
            items
                .entry(triple.item_id)
                .or_insert_with(|| RatingVector::new(triple.item_id))
                .put(triple.user_id, triple.rating.clone());
            users
                .entry(triple.user_id)
                .or_insert_with(|| RatingVector::new(triple.user_id))
                .put(triple.item_id, triple.rating);
        }

        let mut cache = self.cache.write().await;
        tracing::debug!(users = users.len(), items = items.len(), "Rating indexes loaded");
        *cache = RatingCache {
            loaded: true,
            users,
            items,
        };
    }

    pub async fn is_loaded(&self) -> bool {
        self.cache.read().await.loaded
    }

    pub async fn rating(&self, user: i64, item: i64) -> Option<Rating> {
        {
            let cache = self.cache.read().await;
            if cache.loaded {
                return cache.users.get(&user).and_then(|v| v.get(item)).cloned();
            }
        }
        self.provider.get_rating(user, item).await
    }

    pub async fn rating_vector(&self, kind: ProfileKind, id: i64) -> Option<RatingVector> {
        {
            let cache = self.cache.read().await;
            if cache.loaded {
                let index = match kind {
                    ProfileKind::User => &cache.users,
                    ProfileKind::Item => &cache.items,
                };
                return index.get(&id).cloned();
            }
        }
        self.provider.get_rating_vector(kind, id).await
    }

    pub async fn rating_vectors(&self, kind: ProfileKind) -> Vec<RatingVector> {
        {
            let cache = self.cache.read().await;
            if cache.loaded {
                let index = match kind {
                    ProfileKind::User => &cache.users,
                    ProfileKind::Item => &cache.items,
                };
                return index.values().cloned().collect();
            }
        }
        let mut vectors = Vec::new();
        for id in self.provider.get_ids(kind).await {
            if let Some(vector) = self.provider.get_rating_vector(kind, id).await {
                vectors.push(vector);
            }
        }
        vectors
    }

    pub async fn clear(&self) {
        *self.cache.write().await = RatingCache::default();
    }
}
