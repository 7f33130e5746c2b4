use std::sync::Arc;

use crate::{
    models::{ProfileKind, Rating, RatingVector},
    services::provider::Provider,
};

/// Dataset view that reads through to the store on every access
#[derive(Clone)]
pub struct Scanner {
    provider: Arc<Provider>,
}

impl Scanner {
    pub fn new(provider: Arc<Provider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<Provider> {
        &self.provider
    }

    pub async fn rating(&self, user: i64, item: i64) -> Option<Rating> {
        self.provider.get_rating(user, item).await
    }

    pub async fn rating_vector(&self, kind: ProfileKind, id: i64) -> Option<RatingVector> {
        self.provider.get_rating_vector(kind, id).await
    }

    /// Every rating vector of one side, one store read per id
    pub async fn rating_vectors(&self, kind: ProfileKind) -> Vec<RatingVector> {
        let mut vectors = Vec::new();
        for id in self.provider.get_ids(kind).await {
            if let Some(vector) = self.provider.get_rating_vector(kind, id).await {
                vectors.push(vector);
            }
        }
        vectors
    }
}
