pub mod batch_script;
pub mod pool;
pub mod scanner;
pub mod semi_scanner;
pub mod snapshot;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{
    config::DataConfig,
    error::{AppError, AppResult},
    models::{
        AttributeList, ContextTemplateSchema, ExternalRecord, Profile, ProfileKind, Rating,
        RatingRange, RatingVector,
    },
    services::provider::Provider,
};

pub use batch_script::BatchScript;
pub use pool::{DatasetPair, DatasetPool, DatasetRef};
pub use scanner::Scanner;
pub use semi_scanner::SemiScanner;
pub use snapshot::Snapshot;

pub const PARSER_SNAPSHOT: &str = "snapshot";
pub const PARSER_FLAT: &str = "flat";
pub const PARSER_SCANNER: &str = "scanner";
pub const PARSER_SEMI_SCANNER: &str = "semi_scanner";

/// Rating data as seen by recommenders, in one of three materializations
pub enum Dataset {
    /// Reads through to the store
    Scanner(Scanner),
    /// Everything in memory
    Snapshot(Snapshot),
    /// Ratings in memory, profiles from the store
    SemiScanner(SemiScanner),
}

impl Dataset {
    /// Opens the store named by `dataset` and materializes it as its parser asks
    pub async fn load(dataset: &DatasetRef, base: &DataConfig) -> AppResult<Dataset> {
        let mut config = base.with_store_uri(dataset.uri.clone());
        config.parser = dataset.parser.clone();
        if let Some(driver) = &dataset.driver {
            config.data_driver = driver.clone();
        }
        Dataset::open(config).await
    }

    /// Materializes the store of `config` according to `config.parser`
    pub async fn open(config: DataConfig) -> AppResult<Dataset> {
        let parser = config.parser.clone();
        let provider = Provider::open(config).await?;
        match parser.as_str() {
            "" | PARSER_SNAPSHOT | PARSER_FLAT => {
                let snapshot = Snapshot::load(&provider).await;
                provider.close().await;
                Ok(Dataset::Snapshot(snapshot))
            }
            PARSER_SCANNER => Ok(Dataset::Scanner(Scanner::new(Arc::new(provider)))),
            PARSER_SEMI_SCANNER => Ok(Dataset::SemiScanner(
                SemiScanner::load(Arc::new(provider)).await,
            )),
            other => {
                provider.close().await;
                Err(AppError::InvalidInput(format!("Unknown dataset parser: {}", other)))
            }
        }
    }

    /// Backing provider; `None` for an in-memory snapshot
    pub fn provider(&self) -> Option<Arc<Provider>> {
        match self {
            Dataset::Scanner(s) => Some(s.provider().clone()),
            Dataset::SemiScanner(s) => Some(s.provider().clone()),
            Dataset::Snapshot(_) => None,
        }
    }

    pub fn config(&self) -> &DataConfig {
        match self {
            Dataset::Scanner(s) => s.provider().config(),
            Dataset::SemiScanner(s) => s.provider().config(),
            Dataset::Snapshot(s) => s.config(),
        }
    }

    pub fn parser(&self) -> &'static str {
        match self {
            Dataset::Scanner(_) => PARSER_SCANNER,
            Dataset::SemiScanner(_) => PARSER_SEMI_SCANNER,
            Dataset::Snapshot(_) => PARSER_SNAPSHOT,
        }
    }

    pub async fn rating_range(&self) -> RatingRange {
        match self {
            Dataset::Scanner(s) => s.provider().rating_range().await,
            Dataset::SemiScanner(s) => s.provider().rating_range().await,
            Dataset::Snapshot(s) => s.rating_range(),
        }
    }

    pub async fn config_entries(&self) -> Vec<(String, String)> {
        match self {
            Dataset::Scanner(s) => s.provider().get_config_entries().await,
            Dataset::SemiScanner(s) => s.provider().get_config_entries().await,
            Dataset::Snapshot(s) => s.config_entries().to_vec(),
        }
    }

    pub async fn ids(&self, kind: ProfileKind) -> Vec<i64> {
        match self {
            Dataset::Scanner(s) => s.provider().get_ids(kind).await,
            Dataset::SemiScanner(s) => s.provider().get_ids(kind).await,
            Dataset::Snapshot(s) => s.ids(kind),
        }
    }

    pub async fn user_ids(&self) -> Vec<i64> {
        self.ids(ProfileKind::User).await
    }

    pub async fn item_ids(&self) -> Vec<i64> {
        self.ids(ProfileKind::Item).await
    }

    pub async fn rating(&self, user: i64, item: i64) -> Option<Rating> {
        match self {
            Dataset::Scanner(s) => s.rating(user, item).await,
            Dataset::SemiScanner(s) => s.rating(user, item).await,
            Dataset::Snapshot(s) => s.rating(user, item).cloned(),
        }
    }

    pub async fn rating_vector(&self, kind: ProfileKind, id: i64) -> Option<RatingVector> {
        match self {
            Dataset::Scanner(s) => s.rating_vector(kind, id).await,
            Dataset::SemiScanner(s) => s.rating_vector(kind, id).await,
            Dataset::Snapshot(s) => s.rating_vector(kind, id).cloned(),
        }
    }

    pub async fn user_rating(&self, user: i64) -> Option<RatingVector> {
        self.rating_vector(ProfileKind::User, user).await
    }

    pub async fn item_rating(&self, item: i64) -> Option<RatingVector> {
        self.rating_vector(ProfileKind::Item, item).await
    }

    pub async fn rating_vectors(&self, kind: ProfileKind) -> Vec<RatingVector> {
        match self {
            Dataset::Scanner(s) => s.rating_vectors(kind).await,
            Dataset::SemiScanner(s) => s.rating_vectors(kind).await,
            Dataset::Snapshot(s) => s.rating_vectors(kind).cloned().collect(),
        }
    }

    pub async fn user_ratings(&self) -> Vec<RatingVector> {
        self.rating_vectors(ProfileKind::User).await
    }

    pub async fn item_ratings(&self) -> Vec<RatingVector> {
        self.rating_vectors(ProfileKind::Item).await
    }

    pub async fn profile(&self, kind: ProfileKind, id: i64) -> Option<Profile> {
        match self {
            Dataset::Scanner(s) => s.provider().get_profile_by_id(kind, id).await,
            Dataset::SemiScanner(s) => s.provider().get_profile_by_id(kind, id).await,
            Dataset::Snapshot(s) => s.profile(kind, id).cloned(),
        }
    }

    pub async fn user_profile(&self, user: i64) -> Option<Profile> {
        self.profile(ProfileKind::User, user).await
    }

    pub async fn item_profile(&self, item: i64) -> Option<Profile> {
        self.profile(ProfileKind::Item, item).await
    }

    pub async fn profiles(&self, kind: ProfileKind) -> Vec<Profile> {
        match self {
            Dataset::Scanner(s) => s.provider().get_profiles_of(kind).await,
            Dataset::SemiScanner(s) => s.provider().get_profiles_of(kind).await,
            Dataset::Snapshot(s) => s.profiles(kind).cloned().collect(),
        }
    }

    pub async fn attributes(&self, kind: ProfileKind) -> Option<AttributeList> {
        match self {
            Dataset::Scanner(s) => s.provider().get_profile_attributes(kind).await,
            Dataset::SemiScanner(s) => s.provider().get_profile_attributes(kind).await,
            Dataset::Snapshot(s) => Some(s.attributes(kind).as_ref().clone()),
        }
    }

    pub async fn external_record(&self, kind: ProfileKind, id: i64) -> Option<ExternalRecord> {
        match self {
            Dataset::Scanner(s) => s.provider().get_external_of(kind, id).await,
            Dataset::SemiScanner(s) => s.provider().get_external_of(kind, id).await,
            Dataset::Snapshot(s) => s.external_record(kind, id).cloned(),
        }
    }

    pub async fn external_records(&self, kind: ProfileKind) -> BTreeMap<i64, ExternalRecord> {
        match self {
            Dataset::Scanner(s) => s.provider().get_external_records(kind).await,
            Dataset::SemiScanner(s) => s.provider().get_external_records(kind).await,
            Dataset::Snapshot(s) => s.external_records(kind).clone(),
        }
    }

    pub async fn find_id_by_external(
        &self,
        kind: ProfileKind,
        external: &ExternalRecord,
    ) -> Option<i64> {
        match self {
            Dataset::Scanner(s) => s.provider().find_id(kind, external).await,
            Dataset::SemiScanner(s) => s.provider().find_id(kind, external).await,
            Dataset::Snapshot(s) => s.find_id_by_external(kind, external),
        }
    }

    pub async fn context_template_schema(&self) -> ContextTemplateSchema {
        match self {
            Dataset::Scanner(s) => s.provider().get_context_template_schema().await,
            Dataset::SemiScanner(s) => s.provider().get_context_template_schema().await,
            Dataset::Snapshot(s) => s.context_template_schema().clone(),
        }
    }

    pub async fn context_profiles(&self) -> BTreeMap<i64, Vec<Profile>> {
        match self {
            Dataset::Scanner(s) => s.provider().get_context_profiles().await,
            Dataset::SemiScanner(s) => s.provider().get_context_profiles().await,
            Dataset::Snapshot(s) => s.context_profiles().clone(),
        }
    }

    pub async fn sample_profiles(&self) -> Vec<Profile> {
        match self {
            Dataset::Scanner(s) => s.provider().get_sample_profiles().await,
            Dataset::SemiScanner(s) => s.provider().get_sample_profiles().await,
            Dataset::Snapshot(s) => s.sample_profiles().to_vec(),
        }
    }

    /// In-memory copy of the whole dataset
    pub async fn to_snapshot(&self) -> Snapshot {
        match self {
            Dataset::Scanner(s) => Snapshot::load(s.provider()).await,
            Dataset::SemiScanner(s) => Snapshot::load(s.provider()).await,
            Dataset::Snapshot(s) => s.clone(),
        }
    }

    /// Drops in-memory state; store-backed data is untouched
    pub async fn clear(&mut self) {
        match self {
            Dataset::Scanner(_) => {}
            Dataset::SemiScanner(s) => s.clear().await,
            Dataset::Snapshot(s) => s.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RatingTriple;

    async fn seeded_store() -> (tempfile::TempDir, DataConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfig::default().with_store_uri(format!("file:{}", dir.path().display()));
        let provider = Provider::open(config.clone()).await.unwrap();
        assert!(provider.create_schema().await);
        for (user, item, value) in [(1, 1, 4.0), (1, 2, 2.0), (2, 2, 5.0)] {
            assert!(
                provider
                    .insert_rating(&RatingTriple::new(user, item, Rating::new(value)))
                    .await
            );
        }
        (dir, config)
    }

    #[tokio::test]
    async fn test_materializations_agree() {
        let (_dir, config) = seeded_store().await;

        for parser in [PARSER_SNAPSHOT, PARSER_SCANNER, PARSER_SEMI_SCANNER] {
            let dataset = Dataset::load(&DatasetRef::new(config.store_uri.clone(), parser), &config)
                .await
                .unwrap();
            assert_eq!(dataset.parser(), parser);
            assert_eq!(dataset.user_ids().await, vec![1, 2], "{}", parser);
            assert_eq!(dataset.rating(2, 2).await.map(|r| r.value), Some(5.0));
            assert_eq!(
                dataset.item_rating(2).await.unwrap().counterpart_ids(),
                vec![1, 2]
            );
            assert_eq!(dataset.user_ratings().await.len(), 2);
            assert_eq!(dataset.rating_range().await, RatingRange::new(1.0, 5.0));
            assert_eq!(dataset.provider().is_some(), parser != PARSER_SNAPSHOT);
        }
    }

    #[tokio::test]
    async fn test_semi_scanner_falls_back_after_clear() {
        let (_dir, config) = seeded_store().await;
        let mut dataset = Dataset::load(
            &DatasetRef::new(config.store_uri.clone(), PARSER_SEMI_SCANNER),
            &config,
        )
        .await
        .unwrap();

        dataset.clear().await;
        let Dataset::SemiScanner(semi) = &dataset else {
            panic!("expected a semi scanner");
        };
        assert!(!semi.is_loaded().await);
        assert_eq!(dataset.rating(1, 2).await.map(|r| r.value), Some(2.0));
    }

    #[tokio::test]
    async fn test_unknown_parser_is_rejected() {
        let (_dir, config) = seeded_store().await;
        let result = Dataset::load(&DatasetRef::new(config.store_uri.clone(), "mystery"), &config).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }
}
