use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use recserve::{
    config::DataConfig,
    db::{schema, ProviderAssoc},
    models::{Profile, Rating, RatingTriple},
    services::{DatasetSampler, Provider},
};

async fn rated_store(dir: &tempfile::TempDir, rows: i64) -> Arc<Provider> {
    let config = DataConfig::default().with_store_uri(format!("file:{}", dir.path().display()));
    let provider = Provider::open(config).await.unwrap();
    assert!(provider.create_schema().await);
    for i in 0..rows {
        let triple = RatingTriple::new(i % 4 + 1, i + 1, Rating::new((i % 5 + 1) as f64));
        assert!(provider.insert_rating(&triple).await);
    }
    Arc::new(provider)
}

async fn pairs(provider: &Provider, unit: &str) -> BTreeSet<(i64, i64)> {
    provider
        .assoc()
        .get_profiles(unit, None)
        .await
        .iter()
        .filter_map(|row| Some((row.get_i64(schema::USER_ID)?, row.get_i64(schema::ITEM_ID)?)))
        .collect()
}

#[tokio::test]
async fn test_kfold_testing_units_partition_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let provider = rated_store(&dir, 12).await;
    let src = provider.units().rating.clone();
    let sampler = DatasetSampler::new(provider.clone());

    let created = sampler.split_kfold(&src, 0.25).await;
    assert_eq!(created.len(), 4);
    assert_eq!(created[0].0, format!("{}-0.25-1.base", src));

    let source = pairs(&provider, &src).await;
    let mut seen = BTreeSet::new();
    for (training, testing) in &created {
        let train = pairs(&provider, training).await;
        let test = pairs(&provider, testing).await;
        assert_eq!(test.len(), 3);
        assert!(train.is_disjoint(&test));
        assert_eq!(train.union(&test).cloned().collect::<BTreeSet<_>>(), source);
        assert!(seen.is_disjoint(&test));
        seen.extend(test);
    }
    assert_eq!(seen, source);
}

#[tokio::test]
async fn test_resample_draws_fixed_test_size() {
    let dir = tempfile::tempdir().unwrap();
    let provider = rated_store(&dir, 10).await;
    let src = provider.units().rating.clone();
    let sampler = DatasetSampler::new(provider.clone());

    let created = sampler.split_resample(&src, 0.3, 3).await;
    assert_eq!(created.len(), 3);
    for (training, testing) in &created {
        assert_eq!(provider.assoc().count_profiles(testing).await, 3);
        assert_eq!(provider.assoc().count_profiles(training).await, 7);
    }
}

#[tokio::test]
async fn test_resample_folds_place_each_row_once() {
    let dir = tempfile::tempdir().unwrap();
    let provider = rated_store(&dir, 10).await;
    let src = provider.units().rating.clone();
    let sampler = DatasetSampler::new(provider.clone());
    let source = pairs(&provider, &src).await;

    let created = sampler.split_resample(&src, 0.5, 4).await;
    assert_eq!(created.len(), 4);
    for (training, testing) in &created {
        let train_rows = provider.assoc().get_profiles(training, None).await;
        let test_rows = provider.assoc().get_profiles(testing, None).await;
        assert_eq!(train_rows.len() + test_rows.len(), source.len());

        let train = pairs(&provider, training).await;
        let test = pairs(&provider, testing).await;
        assert_eq!(train.len(), train_rows.len());
        assert_eq!(test.len(), test_rows.len());
        assert!(train.is_disjoint(&test));
        assert_eq!(train.union(&test).cloned().collect::<BTreeSet<_>>(), source);
    }
}

#[tokio::test]
async fn test_kfold_caps_folds_at_row_count() {
    let dir = tempfile::tempdir().unwrap();
    let provider = rated_store(&dir, 1).await;
    let src = provider.units().rating.clone();
    let sampler = DatasetSampler::new(provider.clone());

    let created = sampler.split_kfold(&src, f64::MIN_POSITIVE).await;
    assert_eq!(created.len(), 1);
    assert_eq!(provider.assoc().count_profiles(&created[0].1).await, 1);
    assert_eq!(provider.assoc().count_profiles(&created[0].0).await, 0);

    let dir = tempfile::tempdir().unwrap();
    let provider = rated_store(&dir, 5).await;
    let sampler = DatasetSampler::new(provider.clone());
    let created = sampler.split_kfold(&src, 0.01).await;
    assert_eq!(created.len(), 5);
    for (_, testing) in &created {
        assert_eq!(provider.assoc().count_profiles(testing).await, 1);
    }
}

#[tokio::test]
async fn test_split_rejects_bad_ratio() {
    let dir = tempfile::tempdir().unwrap();
    let provider = rated_store(&dir, 4).await;
    let src = provider.units().rating.clone();
    let sampler = DatasetSampler::new(provider);

    assert!(sampler.split_kfold(&src, 0.0).await.is_empty());
    assert!(sampler.split_resample(&src, 1.5, 2).await.is_empty());
    assert!(sampler.split_kfold("no_such_unit", 0.5).await.is_empty());
}

#[tokio::test]
async fn test_make_sparse_blanks_exact_cell_count() {
    let dir = tempfile::tempdir().unwrap();
    let provider = rated_store(&dir, 10).await;
    let src = provider.units().rating.clone();
    let mut sampler = DatasetSampler::new(provider.clone());
    let steps = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = steps.clone();
    sampler.add_listener(Arc::new(move |_: &recserve::models::ProgressEvent| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }));

    let attributes = provider.assoc().get_attributes(&src).await.unwrap();
    let column = attributes.index_of(schema::RATING_VALUE).unwrap();

    let destination = sampler.make_sparse(&src, 0.4, &[column]).await.unwrap();
    assert_eq!(destination, format!("{}-0.4.miss", src));

    let rows = provider.assoc().get_profiles(&destination, None).await;
    assert_eq!(rows.len(), 10);
    assert_eq!(rows.iter().filter(|row| row.is_missing(column)).count(), 4);
    assert_eq!(steps.load(std::sync::atomic::Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_make_sparse_keeps_other_cells() {
    let dir = tempfile::tempdir().unwrap();
    let provider = rated_store(&dir, 10).await;
    let src = provider.units().rating.clone();
    let sampler = DatasetSampler::new(provider.clone());

    let attributes = provider.assoc().get_attributes(&src).await.unwrap();
    let column = attributes.index_of(schema::RATING_VALUE).unwrap();
    let destination = sampler.make_sparse(&src, 0.5, &[column]).await.unwrap();

    let key = |row: &Profile| (row.get_i64(schema::USER_ID), row.get_i64(schema::ITEM_ID));
    let source: BTreeMap<_, Profile> = provider
        .assoc()
        .get_profiles(&src, None)
        .await
        .into_iter()
        .map(|row| (key(&row), row))
        .collect();
    let sparse = provider.assoc().get_profiles(&destination, None).await;
    assert_eq!(sparse.len(), source.len());

    let mut blanked = 0;
    for row in &sparse {
        let original = &source[&key(row)];
        for index in 0..original.len() {
            if index == column && row.is_missing(index) {
                blanked += 1;
            } else {
                assert_eq!(row.get(index), original.get(index), "cell {} changed", index);
            }
        }
    }
    assert_eq!(blanked, 5);
}
