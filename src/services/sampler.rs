//! Cross-validation splits and sparsification of a stored unit
//!
//! Every operation writes derived units next to the source: `<src>-<ratio>-<fold>.base`
//! and `.test` for splits (folds numbered from 1), `<src>-<ratio>.miss` for sparsification.
//! Destination units are cleared when they already exist.

use std::sync::Arc;

use rand::{seq::index, seq::SliceRandom, Rng};

use crate::{
    db::ProviderAssoc,
    models::{AttributeList, Profile, ProgressEvent, ProgressListener},
    services::provider::Provider,
};

/// Fold of every row: a shuffled round-robin over `folds` folds
pub fn kfold_assignment<R: Rng + ?Sized>(rows: usize, folds: usize, rng: &mut R) -> Vec<usize> {
    let mut order: Vec<usize> = (0..rows).collect();
    order.shuffle(rng);
    let mut assignment = vec![0; rows];
    for (position, row) in order.into_iter().enumerate() {
        assignment[row] = position % folds.max(1);
    }
    assignment
}

/// Test-set membership of `test_size` rows drawn without replacement
pub fn resample_test_rows<R: Rng + ?Sized>(rows: usize, test_size: usize, rng: &mut R) -> Vec<bool> {
    let mut in_test = vec![false; rows];
    for row in index::sample(rng, rows, test_size.min(rows)) {
        in_test[row] = true;
    }
    in_test
}

/// Distinct (row, column) cells drawn without replacement from `rows x columns`
pub fn sparse_cells<R: Rng + ?Sized>(
    rows: usize,
    columns: &[usize],
    amount: usize,
    rng: &mut R,
) -> Vec<(usize, usize)> {
    let cells = rows * columns.len();
    index::sample(rng, cells, amount.min(cells))
        .into_iter()
        .map(|cell| (cell / columns.len(), columns[cell % columns.len()]))
        .collect()
}

fn ratio_is_valid(ratio: f64) -> bool {
    ratio > 0.0 && ratio <= 1.0
}

pub fn training_unit(src: &str, ratio: f64, fold: usize) -> String {
    format!("{}-{}-{}.base", src, ratio, fold)
}

pub fn testing_unit(src: &str, ratio: f64, fold: usize) -> String {
    format!("{}-{}-{}.test", src, ratio, fold)
}

pub fn sparse_unit(src: &str, ratio: f64) -> String {
    format!("{}-{}.miss", src, ratio)
}

pub struct DatasetSampler {
    provider: Arc<Provider>,
    listeners: Vec<Arc<dyn ProgressListener>>,
}

impl DatasetSampler {
    pub fn new(provider: Arc<Provider>) -> Self {
        Self {
            provider,
            listeners: Vec::new(),
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn ProgressListener>) {
        self.listeners.push(listener);
    }

    fn notify(&self, total: usize, step: usize, message: &str) {
        let event = ProgressEvent::new(total, step, message);
        for listener in &self.listeners {
            listener.on_progress(&event);
        }
    }

    async fn read_source(&self, src: &str) -> Option<(AttributeList, Vec<Profile>)> {
        let assoc = self.provider.assoc();
        let Some(attributes) = assoc.get_attributes(src).await else {
            tracing::warn!(unit = %src, "Sampler source unit not found");
            return None;
        };
        Some((attributes, assoc.get_profiles(src, None).await))
    }

    /// Clears `unit` if it exists, creates it otherwise
    async fn prepare_unit(&self, unit: &str, attributes: &AttributeList) -> bool {
        let assoc = self.provider.assoc();
        if assoc.contains_unit(unit).await {
            assoc.delete_unit_data(unit).await
        } else {
            assoc.create_unit(unit, attributes).await
        }
    }

    async fn write_fold(
        &self,
        training: &str,
        testing: &str,
        attributes: &AttributeList,
        rows: &[Profile],
        in_test: impl Fn(usize) -> bool,
    ) -> bool {
        if !self.prepare_unit(training, attributes).await || !self.prepare_unit(testing, attributes).await {
            return false;
        }

        let assoc = self.provider.assoc();
        let mut ok = true;
        for (i, row) in rows.iter().enumerate() {
            let unit = if in_test(i) { testing } else { training };
            ok &= assoc.insert_profile(unit, row).await;
            self.notify(rows.len(), i + 1, unit);
        }
        ok
    }

    /// K-fold partition with k = floor(1 / ratio), capped at the row count: every row lands
    /// in exactly one fold's testing unit and in the training unit of every other fold.
    ///
    /// Returns the created (training, testing) unit pairs; empty when `ratio` is outside
    /// (0, 1] or a unit could not be written.
    pub async fn split_kfold(&self, src: &str, ratio: f64) -> Vec<(String, String)> {
        if !ratio_is_valid(ratio) {
            tracing::warn!(ratio, "Split ratio must be in (0, 1]");
            return Vec::new();
        }
        let Some((attributes, rows)) = self.read_source(src).await else {
            return Vec::new();
        };

        // more folds than rows would only add empty testing units
        let folds = ((1.0 / ratio).floor() as usize).clamp(1, rows.len().max(1));
        let assignment = kfold_assignment(rows.len(), folds, &mut rand::thread_rng());

        let mut created = Vec::with_capacity(folds);
        for fold in 0..folds {
            let training = training_unit(src, ratio, fold + 1);
            let testing = testing_unit(src, ratio, fold + 1);
            if !self
                .write_fold(&training, &testing, &attributes, &rows, |i| assignment[i] == fold)
                .await
            {
                tracing::error!(unit = %src, fold = fold + 1, "Failed to write fold");
                return Vec::new();
            }
            created.push((training, testing));
        }

        tracing::info!(unit = %src, folds, rows = rows.len(), "K-fold split created");
        created
    }

    /// Independent resampling: each of `num_fold` folds draws floor(ratio * N) testing rows
    /// afresh, so testing units of different folds may overlap. `num_fold == 0` falls back to
    /// [`DatasetSampler::split_kfold`].
    pub async fn split_resample(&self, src: &str, ratio: f64, num_fold: usize) -> Vec<(String, String)> {
        if num_fold == 0 {
            return self.split_kfold(src, ratio).await;
        }
        if !ratio_is_valid(ratio) {
            tracing::warn!(ratio, "Split ratio must be in (0, 1]");
            return Vec::new();
        }
        let Some((attributes, rows)) = self.read_source(src).await else {
            return Vec::new();
        };

        let test_size = (ratio * rows.len() as f64).floor() as usize;
        let mut created = Vec::with_capacity(num_fold);
        for fold in 1..=num_fold {
            let in_test = resample_test_rows(rows.len(), test_size, &mut rand::thread_rng());
            let training = training_unit(src, ratio, fold);
            let testing = testing_unit(src, ratio, fold);
            if !self
                .write_fold(&training, &testing, &attributes, &rows, |i| in_test[i])
                .await
            {
                tracing::error!(unit = %src, fold, "Failed to write fold");
                return Vec::new();
            }
            created.push((training, testing));
        }

        tracing::info!(unit = %src, folds = num_fold, test_size, "Resampled split created");
        created
    }

    /// Copies `src` to `<src>-<ratio>.miss` with
    /// min(floor(ratio * N * |columns|), N * |columns|) distinct cells of `columns` made missing.
    pub async fn make_sparse(&self, src: &str, ratio: f64, columns: &[usize]) -> Option<String> {
        if ratio < 0.0 || columns.is_empty() {
            tracing::warn!(ratio, "Sparsification needs a non-negative ratio and at least one column");
            return None;
        }
        let (attributes, mut rows) = self.read_source(src).await?;
        if let Some(column) = columns.iter().find(|c| **c >= attributes.len()) {
            tracing::warn!(unit = %src, column, "Sparsification column out of range");
            return None;
        }

        let total = rows.len() * columns.len();
        let amount = ((ratio * total as f64).floor() as usize).min(total);
        let cells = sparse_cells(rows.len(), columns, amount, &mut rand::thread_rng());
        for (row, column) in cells {
            rows[row].set_missing(column);
        }

        let destination = sparse_unit(src, ratio);
        if !self.prepare_unit(&destination, &attributes).await {
            return None;
        }
        let assoc = self.provider.assoc();
        let mut ok = true;
        for (i, row) in rows.iter().enumerate() {
            ok &= assoc.insert_profile(&destination, row).await;
            self.notify(rows.len(), i + 1, &destination);
        }

        tracing::info!(unit = %src, missing = amount, "Sparse copy created");
        ok.then_some(destination)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn test_kfold_assignment_is_balanced_partition() {
        let mut rng = StdRng::seed_from_u64(7);
        let assignment = kfold_assignment(23, 4, &mut rng);
        assert_eq!(assignment.len(), 23);
        for fold in 0..4 {
            let size = assignment.iter().filter(|f| **f == fold).count();
            assert!(size == 5 || size == 6, "fold {} has {} rows", fold, size);
        }
    }

    #[test]
    fn test_resample_draws_exact_count() {
        let mut rng = StdRng::seed_from_u64(11);
        let in_test = resample_test_rows(40, 13, &mut rng);
        assert_eq!(in_test.iter().filter(|t| **t).count(), 13);
    }

    #[test]
    fn test_sparse_cells_are_distinct_and_in_columns() {
        let mut rng = StdRng::seed_from_u64(3);
        let cells = sparse_cells(10, &[1, 3], 25, &mut rng);
        let distinct: BTreeSet<_> = cells.iter().copied().collect();
        assert_eq!(distinct.len(), 20);
        assert!(cells.iter().all(|(row, column)| *row < 10 && (*column == 1 || *column == 3)));
    }

    #[test]
    fn test_derived_unit_names() {
        assert_eq!(training_unit("hdp_rating", 0.2, 1), "hdp_rating-0.2-1.base");
        assert_eq!(testing_unit("hdp_rating", 0.2, 5), "hdp_rating-0.2-5.test");
        assert_eq!(sparse_unit("hdp_rating", 0.5), "hdp_rating-0.5.miss");
    }
}
