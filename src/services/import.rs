use std::sync::Arc;

use crate::{
    dataset::Dataset,
    db::{schema, ProviderAssoc},
    models::{InterchangeAttributeMap, ProfileKind, ProgressEvent, ProgressListener, RatingTriple},
    services::provider::Provider,
};

const IMPORT_STEPS: usize = 7;

impl Provider {
    /// Copies `source` into this store in seven steps.
    ///
    /// With `create` the schema is rebuilt from scratch first; otherwise the existing
    /// schema is kept and only the user and item units are rebuilt from the source's
    /// attribute lists. A failing step is logged and the import carries on, so the result
    /// is true only when every step succeeded. `listener` hears about each finished step.
    pub async fn import_data(
        &self,
        source: &Dataset,
        create: bool,
        listener: Option<&dyn ProgressListener>,
    ) -> bool {
        let report = |step: usize, ok: bool, message: &str| {
            if !ok {
                tracing::error!(step, step_name = message, "Import step failed");
            }
            if let Some(listener) = listener {
                listener.on_progress(&ProgressEvent::new(IMPORT_STEPS, step, message));
            }
        };

        let mut result = true;

        let ok = self.import_schema(source, create).await;
        report(1, ok, "Template schema created");
        result &= ok;

        let ok = self.import_config(source).await;
        report(2, ok, "Dataset configured");
        result &= ok;

        let ok = self.import_profiles(source, ProfileKind::User).await;
        report(3, ok, "User profiles inserted");
        result &= ok;

        let ok = self.import_profiles(source, ProfileKind::Item).await;
        report(4, ok, "Item profiles inserted");
        result &= ok;

        let ok = self.import_ratings(source).await;
        report(5, ok, "Ratings inserted");
        result &= ok;

        let ok = self
            .import_context_template_schema(
                &source.context_template_schema().await,
                &source.context_profiles().await,
            )
            .await;
        report(6, ok, "Context template schema imported");
        result &= ok;

        let ok = self.import_samples(source, create).await;
        report(7, ok, "Sample inserted");
        result &= ok;

        tracing::info!(store = %self.assoc().store_uri(), ok = result, "Import finished");
        result
    }

    async fn import_schema(&self, source: &Dataset, create: bool) -> bool {
        let mut ok = if create { self.create_schema().await } else { true };

        for kind in [ProfileKind::User, ProfileKind::Item] {
            let Some(attributes) = source.attributes(kind).await else {
                continue;
            };
            let unit = self.unit_of(kind).to_string();
            if self.assoc().contains_unit(&unit).await {
                ok &= self.assoc().drop_unit(&unit).await;
            }
            ok &= self.assoc().create_unit(&unit, &attributes).await;
            ok &= self.delete_nominal(&unit, None).await;
            ok &= self.delete_attribute_maps_of_unit(&unit).await;
        }
        ok
    }

    async fn import_config(&self, source: &Dataset) -> bool {
        let mut ok = true;
        for (attribute, value) in source.config_entries().await {
            ok &= self.put_config_value(&attribute, &value).await;
        }
        let range = source.rating_range().await;
        ok &= self
            .put_config_value(schema::MIN_RATING, &range.min.to_string())
            .await;
        ok &= self
            .put_config_value(schema::MAX_RATING, &range.max.to_string())
            .await;
        ok
    }

    /// Profiles, their nominal values and their external id mappings
    async fn import_profiles(&self, source: &Dataset, kind: ProfileKind) -> bool {
        let unit = self.unit_of(kind).to_string();
        let Some(target) = self.get_profile_attributes(kind).await else {
            tracing::error!(unit = %unit, "Target unit has no attributes");
            return false;
        };
        let target = Arc::new(target);

        let mut ok = true;
        if let Some(attributes) = source.attributes(kind).await {
            for attribute in attributes.iter() {
                let Some(nominals) = &attribute.nominal else {
                    continue;
                };
                for nominal in &nominals.values {
                    ok &= self.insert_nominal(&unit, &attribute.name, nominal).await;
                }
            }
        }

        for profile in source.profiles(kind).await {
            ok &= self.update_profile(kind, &profile.project(target.clone())).await;
        }

        for (id, external) in source.external_records(kind).await {
            let map = InterchangeAttributeMap::new(self.internal_record(kind, id), external);
            ok &= self.update_attribute_map(&map).await;
        }
        ok
    }

    async fn import_ratings(&self, source: &Dataset) -> bool {
        let mut ok = true;
        for vector in source.user_ratings().await {
            for (item, rating) in vector.iter() {
                ok &= self
                    .update_rating(&RatingTriple::new(vector.id, item, rating.clone()))
                    .await;
            }
        }
        ok
    }

    async fn import_samples(&self, source: &Dataset, create: bool) -> bool {
        let unit = self.units().sample.clone();
        let mut ok = create || self.assoc().delete_unit_data(&unit).await;
        for profile in source.sample_profiles().await {
            ok &= self.insert_sample_profile(&profile).await;
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::DataConfig;
    use crate::dataset::Snapshot;
    use crate::models::{ExternalRecord, Rating, RatingRange};

    #[tokio::test]
    async fn test_import_reports_every_step() {
        let dir = tempfile::tempdir().unwrap();
        let target = Provider::open(
            DataConfig::default().with_store_uri(format!("file:{}", dir.path().display())),
        )
        .await
        .unwrap();

        let mut snapshot = Snapshot::from_triples(
            DataConfig::default(),
            RatingRange::new(0.5, 10.0),
            vec![
                RatingTriple::new(1, 4, Rating::new(7.5)),
                RatingTriple::new(2, 4, Rating::new(3.0)),
            ],
        );
        snapshot.put_external_record(ProfileKind::Item, 4, ExternalRecord::new("shop", "sku", "X4"));
        let source = Dataset::Snapshot(snapshot);

        let events = Mutex::new(Vec::new());
        let listener = |event: &ProgressEvent| events.lock().unwrap().push(event.clone());
        assert!(target.import_data(&source, true, Some(&listener)).await);

        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), IMPORT_STEPS);
        assert_eq!(events[0], ProgressEvent::new(7, 1, "Template schema created"));
        assert_eq!(events[6].message, "Sample inserted");

        assert_eq!(target.rating_range().await, RatingRange::new(0.5, 10.0));
        assert_eq!(target.get_ids(ProfileKind::User).await, vec![1, 2]);
        assert_eq!(target.get_rating(1, 4).await.map(|r| r.value), Some(7.5));
        assert_eq!(
            target
                .find_id(ProfileKind::Item, &ExternalRecord::new("shop", "sku", "X4"))
                .await,
            Some(4)
        );
    }
}
