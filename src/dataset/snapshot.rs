use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{
    config::DataConfig,
    db::schema,
    models::{
        AttributeList, Context, ContextTemplateSchema, ExternalRecord, Profile, ProfileKind,
        Rating, RatingRange, RatingTriple, RatingVector,
    },
    services::provider::Provider,
};

/// Fully in-memory dataset
///
/// Ratings are indexed twice, by user and by item. Both indexes are only ever written
/// together, so they hold the same (user, item) pairs with equal ratings.
#[derive(Debug, Clone)]
pub struct Snapshot {
    config: DataConfig,
    range: RatingRange,
    config_entries: Vec<(String, String)>,
    user_ratings: BTreeMap<i64, RatingVector>,
    item_ratings: BTreeMap<i64, RatingVector>,
    user_attributes: Arc<AttributeList>,
    item_attributes: Arc<AttributeList>,
    user_profiles: BTreeMap<i64, Profile>,
    item_profiles: BTreeMap<i64, Profile>,
    user_externals: BTreeMap<i64, ExternalRecord>,
    item_externals: BTreeMap<i64, ExternalRecord>,
    context_templates: ContextTemplateSchema,
    context_profiles: BTreeMap<i64, Vec<Profile>>,
    sample_profiles: Vec<Profile>,
}

impl Snapshot {
    pub fn new(config: DataConfig, range: RatingRange) -> Self {
        Self {
            config,
            range,
            config_entries: Vec::new(),
            user_ratings: BTreeMap::new(),
            item_ratings: BTreeMap::new(),
            user_attributes: schema::user_attributes(),
            item_attributes: schema::item_attributes(),
            user_profiles: BTreeMap::new(),
            item_profiles: BTreeMap::new(),
            user_externals: BTreeMap::new(),
            item_externals: BTreeMap::new(),
            context_templates: ContextTemplateSchema::new(),
            context_profiles: BTreeMap::new(),
            sample_profiles: Vec::new(),
        }
    }

    /// Snapshot over bare rating triples, with no backing store
    pub fn from_triples(config: DataConfig, range: RatingRange, triples: Vec<RatingTriple>) -> Self {
        let mut snapshot = Snapshot::new(config, range);
        for triple in triples {
            snapshot.put_rating(triple.user_id, triple.item_id, triple.rating);
        }
        snapshot
    }

    /// Reads every unit of the provider into memory
    pub async fn load(provider: &Provider) -> Self {
        let mut snapshot = Snapshot::new(provider.config().clone(), provider.rating_range().await);
        snapshot.config_entries = provider.get_config_entries().await;

        for kind in [ProfileKind::User, ProfileKind::Item] {
            if let Some(attributes) = provider.get_profile_attributes(kind).await {
                *snapshot.attributes_mut(kind) = Arc::new(attributes);
            }
            for profile in provider.get_profiles_of(kind).await {
                if let Some(id) = profile.id() {
                    snapshot.profiles_mut(kind).insert(id, profile);
                }
            }
            *snapshot.externals_mut(kind) = provider.get_external_records(kind).await;
        }

        for triple in provider.get_ratings().await {
            snapshot.put_rating(triple.user_id, triple.item_id, triple.rating);
        }
        snapshot.context_templates = provider.get_context_template_schema().await;
        snapshot.context_profiles = provider.get_context_profiles().await;
        snapshot.sample_profiles = provider.get_sample_profiles().await;

        tracing::info!(
            store = %provider.config().store_uri,
            users = snapshot.user_ratings.len(),
            items = snapshot.item_ratings.len(),
            "Snapshot loaded"
        );
        snapshot
    }

    fn ratings(&self, kind: ProfileKind) -> &BTreeMap<i64, RatingVector> {
        match kind {
            ProfileKind::User => &self.user_ratings,
            ProfileKind::Item => &self.item_ratings,
        }
    }

    fn attributes_mut(&mut self, kind: ProfileKind) -> &mut Arc<AttributeList> {
        match kind {
            ProfileKind::User => &mut self.user_attributes,
            ProfileKind::Item => &mut self.item_attributes,
        }
    }

    fn profiles_ref(&self, kind: ProfileKind) -> &BTreeMap<i64, Profile> {
        match kind {
            ProfileKind::User => &self.user_profiles,
            ProfileKind::Item => &self.item_profiles,
        }
    }

    fn profiles_mut(&mut self, kind: ProfileKind) -> &mut BTreeMap<i64, Profile> {
        match kind {
            ProfileKind::User => &mut self.user_profiles,
            ProfileKind::Item => &mut self.item_profiles,
        }
    }

    fn externals_ref(&self, kind: ProfileKind) -> &BTreeMap<i64, ExternalRecord> {
        match kind {
            ProfileKind::User => &self.user_externals,
            ProfileKind::Item => &self.item_externals,
        }
    }

    fn externals_mut(&mut self, kind: ProfileKind) -> &mut BTreeMap<i64, ExternalRecord> {
        match kind {
            ProfileKind::User => &mut self.user_externals,
            ProfileKind::Item => &mut self.item_externals,
        }
    }

    pub fn config(&self) -> &DataConfig {
        &self.config
    }

    pub fn rating_range(&self) -> RatingRange {
        self.range
    }

    pub fn config_entries(&self) -> &[(String, String)] {
        &self.config_entries
    }

    /// Ids that have ratings or a profile, sorted
    pub fn ids(&self, kind: ProfileKind) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .ratings(kind)
            .keys()
            .chain(self.profiles_ref(kind).keys())
            .copied()
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn rating(&self, user: i64, item: i64) -> Option<&Rating> {
        self.user_ratings.get(&user).and_then(|v| v.get(item))
    }

    pub fn rating_vector(&self, kind: ProfileKind, id: i64) -> Option<&RatingVector> {
        self.ratings(kind).get(&id)
    }

    pub fn rating_vectors(&self, kind: ProfileKind) -> impl Iterator<Item = &RatingVector> {
        self.ratings(kind).values()
    }

    /// Stores the rating in both indexes
    pub fn put_rating(&mut self, user: i64, item: i64, rating: Rating) {
        self.item_ratings
            .entry(item)
            .or_insert_with(|| RatingVector::new(item))
            .put(user, rating.clone());
        self.user_ratings
            .entry(user)
            .or_insert_with(|| RatingVector::new(user))
            .put(item, rating);
    }

    /// Removes the rating from both indexes, dropping vectors left empty
    pub fn remove_rating(&mut self, user: i64, item: i64) -> Option<Rating> {
        let removed = self.user_ratings.get_mut(&user).and_then(|v| v.remove(item));
        if let Some(vector) = self.item_ratings.get_mut(&item) {
            vector.remove(user);
        }
        self.user_ratings.retain(|_, v| !v.is_empty());
        self.item_ratings.retain(|_, v| !v.is_empty());
        removed
    }

    pub fn attributes(&self, kind: ProfileKind) -> &Arc<AttributeList> {
        match kind {
            ProfileKind::User => &self.user_attributes,
            ProfileKind::Item => &self.item_attributes,
        }
    }

    pub fn profile(&self, kind: ProfileKind, id: i64) -> Option<&Profile> {
        self.profiles_ref(kind).get(&id)
    }

    pub fn profiles(&self, kind: ProfileKind) -> impl Iterator<Item = &Profile> {
        self.profiles_ref(kind).values()
    }

    pub fn put_profile(&mut self, kind: ProfileKind, profile: Profile) -> bool {
        match profile.id() {
            Some(id) => {
                self.profiles_mut(kind).insert(id, profile);
                true
            }
            None => false,
        }
    }

    pub fn external_record(&self, kind: ProfileKind, id: i64) -> Option<&ExternalRecord> {
        self.externals_ref(kind).get(&id)
    }

    pub fn external_records(&self, kind: ProfileKind) -> &BTreeMap<i64, ExternalRecord> {
        self.externals_ref(kind)
    }

    pub fn put_external_record(&mut self, kind: ProfileKind, id: i64, external: ExternalRecord) {
        self.externals_mut(kind).insert(id, external);
    }

    pub fn find_id_by_external(&self, kind: ProfileKind, external: &ExternalRecord) -> Option<i64> {
        self.externals_ref(kind)
            .iter()
            .find(|(_, record)| *record == external)
            .map(|(id, _)| *id)
    }

    pub fn context_template_schema(&self) -> &ContextTemplateSchema {
        &self.context_templates
    }

    pub fn set_context_template_schema(
        &mut self,
        templates: ContextTemplateSchema,
        profiles: BTreeMap<i64, Vec<Profile>>,
    ) {
        self.context_templates = templates;
        self.context_profiles = profiles;
    }

    pub fn context_profiles(&self) -> &BTreeMap<i64, Vec<Profile>> {
        &self.context_profiles
    }

    pub fn sample_profiles(&self) -> &[Profile] {
        &self.sample_profiles
    }

    /// New snapshot holding only ratings whose contexts satisfy every selection context.
    /// Profiles and external records are cut down to the surviving ids.
    pub fn select_by_contexts(&self, contexts: &[Context]) -> Snapshot {
        let mut selected = Snapshot {
            user_ratings: BTreeMap::new(),
            item_ratings: BTreeMap::new(),
            user_profiles: BTreeMap::new(),
            item_profiles: BTreeMap::new(),
            user_externals: BTreeMap::new(),
            item_externals: BTreeMap::new(),
            ..self.clone()
        };

        for vector in self.user_ratings.values() {
            for (item, rating) in vector.iter() {
                if self
                    .context_templates
                    .can_infer_all(&rating.contexts, contexts)
                {
                    selected.put_rating(vector.id, item, rating.clone());
                }
            }
        }

        for kind in [ProfileKind::User, ProfileKind::Item] {
            let surviving: Vec<i64> = selected.ratings(kind).keys().copied().collect();
            for id in surviving {
                if let Some(profile) = self.profile(kind, id) {
                    selected.profiles_mut(kind).insert(id, profile.clone());
                }
                if let Some(external) = self.external_record(kind, id) {
                    selected.externals_mut(kind).insert(id, external.clone());
                }
            }
        }
        selected
    }

    pub fn clear(&mut self) {
        self.user_ratings.clear();
        self.item_ratings.clear();
        self.user_profiles.clear();
        self.item_profiles.clear();
        self.user_externals.clear();
        self.item_externals.clear();
        self.context_profiles.clear();
        self.sample_profiles.clear();
        self.config_entries.clear();
        self.context_templates = ContextTemplateSchema::new();
    }

    /// Both rating indexes hold exactly the same (user, item, rating) entries
    pub fn is_consistent(&self) -> bool {
        let by_user = || {
            self.user_ratings
                .values()
                .flat_map(|v| v.iter().map(move |(item, r)| (v.id, item, r)))
        };
        let forward = by_user().all(|(user, item, rating)| {
            self.item_ratings
                .get(&item)
                .and_then(|v| v.get(user))
                .is_some_and(|r| r == rating)
        });
        let user_count = by_user().count();
        let item_count: usize = self.item_ratings.values().map(RatingVector::len).sum();
        forward && user_count == item_count
    }
}
