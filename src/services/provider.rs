use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{
    config::{DataConfig, UnitNames},
    db::{schema, Assoc, ProviderAssoc},
    error::AppResult,
    models::{
        Account, AttributeList, Context, ContextTemplate, ContextTemplateSchema, ExternalRecord,
        InterchangeAttributeMap, InternalRecord, Nominal, NominalList, Privileges, Profile,
        ProfileKind, Rating, RatingRange, RatingTriple, RatingVector, UnitList, Value,
    },
    services::recommender::RecommendParam,
};

/// Domain operations over the fixed unit set
///
/// Wraps one storage back-end. Like the back-ends, every operation reports failure as a
/// negative or empty result; the underlying error has already been logged.
pub struct Provider {
    assoc: Assoc,
    config: DataConfig,
}

impl Provider {
    /// Opens the store named by `config.store_uri`
    pub async fn open(config: DataConfig) -> AppResult<Provider> {
        let assoc = Assoc::open(&config).await?;
        Ok(Provider { assoc, config })
    }

    pub fn with_assoc(assoc: Assoc, config: DataConfig) -> Provider {
        Provider { assoc, config }
    }

    pub fn config(&self) -> &DataConfig {
        &self.config
    }

    pub fn assoc(&self) -> &Assoc {
        &self.assoc
    }

    pub fn units(&self) -> &UnitNames {
        &self.config.units
    }

    pub async fn close(&self) {
        self.assoc.close().await;
    }

    /// Unit holding user or item profiles
    pub fn unit_of(&self, kind: ProfileKind) -> &str {
        match kind {
            ProfileKind::User => &self.config.units.user,
            ProfileKind::Item => &self.config.units.item,
        }
    }

    pub fn id_field(kind: ProfileKind) -> &'static str {
        match kind {
            ProfileKind::User => schema::USER_ID,
            ProfileKind::Item => schema::ITEM_ID,
        }
    }

    fn default_attributes(kind: ProfileKind) -> Arc<AttributeList> {
        match kind {
            ProfileKind::User => schema::user_attributes(),
            ProfileKind::Item => schema::item_attributes(),
        }
    }

    fn id_condition(kind: ProfileKind, id: i64) -> Profile {
        let mut condition = Profile::new(Self::default_attributes(kind));
        condition.set_id(id);
        condition
    }

    fn rating_condition(user: Option<i64>, item: Option<i64>) -> Profile {
        let mut condition = Profile::new(schema::rating_attributes());
        condition.set_by_name(schema::USER_ID, user.map(Value::Integer));
        condition.set_by_name(schema::ITEM_ID, item.map(Value::Integer));
        condition
    }

    fn context_condition(user: Option<i64>, item: Option<i64>) -> Profile {
        let mut condition = Profile::new(schema::context_attributes());
        condition.set_by_name(schema::USER_ID, user.map(Value::Integer));
        condition.set_by_name(schema::ITEM_ID, item.map(Value::Integer));
        condition
    }

    fn fixed_units(&self) -> Vec<(&str, Arc<AttributeList>)> {
        let units = &self.config.units;
        vec![
            (units.config.as_str(), schema::config_attributes()),
            (units.user.as_str(), schema::user_attributes()),
            (units.item.as_str(), schema::item_attributes()),
            (units.rating.as_str(), schema::rating_attributes()),
            (units.nominal.as_str(), schema::nominal_attributes()),
            (units.account.as_str(), schema::account_attributes()),
            (units.attribute_map.as_str(), schema::attribute_map_attributes()),
            (units.context_template.as_str(), schema::context_template_attributes()),
            (units.context.as_str(), schema::context_attributes()),
            (units.sample.as_str(), schema::sample_attributes()),
        ]
    }

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------

    pub async fn get_unit_list(&self) -> UnitList {
        self.assoc.get_unit_list().await
    }

    /// Whether the fixed unit set has been created
    pub async fn is_schema_ready(&self) -> bool {
        self.assoc.contains_unit(&self.config.units.rating).await
            && self.assoc.contains_unit(&self.config.units.account).await
    }

    /// Drops any existing schema, creates the fixed unit set in order, then seeds the
    /// rating range and the admin account. True only if every step succeeded.
    pub async fn create_schema(&self) -> bool {
        self.drop_schema().await;

        let mut ok = true;
        for (unit, attributes) in self.fixed_units() {
            let created = self.assoc.create_unit(unit, &attributes).await;
            if !created {
                tracing::error!(unit = %unit, "Failed to create unit");
            }
            ok &= created;
        }

        ok &= self
            .put_config_value(schema::MIN_RATING, &self.config.min_rating.to_string())
            .await;
        ok &= self
            .put_config_value(schema::MAX_RATING, &self.config.max_rating.to_string())
            .await;
        ok &= self
            .insert_account(&Account::new(
                schema::ADMIN_ACCOUNT,
                schema::ADMIN_PASSWORD,
                Privileges::ADMIN,
            ))
            .await;

        tracing::info!(store = %self.assoc.store_uri(), ok, "Schema created");
        ok
    }

    /// Drops the fixed unit set and every per-template context profile unit
    pub async fn drop_schema(&self) -> bool {
        let existing = self.assoc.get_unit_list().await;
        let template_unit = self.config.units.context_template.clone();

        let mut targets: Vec<String> = existing
            .units
            .iter()
            .filter(|u| schema::parse_context_profile_unit(&template_unit, &u.name).is_some())
            .map(|u| u.name.clone())
            .collect();
        targets.extend(
            self.config
                .units
                .in_creation_order()
                .iter()
                .filter(|u| existing.contains(u))
                .map(|u| u.to_string()),
        );

        let mut ok = true;
        for unit in &targets {
            ok &= self.assoc.drop_unit(unit).await;
        }
        tracing::info!(dropped = targets.len(), ok, "Schema dropped");
        ok
    }

    // ------------------------------------------------------------------
    // Config unit
    // ------------------------------------------------------------------

    fn config_row(attribute: &str, value: Option<&str>) -> Profile {
        let mut row = Profile::new(schema::config_attributes());
        row.set_by_name(schema::ATTRIBUTE, Some(attribute.into()));
        row.set_by_name(schema::ATTRIBUTE_VALUE, value.map(Value::from));
        row
    }

    pub async fn get_config_value(&self, attribute: &str) -> Option<String> {
        self.assoc
            .get_profile(&self.config.units.config, &Self::config_row(attribute, None))
            .await
            .and_then(|p| p.get_text(schema::ATTRIBUTE_VALUE))
    }

    /// Updates the entry, inserting it when absent
    pub async fn put_config_value(&self, attribute: &str, value: &str) -> bool {
        let unit = &self.config.units.config;
        let row = Self::config_row(attribute, Some(value));
        if self.assoc.contains_profile(unit, &row).await {
            self.assoc.update_profile(unit, &row).await
        } else {
            self.assoc.insert_profile(unit, &row).await
        }
    }

    pub async fn delete_config_value(&self, attribute: &str) -> bool {
        self.assoc
            .delete_profile(&self.config.units.config, &Self::config_row(attribute, None))
            .await
    }

    pub async fn get_config_entries(&self) -> Vec<(String, String)> {
        self.assoc
            .get_profiles(&self.config.units.config, None)
            .await
            .iter()
            .filter_map(|p| {
                Some((
                    p.get_text(schema::ATTRIBUTE)?,
                    p.get_text(schema::ATTRIBUTE_VALUE).unwrap_or_default(),
                ))
            })
            .collect()
    }

    /// Rating bounds read from the config unit on every call, falling back to the
    /// configured defaults
    pub async fn rating_range(&self) -> RatingRange {
        let min = self
            .get_config_value(schema::MIN_RATING)
            .await
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.config.min_rating);
        let max = self
            .get_config_value(schema::MAX_RATING)
            .await
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.config.max_rating);
        RatingRange::new(min, max)
    }

    // ------------------------------------------------------------------
    // Ratings
    // ------------------------------------------------------------------

    fn rating_from_row(row: &Profile) -> Option<(i64, i64, Rating)> {
        let user = row.get_i64(schema::USER_ID)?;
        let item = row.get_i64(schema::ITEM_ID)?;
        let value = row.get_f64(schema::RATING_VALUE)?;
        let mut rating = Rating::new(value);
        rating.rated_at = row
            .get_by_name(schema::RATING_DATE)
            .and_then(Value::as_date);
        Some((user, item, rating))
    }

    fn context_from_row(row: &Profile) -> Option<(i64, i64, Context)> {
        Some((
            row.get_i64(schema::USER_ID)?,
            row.get_i64(schema::ITEM_ID)?,
            Context::new(
                row.get_i64(schema::CTX_TEMPLATE_ID)?,
                row.get_i64(schema::CTX_VALUE),
            ),
        ))
    }

    /// Contexts attached to the rating of `user` on `item`
    pub async fn get_contexts(&self, user: i64, item: i64) -> Vec<Context> {
        self.assoc
            .get_profiles(
                &self.config.units.context,
                Some(&Self::context_condition(Some(user), Some(item))),
            )
            .await
            .iter()
            .filter_map(Self::context_from_row)
            .map(|(_, _, c)| c)
            .collect()
    }

    async fn contexts_by_pair(&self, condition: Option<&Profile>) -> BTreeMap<(i64, i64), Vec<Context>> {
        let mut grouped: BTreeMap<(i64, i64), Vec<Context>> = BTreeMap::new();
        for row in self.assoc.get_profiles(&self.config.units.context, condition).await {
            if let Some((user, item, context)) = Self::context_from_row(&row) {
                grouped.entry((user, item)).or_default().push(context);
            }
        }
        grouped
    }

    async fn ratings_matching(&self, user: Option<i64>, item: Option<i64>) -> Vec<RatingTriple> {
        let rating_condition = Self::rating_condition(user, item);
        let context_condition = Self::context_condition(user, item);
        let filtered = user.is_some() || item.is_some();
        let rows = self
            .assoc
            .get_profiles(
                &self.config.units.rating,
                filtered.then_some(&rating_condition),
            )
            .await;
        let mut contexts = self
            .contexts_by_pair(filtered.then_some(&context_condition))
            .await;

        rows.iter()
            .filter_map(Self::rating_from_row)
            .map(|(user, item, rating)| {
                let attached = contexts.remove(&(user, item)).unwrap_or_default();
                RatingTriple::new(user, item, rating.with_contexts(attached))
            })
            .collect()
    }

    pub async fn get_rating(&self, user: i64, item: i64) -> Option<Rating> {
        self.ratings_matching(Some(user), Some(item))
            .await
            .into_iter()
            .next()
            .map(|t| t.rating)
    }

    /// Every stored rating with its contexts
    pub async fn get_ratings(&self) -> Vec<RatingTriple> {
        self.ratings_matching(None, None).await
    }

    async fn ensure_profile(&self, kind: ProfileKind, id: i64) -> bool {
        let unit = self.unit_of(kind);
        let condition = Self::id_condition(kind, id);
        if self.assoc.contains_profile(unit, &condition).await {
            return true;
        }
        self.assoc.insert_profile(unit, &condition).await
    }

    async fn insert_contexts(&self, triple: &RatingTriple) -> bool {
        let mut ok = true;
        for context in &triple.rating.contexts {
            let mut row = Profile::new(schema::context_attributes());
            row.set_by_name(schema::USER_ID, Some(Value::Integer(triple.user_id)));
            row.set_by_name(schema::ITEM_ID, Some(Value::Integer(triple.item_id)));
            row.set_by_name(schema::CTX_TEMPLATE_ID, Some(Value::Integer(context.template_id)));
            row.set_by_name(schema::CTX_VALUE, context.value.map(Value::Integer));
            ok &= self.assoc.insert_profile(&self.config.units.context, &row).await;
        }
        ok
    }

    fn rating_row(triple: &RatingTriple) -> Profile {
        let mut row = Self::rating_condition(Some(triple.user_id), Some(triple.item_id));
        row.set_by_name(schema::RATING_VALUE, Some(Value::Real(triple.rating.value)));
        row.set_by_name(schema::RATING_DATE, triple.rating.rated_at.map(Value::Date));
        row
    }

    /// Inserts a rating, creating stub user and item profiles when absent
    pub async fn insert_rating(&self, triple: &RatingTriple) -> bool {
        if !self.ensure_profile(ProfileKind::User, triple.user_id).await
            || !self.ensure_profile(ProfileKind::Item, triple.item_id).await
        {
            return false;
        }
        if !self
            .assoc
            .insert_profile(&self.config.units.rating, &Self::rating_row(triple))
            .await
        {
            return false;
        }
        self.insert_contexts(triple).await
    }

    /// Updates the rating and replaces its contexts wholesale; inserts when absent
    pub async fn update_rating(&self, triple: &RatingTriple) -> bool {
        let row = Self::rating_row(triple);
        if !self
            .assoc
            .contains_profile(&self.config.units.rating, &row)
            .await
        {
            return self.insert_rating(triple).await;
        }
        if !self.assoc.update_profile(&self.config.units.rating, &row).await {
            return false;
        }
        let cleared = self
            .assoc
            .delete_profile(
                &self.config.units.context,
                &Self::context_condition(Some(triple.user_id), Some(triple.item_id)),
            )
            .await;
        cleared && self.insert_contexts(triple).await
    }

    pub async fn delete_rating(&self, user: i64, item: i64) -> bool {
        self.delete_ratings(Some(user), Some(item)).await
    }

    async fn delete_ratings(&self, user: Option<i64>, item: Option<i64>) -> bool {
        let ratings = self
            .assoc
            .delete_profile(&self.config.units.rating, &Self::rating_condition(user, item))
            .await;
        let contexts = self
            .assoc
            .delete_profile(&self.config.units.context, &Self::context_condition(user, item))
            .await;
        ratings && contexts
    }

    pub async fn delete_user_rating(&self, user: i64) -> bool {
        self.delete_ratings(Some(user), None).await
    }

    pub async fn delete_item_rating(&self, item: i64) -> bool {
        self.delete_ratings(None, Some(item)).await
    }

    /// Ratings owned by one user (`ProfileKind::User`) or one item; `None` when empty
    pub async fn get_rating_vector(&self, kind: ProfileKind, id: i64) -> Option<RatingVector> {
        let triples = match kind {
            ProfileKind::User => self.ratings_matching(Some(id), None).await,
            ProfileKind::Item => self.ratings_matching(None, Some(id)).await,
        };
        let mut vector = RatingVector::new(id);
        for triple in triples {
            let counterpart = match kind {
                ProfileKind::User => triple.item_id,
                ProfileKind::Item => triple.user_id,
            };
            vector.put(counterpart, triple.rating);
        }
        (!vector.is_empty()).then_some(vector)
    }

    pub async fn get_user_rating_vector(&self, user: i64) -> Option<RatingVector> {
        self.get_rating_vector(ProfileKind::User, user).await
    }

    pub async fn get_item_rating_vector(&self, item: i64) -> Option<RatingVector> {
        self.get_rating_vector(ProfileKind::Item, item).await
    }

    fn vector_triples(kind: ProfileKind, vector: &RatingVector) -> Vec<RatingTriple> {
        vector
            .iter()
            .map(|(counterpart, rating)| match kind {
                ProfileKind::User => RatingTriple::new(vector.id, counterpart, rating.clone()),
                ProfileKind::Item => RatingTriple::new(counterpart, vector.id, rating.clone()),
            })
            .collect()
    }

    pub async fn insert_rating_vector(&self, kind: ProfileKind, vector: &RatingVector) -> bool {
        let mut ok = true;
        for triple in Self::vector_triples(kind, vector) {
            ok &= self.insert_rating(&triple).await;
        }
        ok
    }

    /// Upserts every rating of a user- or item-owned vector
    pub async fn update_rating_vector(&self, kind: ProfileKind, vector: &RatingVector) -> bool {
        let mut ok = true;
        for triple in Self::vector_triples(kind, vector) {
            ok &= self.update_rating(&triple).await;
        }
        ok
    }

    /// Deletes the ratings named by the vector's counterparts
    pub async fn delete_rating_vector(&self, kind: ProfileKind, vector: &RatingVector) -> bool {
        let mut ok = true;
        for triple in Self::vector_triples(kind, vector) {
            ok &= self.delete_rating(triple.user_id, triple.item_id).await;
        }
        ok
    }

    // ------------------------------------------------------------------
    // User and item profiles
    // ------------------------------------------------------------------

    pub async fn get_ids(&self, kind: ProfileKind) -> Vec<i64> {
        self.assoc.get_profile_ids(self.unit_of(kind)).await
    }

    pub async fn get_profile_attributes(&self, kind: ProfileKind) -> Option<AttributeList> {
        self.assoc.get_attributes(self.unit_of(kind)).await
    }

    pub async fn get_profile_by_id(&self, kind: ProfileKind, id: i64) -> Option<Profile> {
        self.assoc
            .get_profile(self.unit_of(kind), &Self::id_condition(kind, id))
            .await
    }

    pub async fn get_profiles_of(&self, kind: ProfileKind) -> Vec<Profile> {
        self.assoc.get_profiles(self.unit_of(kind), None).await
    }

    /// Inserts a profile, assigning `max id + 1` when its id is missing. Returns the id.
    pub async fn insert_profile(&self, kind: ProfileKind, profile: &Profile) -> Option<i64> {
        let unit = self.unit_of(kind);
        let mut profile = profile.clone();
        let id = match profile.get_i64(Self::id_field(kind)) {
            Some(id) => id,
            None => {
                let id = (self.assoc.get_profile_max_id(unit).await + 1).max(1);
                profile.set_by_name(Self::id_field(kind), Some(Value::Integer(id)));
                id
            }
        };
        self.assoc.insert_profile(unit, &profile).await.then_some(id)
    }

    /// Updates the profile, inserting it when absent
    pub async fn update_profile(&self, kind: ProfileKind, profile: &Profile) -> bool {
        let unit = self.unit_of(kind);
        let Some(id) = profile.get_i64(Self::id_field(kind)) else {
            return self.insert_profile(kind, profile).await.is_some();
        };
        if self
            .assoc
            .contains_profile(unit, &Self::id_condition(kind, id))
            .await
        {
            self.assoc.update_profile(unit, profile).await
        } else {
            self.assoc.insert_profile(unit, profile).await
        }
    }

    /// Deletes the profile together with its ratings, contexts and external mapping
    pub async fn delete_profile(&self, kind: ProfileKind, id: i64) -> bool {
        let deleted = self
            .assoc
            .delete_profile(self.unit_of(kind), &Self::id_condition(kind, id))
            .await;
        let ratings = match kind {
            ProfileKind::User => self.delete_user_rating(id).await,
            ProfileKind::Item => self.delete_item_rating(id).await,
        };
        let mapping = self.delete_attribute_map(&self.internal_record(kind, id)).await;
        deleted && ratings && mapping
    }

    pub async fn get_profile(&self, unit: &str, condition: &Profile) -> Option<Profile> {
        self.assoc.get_profile(unit, condition).await
    }

    pub async fn get_profiles(&self, unit: &str, condition: Option<&Profile>) -> Vec<Profile> {
        self.assoc.get_profiles(unit, condition).await
    }

    // ------------------------------------------------------------------
    // Nominal values
    // ------------------------------------------------------------------

    fn nominal_condition(unit: &str, attribute: Option<&str>) -> Profile {
        let mut condition = Profile::new(schema::nominal_attributes());
        condition.set_by_name(schema::NOMINAL_REF_UNIT, Some(unit.into()));
        condition.set_by_name(schema::ATTRIBUTE, attribute.map(Value::from));
        condition
    }

    pub async fn get_nominal_list(&self, unit: &str, attribute: &str) -> NominalList {
        let rows = self
            .assoc
            .get_profiles(
                &self.config.units.nominal,
                Some(&Self::nominal_condition(unit, Some(attribute))),
            )
            .await;
        NominalList::new(
            rows.iter()
                .filter_map(|row| {
                    Some(Nominal {
                        index: row.get_i64(schema::NOMINAL_INDEX)?,
                        value: row.get_text(schema::NOMINAL_VALUE).unwrap_or_default(),
                        parent_index: row.get_i64(schema::NOMINAL_PARENT_INDEX),
                    })
                })
                .collect(),
        )
    }

    pub async fn insert_nominal(&self, unit: &str, attribute: &str, nominal: &Nominal) -> bool {
        let mut row = Self::nominal_condition(unit, Some(attribute));
        row.set_by_name(schema::NOMINAL_INDEX, Some(Value::Integer(nominal.index)));
        row.set_by_name(schema::NOMINAL_VALUE, Some(nominal.value.as_str().into()));
        row.set_by_name(schema::NOMINAL_PARENT_INDEX, nominal.parent_index.map(Value::Integer));
        self.assoc.insert_profile(&self.config.units.nominal, &row).await
    }

    /// Deletes the nominal values of one attribute, or of the whole unit when `attribute` is `None`
    pub async fn delete_nominal(&self, unit: &str, attribute: Option<&str>) -> bool {
        self.assoc
            .delete_profile(
                &self.config.units.nominal,
                &Self::nominal_condition(unit, attribute),
            )
            .await
    }

    // ------------------------------------------------------------------
    // External id interchange
    // ------------------------------------------------------------------

    /// Internal record naming the id of a user or item
    pub fn internal_record(&self, kind: ProfileKind, id: i64) -> InternalRecord {
        InternalRecord::new(self.unit_of(kind), Self::id_field(kind), id.to_string())
    }

    fn map_row(internal: Option<&InternalRecord>, external: Option<&ExternalRecord>) -> Profile {
        let mut row = Profile::new(schema::attribute_map_attributes());
        if let Some(internal) = internal {
            row.set_by_name(schema::INTERNAL_UNIT, Some(internal.unit.as_str().into()));
            row.set_by_name(schema::INTERNAL_ATTRIBUTE, Some(internal.attribute.as_str().into()));
            row.set_by_name(schema::INTERNAL_VALUE, Some(internal.value.as_str().into()));
        }
        if let Some(external) = external {
            row.set_by_name(schema::EXTERNAL_UNIT, Some(external.unit.as_str().into()));
            row.set_by_name(schema::EXTERNAL_ATTRIBUTE, Some(external.attribute.as_str().into()));
            row.set_by_name(schema::EXTERNAL_VALUE, Some(external.value.as_str().into()));
        }
        row
    }

    fn map_from_row(row: &Profile) -> Option<InterchangeAttributeMap> {
        let map = InterchangeAttributeMap::new(
            InternalRecord::new(
                row.get_text(schema::INTERNAL_UNIT)?,
                row.get_text(schema::INTERNAL_ATTRIBUTE)?,
                row.get_text(schema::INTERNAL_VALUE)?,
            ),
            ExternalRecord::new(
                row.get_text(schema::EXTERNAL_UNIT)?,
                row.get_text(schema::EXTERNAL_ATTRIBUTE)?,
                row.get_text(schema::EXTERNAL_VALUE)?,
            ),
        );
        map.is_valid().then_some(map)
    }

    pub async fn get_external_record(&self, internal: &InternalRecord) -> Option<ExternalRecord> {
        if !internal.is_valid() {
            return None;
        }
        self.assoc
            .get_profile(
                &self.config.units.attribute_map,
                &Self::map_row(Some(internal), None),
            )
            .await
            .as_ref()
            .and_then(Self::map_from_row)
            .map(|m| m.external)
    }

    pub async fn get_internal_record(&self, external: &ExternalRecord) -> Option<InternalRecord> {
        if !external.is_valid() {
            return None;
        }
        self.assoc
            .get_profile(
                &self.config.units.attribute_map,
                &Self::map_row(None, Some(external)),
            )
            .await
            .as_ref()
            .and_then(Self::map_from_row)
            .map(|m| m.internal)
    }

    /// Mappings of one internal unit, or all of them
    pub async fn get_attribute_maps(&self, unit: Option<&str>) -> Vec<InterchangeAttributeMap> {
        self.assoc
            .get_profiles(&self.config.units.attribute_map, None)
            .await
            .iter()
            .filter_map(Self::map_from_row)
            .filter(|m| unit.map_or(true, |u| m.internal.unit == u))
            .collect()
    }

    pub async fn insert_attribute_map(&self, map: &InterchangeAttributeMap) -> bool {
        if !map.is_valid() {
            tracing::warn!(internal = ?map.internal, "Rejected incomplete attribute map");
            return false;
        }
        self.assoc
            .insert_profile(
                &self.config.units.attribute_map,
                &Self::map_row(Some(&map.internal), Some(&map.external)),
            )
            .await
    }

    /// Updates the mapping of `map.internal`, inserting it when absent
    pub async fn update_attribute_map(&self, map: &InterchangeAttributeMap) -> bool {
        if !map.is_valid() {
            tracing::warn!(internal = ?map.internal, "Rejected incomplete attribute map");
            return false;
        }
        let unit = &self.config.units.attribute_map;
        let row = Self::map_row(Some(&map.internal), Some(&map.external));
        if self
            .assoc
            .contains_profile(unit, &Self::map_row(Some(&map.internal), None))
            .await
        {
            self.assoc.update_profile(unit, &row).await
        } else {
            self.assoc.insert_profile(unit, &row).await
        }
    }

    pub async fn delete_attribute_map(&self, internal: &InternalRecord) -> bool {
        if !internal.is_valid() {
            return false;
        }
        self.assoc
            .delete_profile(
                &self.config.units.attribute_map,
                &Self::map_row(Some(internal), None),
            )
            .await
    }

    /// Deletes every mapping whose internal side lives in `unit`
    pub async fn delete_attribute_maps_of_unit(&self, unit: &str) -> bool {
        let mut condition = Profile::new(schema::attribute_map_attributes());
        condition.set_by_name(schema::INTERNAL_UNIT, Some(unit.into()));
        self.assoc
            .delete_profile(&self.config.units.attribute_map, &condition)
            .await
    }

    pub async fn get_external_of(&self, kind: ProfileKind, id: i64) -> Option<ExternalRecord> {
        self.get_external_record(&self.internal_record(kind, id)).await
    }

    /// External records of every user or item, keyed by internal id
    pub async fn get_external_records(&self, kind: ProfileKind) -> BTreeMap<i64, ExternalRecord> {
        self.get_attribute_maps(Some(self.unit_of(kind)))
            .await
            .into_iter()
            .filter(|m| m.internal.attribute == Self::id_field(kind))
            .filter_map(|m| Some((m.internal.value.parse().ok()?, m.external)))
            .collect()
    }

    /// Internal id of the user or item mapped to `external`
    pub async fn find_id(&self, kind: ProfileKind, external: &ExternalRecord) -> Option<i64> {
        let internal = self.get_internal_record(external).await?;
        if internal.unit != self.unit_of(kind) {
            return None;
        }
        internal.value.parse().ok()
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    fn account_row(name: &str) -> Profile {
        let mut row = Profile::new(schema::account_attributes());
        row.set_by_name(schema::ACCOUNT_NAME, Some(name.into()));
        row
    }

    fn account_to_row(account: &Account) -> Profile {
        let mut row = Self::account_row(&account.name);
        row.set_by_name(schema::ACCOUNT_PASSWORD, Some(account.password_hash.as_str().into()));
        row.set_by_name(
            schema::ACCOUNT_PRIVS,
            Some(account.privileges.0.to_string().into()),
        );
        row
    }

    pub async fn get_account(&self, name: &str) -> Option<Account> {
        let row = self
            .assoc
            .get_profile(&self.config.units.account, &Self::account_row(name))
            .await?;
        Some(Account {
            name: row.get_text(schema::ACCOUNT_NAME)?,
            password_hash: row.get_text(schema::ACCOUNT_PASSWORD).unwrap_or_default(),
            privileges: row
                .get_text(schema::ACCOUNT_PRIVS)
                .and_then(|p| p.parse().ok())
                .unwrap_or(Privileges(0)),
        })
    }

    pub async fn insert_account(&self, account: &Account) -> bool {
        self.assoc
            .insert_profile(&self.config.units.account, &Self::account_to_row(account))
            .await
    }

    pub async fn update_account(&self, account: &Account) -> bool {
        self.assoc
            .update_profile(&self.config.units.account, &Self::account_to_row(account))
            .await
    }

    pub async fn delete_account(&self, name: &str) -> bool {
        self.assoc
            .delete_profile(&self.config.units.account, &Self::account_row(name))
            .await
    }

    /// Password hash must match and every requested privilege bit must be granted
    pub async fn validate_account(&self, name: &str, password: &str, privileges: Privileges) -> bool {
        match self.get_account(name).await {
            Some(account) => account.verify(password, privileges),
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Context templates
    // ------------------------------------------------------------------

    pub async fn get_context_template_schema(&self) -> ContextTemplateSchema {
        let mut schema_out = ContextTemplateSchema::new();
        for row in self
            .assoc
            .get_profiles(&self.config.units.context_template, None)
            .await
        {
            let Some(id) = row.get_i64(schema::CTX_TEMPLATE_ID) else {
                continue;
            };
            schema_out.add(ContextTemplate {
                id,
                name: row.get_text(schema::CTX_NAME).unwrap_or_default(),
                kind: row.get_i64(schema::CTX_TYPE).unwrap_or_default(),
                parent: row.get_i64(schema::CTX_PARENT),
            });
        }
        schema_out
    }

    pub async fn insert_context_template(&self, template: &ContextTemplate) -> bool {
        let mut row = Profile::new(schema::context_template_attributes());
        row.set_by_name(schema::CTX_TEMPLATE_ID, Some(Value::Integer(template.id)));
        row.set_by_name(schema::CTX_NAME, Some(template.name.as_str().into()));
        row.set_by_name(schema::CTX_TYPE, Some(Value::Integer(template.kind)));
        row.set_by_name(schema::CTX_PARENT, template.parent.map(Value::Integer));
        self.assoc
            .insert_profile(&self.config.units.context_template, &row)
            .await
    }

    /// Profiles of every template that has a profile unit
    pub async fn get_context_profiles(&self) -> BTreeMap<i64, Vec<Profile>> {
        let template_unit = &self.config.units.context_template;
        let mut profiles = BTreeMap::new();
        for unit in self.assoc.get_unit_list().await.units {
            if let Some(id) = schema::parse_context_profile_unit(template_unit, &unit.name) {
                profiles.insert(id, self.assoc.get_profiles(&unit.name, None).await);
            }
        }
        profiles
    }

    /// Replaces the stored template schema and per-template profile units
    pub async fn import_context_template_schema(
        &self,
        schema_in: &ContextTemplateSchema,
        profiles: &BTreeMap<i64, Vec<Profile>>,
    ) -> bool {
        let template_unit = self.config.units.context_template.clone();
        let mut ok = self.assoc.delete_unit_data(&template_unit).await;
        for unit in self.assoc.get_unit_list().await.units {
            if schema::parse_context_profile_unit(&template_unit, &unit.name).is_some() {
                ok &= self.assoc.drop_unit(&unit.name).await;
            }
        }

        for template in schema_in.templates() {
            ok &= self.insert_context_template(template).await;
        }
        for (id, rows) in profiles {
            let Some(first) = rows.first() else {
                continue;
            };
            let unit = schema::context_profile_unit(&template_unit, *id);
            ok &= self.assoc.create_unit(&unit, first.attributes()).await;
            for row in rows {
                ok &= self.assoc.insert_profile(&unit, row).await;
            }
        }
        ok
    }

    // ------------------------------------------------------------------
    // Sample unit
    // ------------------------------------------------------------------

    pub async fn get_sample_profiles(&self) -> Vec<Profile> {
        self.assoc.get_profiles(&self.config.units.sample, None).await
    }

    pub async fn insert_sample_profile(&self, profile: &Profile) -> bool {
        self.assoc
            .insert_profile(&self.config.units.sample, profile)
            .await
    }

    // ------------------------------------------------------------------
    // Recommendation support
    // ------------------------------------------------------------------

    /// Parameter built from the user's stored ratings and profile
    pub async fn get_recommend_param(&self, user: i64) -> Option<RecommendParam> {
        let ratings = self.get_user_rating_vector(user).await;
        let profile = self.get_profile_by_id(ProfileKind::User, user).await;
        if ratings.is_none() && profile.is_none() {
            return None;
        }
        Some(
            RecommendParam::new(user)
                .with_ratings(ratings.unwrap_or_else(|| RatingVector::new(user)))
                .with_profile(profile),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn flat_provider() -> (tempfile::TempDir, Provider) {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfig::default().with_store_uri(format!("file:{}", dir.path().display()));
        let provider = Provider::open(config).await.unwrap();
        assert!(provider.create_schema().await);
        (dir, provider)
    }

    #[tokio::test]
    async fn test_create_schema_seeds_metadata_and_admin() {
        let (_dir, provider) = flat_provider().await;

        let units = provider.get_unit_list().await;
        assert_eq!(units.len(), 10);
        assert_eq!(provider.rating_range().await, RatingRange::new(1.0, 5.0));
        assert!(
            provider
                .validate_account("admin", "admin", Privileges::ADMIN)
                .await
        );
        assert!(!provider.validate_account("admin", "wrong", Privileges::ACCESS).await);
    }

    #[tokio::test]
    async fn test_insert_rating_creates_stub_profiles() {
        let (_dir, provider) = flat_provider().await;
        let triple = RatingTriple::new(3, 8, Rating::new(4.0));
        assert!(provider.insert_rating(&triple).await);

        assert!(provider.get_profile_by_id(ProfileKind::User, 3).await.is_some());
        assert!(provider.get_profile_by_id(ProfileKind::Item, 8).await.is_some());
        assert_eq!(provider.get_rating(3, 8).await.unwrap().value, 4.0);
    }

    #[tokio::test]
    async fn test_update_rating_replaces_contexts() {
        let (_dir, provider) = flat_provider().await;
        let first = RatingTriple::new(
            1,
            2,
            Rating::new(3.0).with_contexts(vec![Context::new(1, Some(5)), Context::new(2, Some(1))]),
        );
        assert!(provider.insert_rating(&first).await);

        let second = RatingTriple::new(1, 2, Rating::new(5.0).with_contexts(vec![Context::new(3, Some(9))]));
        assert!(provider.update_rating(&second).await);

        let rating = provider.get_rating(1, 2).await.unwrap();
        assert_eq!(rating.value, 5.0);
        assert_eq!(rating.contexts, vec![Context::new(3, Some(9))]);
        assert_eq!(provider.get_ratings().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rating_vectors_and_deletion() {
        let (_dir, provider) = flat_provider().await;
        for (user, item, value) in [(1, 1, 2.0), (1, 2, 3.0), (2, 1, 4.0)] {
            provider
                .insert_rating(&RatingTriple::new(user, item, Rating::new(value)))
                .await;
        }

        let by_user = provider.get_user_rating_vector(1).await.unwrap();
        assert_eq!(by_user.counterpart_ids(), vec![1, 2]);
        let by_item = provider.get_item_rating_vector(1).await.unwrap();
        assert_eq!(by_item.counterpart_ids(), vec![1, 2]);

        assert!(provider.delete_user_rating(1).await);
        assert!(provider.get_user_rating_vector(1).await.is_none());
        assert_eq!(provider.get_ratings().await.len(), 1);
    }

    #[tokio::test]
    async fn test_profile_ids_are_assigned() {
        let (_dir, provider) = flat_provider().await;
        let attributes = Arc::new(provider.get_profile_attributes(ProfileKind::Item).await.unwrap());
        let blank = Profile::new(attributes);

        assert_eq!(provider.insert_profile(ProfileKind::Item, &blank).await, Some(1));
        assert_eq!(provider.insert_profile(ProfileKind::Item, &blank).await, Some(2));
        assert_eq!(provider.get_ids(ProfileKind::Item).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_delete_profile_cascades() {
        let (_dir, provider) = flat_provider().await;
        provider
            .insert_rating(&RatingTriple::new(5, 1, Rating::new(3.0)))
            .await;
        let external = ExternalRecord::new("crm", "customer", "C-5");
        let map = InterchangeAttributeMap::new(
            provider.internal_record(ProfileKind::User, 5),
            external.clone(),
        );
        assert!(provider.update_attribute_map(&map).await);
        assert_eq!(provider.find_id(ProfileKind::User, &external).await, Some(5));

        assert!(provider.delete_profile(ProfileKind::User, 5).await);
        assert!(provider.get_profile_by_id(ProfileKind::User, 5).await.is_none());
        assert!(provider.get_user_rating_vector(5).await.is_none());
        assert!(provider.get_external_of(ProfileKind::User, 5).await.is_none());
    }

    #[tokio::test]
    async fn test_attribute_map_rejects_incomplete_records() {
        let (_dir, provider) = flat_provider().await;
        let map = InterchangeAttributeMap::new(
            provider.internal_record(ProfileKind::Item, 1),
            ExternalRecord::new("catalog", "", "SKU-1"),
        );
        assert!(!provider.insert_attribute_map(&map).await);
        assert!(provider.get_attribute_maps(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_nominal_lists() {
        let (_dir, provider) = flat_provider().await;
        let unit = provider.units().user.clone();
        provider
            .insert_nominal(&unit, schema::USER_TYPE, &Nominal::new(0, "student"))
            .await;
        provider
            .insert_nominal(&unit, schema::USER_TYPE, &Nominal::new(1, "engineer"))
            .await;

        let list = provider.get_nominal_list(&unit, schema::USER_TYPE).await;
        assert_eq!(list.len(), 2);
        let attributes = provider.get_profile_attributes(ProfileKind::User).await.unwrap();
        assert!(attributes.find(schema::USER_TYPE).unwrap().is_nominal());

        assert!(provider.delete_nominal(&unit, Some(schema::USER_TYPE)).await);
        assert!(provider.get_nominal_list(&unit, schema::USER_TYPE).await.is_empty());
    }

    #[tokio::test]
    async fn test_context_template_schema_import() {
        let (_dir, provider) = flat_provider().await;
        let mut cts = ContextTemplateSchema::new();
        cts.add(ContextTemplate::new(1, "time"));
        cts.add(ContextTemplate::new(2, "weekday").with_parent(1));

        let mut profile = Profile::new(schema::context_profile_attributes());
        profile.set_by_name(schema::CTX_VALUE, Some(Value::Integer(0)));
        profile.set_by_name(schema::CTX_NAME, Some("monday".into()));
        let profiles = BTreeMap::from([(2, vec![profile])]);

        assert!(provider.import_context_template_schema(&cts, &profiles).await);
        assert_eq!(provider.get_context_template_schema().await, cts);
        assert_eq!(provider.get_context_profiles().await.get(&2).map(Vec::len), Some(1));

        assert!(provider.drop_schema().await);
        assert!(provider.get_unit_list().await.is_empty());
    }
}
