pub mod flat;
pub mod relational;
pub mod schema;

use std::collections::BTreeMap;

use crate::{
    config::DataConfig,
    error::AppResult,
    models::{AttributeList, AttributeType, Nominal, NominalList, Profile, UnitList, Value},
};

pub use flat::FlatAssoc;
pub use relational::{create_pool, RelationalAssoc, SqlDialect};

/// Storage driver contract shared by the flat-file and relational back-ends
///
/// Every method reports failure as `false`, `None` or an empty collection. Errors are
/// logged at this boundary and never propagated to callers.
#[async_trait::async_trait]
pub trait ProviderAssoc: Send + Sync {
    /// URI of the backing store
    fn store_uri(&self) -> &str;

    async fn get_unit_list(&self) -> UnitList;

    async fn contains_unit(&self, unit: &str) -> bool {
        self.get_unit_list().await.contains(unit)
    }

    async fn create_unit(&self, unit: &str, attributes: &AttributeList) -> bool;

    async fn drop_unit(&self, unit: &str) -> bool;

    /// Removes every row, keeping the unit and its schema
    async fn delete_unit_data(&self, unit: &str) -> bool;

    /// Unit schema with nominal lists attached from the nominal unit
    async fn get_attributes(&self, unit: &str) -> Option<AttributeList>;

    /// Rows matching `condition` (see [`match_filters`]); every row when `None`
    async fn get_profiles(&self, unit: &str, condition: Option<&Profile>) -> Vec<Profile>;

    async fn get_profile(&self, unit: &str, condition: &Profile) -> Option<Profile> {
        self.get_profiles(unit, Some(condition)).await.into_iter().next()
    }

    async fn contains_profile(&self, unit: &str, condition: &Profile) -> bool {
        self.get_profile(unit, condition).await.is_some()
    }

    async fn insert_profile(&self, unit: &str, profile: &Profile) -> bool;

    /// Replaces the rows matched by `profile`; false when nothing matched
    async fn update_profile(&self, unit: &str, profile: &Profile) -> bool;

    async fn delete_profile(&self, unit: &str, condition: &Profile) -> bool;

    /// Sorted values of the unit's integer id attribute
    async fn get_profile_ids(&self, unit: &str) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .get_profiles(unit, None)
            .await
            .iter()
            .filter_map(Profile::id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Largest id of the unit, -1 when the unit has none
    async fn get_profile_max_id(&self, unit: &str) -> i64 {
        self.get_profile_ids(unit).await.last().copied().unwrap_or(-1)
    }

    async fn count_profiles(&self, unit: &str) -> usize {
        self.get_profiles(unit, None).await.len()
    }

    async fn close(&self);
}

/// Storage back-end, selected once from the store URI scheme
pub enum Assoc {
    Flat(FlatAssoc),
    Relational(RelationalAssoc),
}

/// Back-end implied by a store URI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Flat,
    Relational(SqlDialect),
}

impl StoreKind {
    pub fn from_uri(uri: &str) -> StoreKind {
        match SqlDialect::from_uri(uri) {
            Some(dialect) => StoreKind::Relational(dialect),
            None => StoreKind::Flat,
        }
    }
}

impl Assoc {
    pub async fn open(config: &DataConfig) -> AppResult<Assoc> {
        match StoreKind::from_uri(&config.store_uri) {
            StoreKind::Flat => Ok(Assoc::Flat(FlatAssoc::open(config).await?)),
            StoreKind::Relational(dialect) => Ok(Assoc::Relational(
                RelationalAssoc::open(config, dialect).await?,
            )),
        }
    }

    pub fn kind(&self) -> StoreKind {
        match self {
            Assoc::Flat(_) => StoreKind::Flat,
            Assoc::Relational(r) => StoreKind::Relational(r.dialect()),
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $assoc:ident => $call:expr) => {
        match $self {
            Assoc::Flat($assoc) => $call,
            Assoc::Relational($assoc) => $call,
        }
    };
}

#[async_trait::async_trait]
impl ProviderAssoc for Assoc {
    fn store_uri(&self) -> &str {
        dispatch!(self, a => a.store_uri())
    }

    async fn get_unit_list(&self) -> UnitList {
        dispatch!(self, a => a.get_unit_list().await)
    }

    async fn contains_unit(&self, unit: &str) -> bool {
        dispatch!(self, a => a.contains_unit(unit).await)
    }

    async fn create_unit(&self, unit: &str, attributes: &AttributeList) -> bool {
        dispatch!(self, a => a.create_unit(unit, attributes).await)
    }

    async fn drop_unit(&self, unit: &str) -> bool {
        dispatch!(self, a => a.drop_unit(unit).await)
    }

    async fn delete_unit_data(&self, unit: &str) -> bool {
        dispatch!(self, a => a.delete_unit_data(unit).await)
    }

    async fn get_attributes(&self, unit: &str) -> Option<AttributeList> {
        dispatch!(self, a => a.get_attributes(unit).await)
    }

    async fn get_profiles(&self, unit: &str, condition: Option<&Profile>) -> Vec<Profile> {
        dispatch!(self, a => a.get_profiles(unit, condition).await)
    }

    async fn get_profile(&self, unit: &str, condition: &Profile) -> Option<Profile> {
        dispatch!(self, a => a.get_profile(unit, condition).await)
    }

    async fn contains_profile(&self, unit: &str, condition: &Profile) -> bool {
        dispatch!(self, a => a.contains_profile(unit, condition).await)
    }

    async fn insert_profile(&self, unit: &str, profile: &Profile) -> bool {
        dispatch!(self, a => a.insert_profile(unit, profile).await)
    }

    async fn update_profile(&self, unit: &str, profile: &Profile) -> bool {
        dispatch!(self, a => a.update_profile(unit, profile).await)
    }

    async fn delete_profile(&self, unit: &str, condition: &Profile) -> bool {
        dispatch!(self, a => a.delete_profile(unit, condition).await)
    }

    async fn get_profile_ids(&self, unit: &str) -> Vec<i64> {
        dispatch!(self, a => a.get_profile_ids(unit).await)
    }

    async fn get_profile_max_id(&self, unit: &str) -> i64 {
        dispatch!(self, a => a.get_profile_max_id(unit).await)
    }

    async fn count_profiles(&self, unit: &str) -> usize {
        dispatch!(self, a => a.count_profiles(unit).await)
    }

    async fn close(&self) {
        dispatch!(self, a => a.close().await)
    }
}

/// Equality filters a condition profile imposes on `attributes`, as (position, value).
///
/// If the unit has key attributes and the condition fills at least one of them, only the
/// filled key attributes are compared. Otherwise every non-missing condition field is.
/// Condition fields are matched to unit columns by name.
pub fn match_filters(attributes: &AttributeList, condition: &Profile) -> Vec<(usize, Value)> {
    let filled: Vec<(usize, Value)> = attributes
        .iter()
        .enumerate()
        .filter_map(|(i, attribute)| {
            condition
                .get_by_name(&attribute.name)
                .and_then(|v| v.coerce(attribute.kind))
                .map(|v| (i, v))
        })
        .collect();

    let keyed: Vec<(usize, Value)> = filled
        .iter()
        .filter(|(i, _)| attributes.get(*i).map(|a| a.key).unwrap_or(false))
        .cloned()
        .collect();

    if keyed.is_empty() {
        filled
    } else {
        keyed
    }
}

pub fn matches(row: &Profile, filters: &[(usize, Value)]) -> bool {
    filters
        .iter()
        .all(|(i, expected)| row.get(*i).map(|v| values_equal(v, expected)).unwrap_or(false))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Real(x), Value::Real(y)) => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}

/// Attaches nominal lists of `unit` read from nominal-unit rows
pub fn attach_nominals(attributes: &mut AttributeList, unit: &str, nominal_rows: &[Profile]) {
    let mut grouped: BTreeMap<String, Vec<Nominal>> = BTreeMap::new();
    for row in nominal_rows {
        if row.get_text(schema::NOMINAL_REF_UNIT).as_deref() != Some(unit) {
            continue;
        }
        let (Some(attribute), Some(index)) = (
            row.get_text(schema::ATTRIBUTE),
            row.get_i64(schema::NOMINAL_INDEX),
        ) else {
            continue;
        };
        grouped.entry(attribute).or_default().push(Nominal {
            index,
            value: row.get_text(schema::NOMINAL_VALUE).unwrap_or_default(),
            parent_index: row.get_i64(schema::NOMINAL_PARENT_INDEX),
        });
    }

    for i in 0..attributes.len() {
        let Some(attribute) = attributes.get_mut(i) else {
            continue;
        };
        if let Some(values) = grouped.remove(&attribute.name) {
            if attribute.kind == AttributeType::Integer {
                attribute.kind = AttributeType::Nominal;
            }
            attribute.nominal = Some(NominalList::new(values));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn rating_row(user: i64, item: i64, value: f64) -> Profile {
        let mut row = Profile::new(schema::rating_attributes());
        row.set_by_name(schema::USER_ID, Some(Value::Integer(user)));
        row.set_by_name(schema::ITEM_ID, Some(Value::Integer(item)));
        row.set_by_name(schema::RATING_VALUE, Some(Value::Real(value)));
        row
    }

    #[test]
    fn test_key_filters_ignore_non_key_fields() {
        let attributes = schema::rating_attributes();
        let condition = rating_row(1, 2, 4.0);
        let filters = match_filters(&attributes, &condition);

        assert_eq!(filters.len(), 2);
        // a stored row with a different rating still matches on keys
        assert!(matches(&rating_row(1, 2, 1.0), &filters));
        assert!(!matches(&rating_row(1, 3, 4.0), &filters));
    }

    #[test]
    fn test_partial_key_condition_matches_by_filled_keys() {
        let attributes = schema::rating_attributes();
        let mut condition = Profile::new(attributes.clone());
        condition.set_by_name(schema::USER_ID, Some(Value::Integer(1)));
        let filters = match_filters(&attributes, &condition);

        assert!(matches(&rating_row(1, 2, 1.0), &filters));
        assert!(matches(&rating_row(1, 9, 3.0), &filters));
        assert!(!matches(&rating_row(2, 2, 1.0), &filters));
    }

    #[test]
    fn test_no_keys_filled_falls_back_to_all_fields() {
        let attributes = schema::attribute_map_attributes();
        let mut condition = Profile::new(attributes.clone());
        condition.set_by_name(schema::EXTERNAL_VALUE, Some("C-7".into()));
        let filters = match_filters(&attributes, &condition);

        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].0, 5);
    }

    #[test]
    fn test_keyless_unit_ands_all_fields() {
        let attributes = Arc::new(AttributeList::new(vec![
            crate::models::Attribute::new("a", AttributeType::Integer),
            crate::models::Attribute::new("b", AttributeType::String),
        ]));
        let mut condition = Profile::new(attributes.clone());
        condition.set(0, Some(Value::Integer(1)));
        condition.set(1, Some("x".into()));

        let mut row = condition.clone();
        assert!(matches(&row, &match_filters(&attributes, &condition)));
        row.set(1, Some("y".into()));
        assert!(!matches(&row, &match_filters(&attributes, &condition)));
    }

    #[test]
    fn test_attach_nominals_marks_integer_columns() {
        let mut attributes = (*schema::user_attributes()).clone();
        let mut row = Profile::new(schema::nominal_attributes());
        row.set_by_name(schema::NOMINAL_REF_UNIT, Some("hdp_user".into()));
        row.set_by_name(schema::ATTRIBUTE, Some(schema::USER_TYPE.into()));
        row.set_by_name(schema::NOMINAL_INDEX, Some(Value::Integer(0)));
        row.set_by_name(schema::NOMINAL_VALUE, Some("student".into()));

        attach_nominals(&mut attributes, "hdp_user", &[row]);
        let user_type = attributes.find(schema::USER_TYPE).unwrap();
        assert!(user_type.is_nominal());
        assert_eq!(user_type.nominal.as_ref().unwrap().value_of(0), Some("student"));
    }

    #[test]
    fn test_store_kind_from_uri() {
        assert_eq!(StoreKind::from_uri("file:/data/store"), StoreKind::Flat);
        assert_eq!(StoreKind::from_uri("./store"), StoreKind::Flat);
        assert_eq!(
            StoreKind::from_uri("sqlite::memory:"),
            StoreKind::Relational(SqlDialect::Sqlite)
        );
        assert_eq!(
            StoreKind::from_uri("postgres://localhost/hudup"),
            StoreKind::Relational(SqlDialect::Postgres)
        );
    }
}
