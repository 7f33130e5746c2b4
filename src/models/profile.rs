use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};

use super::attribute::{AttributeList, AttributeType};

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bit(bool),
    Integer(i64),
    Real(f64),
    Date(DateTime<Utc>),
    Text(String),
    Object(serde_json::Value),
}

impl Value {
    /// Parses the textual cell encoding for the given column type.
    /// Empty text is a missing value.
    pub fn parse(kind: AttributeType, text: &str) -> Option<Value> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        match kind {
            AttributeType::Bit => match text {
                "1" | "true" | "TRUE" | "True" => Some(Value::Bit(true)),
                "0" | "false" | "FALSE" | "False" => Some(Value::Bit(false)),
                _ => None,
            },
            AttributeType::Integer | AttributeType::Nominal => text
                .parse::<i64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().map(|f| f as i64))
                .map(Value::Integer),
            AttributeType::Real => text.parse::<f64>().ok().map(Value::Real),
            AttributeType::String => Some(Value::Text(text.to_string())),
            AttributeType::Date => parse_date(text).map(Value::Date),
            AttributeType::Object => serde_json::from_str(text).ok().map(Value::Object),
        }
    }

    /// Textual cell encoding, inverse of [`Value::parse`]
    pub fn to_text(&self) -> String {
        match self {
            Value::Bit(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(f) => f.to_string(),
            Value::Date(d) => d.to_rfc3339(),
            Value::Text(s) => s.clone(),
            Value::Object(o) => o.to_string(),
        }
    }

    /// Converts the value into the representation used by `kind` columns
    pub fn coerce(&self, kind: AttributeType) -> Option<Value> {
        match (self, kind) {
            (Value::Bit(_), AttributeType::Bit)
            | (Value::Integer(_), AttributeType::Integer | AttributeType::Nominal)
            | (Value::Real(_), AttributeType::Real)
            | (Value::Date(_), AttributeType::Date)
            | (Value::Text(_), AttributeType::String)
            | (Value::Object(_), AttributeType::Object) => Some(self.clone()),
            (Value::Integer(i), AttributeType::Real) => Some(Value::Real(*i as f64)),
            (Value::Real(f), AttributeType::Integer | AttributeType::Nominal) => {
                Some(Value::Integer(*f as i64))
            }
            (Value::Bit(b), AttributeType::Integer) => Some(Value::Integer(i64::from(*b))),
            _ => Value::parse(kind, &self.to_text()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Real(f) => Some(*f as i64),
            Value::Bit(b) => Some(i64::from(*b)),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Date(value)
    }
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(text) {
        return Some(d.with_timezone(&Utc));
    }
    if let Ok(d) = chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(d.and_utc());
    }
    // PostgreSQL timestamptz text form
    if let Ok(d) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(d.with_timezone(&Utc));
    }
    if let Ok(d) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
    }
    // Unix seconds
    text.parse::<f64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
}

/// Which side of the rating matrix a profile describes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    User,
    Item,
}

impl ProfileKind {
    pub fn other(&self) -> ProfileKind {
        match self {
            ProfileKind::User => ProfileKind::Item,
            ProfileKind::Item => ProfileKind::User,
        }
    }
}

/// Positional value row parallel to an [`AttributeList`]; `None` marks a missing value
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    attributes: Arc<AttributeList>,
    values: Vec<Option<Value>>,
}

impl Profile {
    /// Creates a profile with every value missing
    pub fn new(attributes: Arc<AttributeList>) -> Self {
        let values = vec![None; attributes.len()];
        Self { attributes, values }
    }

    /// Builds a profile from `name -> value` pairs; unknown names are ignored
    pub fn from_map(attributes: Arc<AttributeList>, map: &BTreeMap<String, Value>) -> Self {
        let mut profile = Profile::new(attributes);
        for (name, value) in map {
            profile.set_by_name(name, Some(value.clone()));
        }
        profile
    }

    pub fn attributes(&self) -> &Arc<AttributeList> {
        &self.attributes
    }

    pub fn values(&self) -> &[Option<Value>] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(|v| v.as_ref())
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.attributes.index_of(name).and_then(|i| self.get(i))
    }

    pub fn is_missing(&self, index: usize) -> bool {
        self.get(index).is_none()
    }

    /// Stores `value` at `index`, coerced to the column type. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize, value: Option<Value>) {
        let Some(attribute) = self.attributes.get(index) else {
            return;
        };
        self.values[index] = value.and_then(|v| v.coerce(attribute.kind));
    }

    /// Returns false when the profile has no attribute named `name`
    pub fn set_by_name(&mut self, name: &str, value: Option<Value>) -> bool {
        match self.attributes.index_of(name) {
            Some(index) => {
                self.set(index, value);
                true
            }
            None => false,
        }
    }

    pub fn set_missing(&mut self, index: usize) {
        if index < self.values.len() {
            self.values[index] = None;
        }
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }

    /// Value of the unit's integer id attribute
    pub fn id(&self) -> Option<i64> {
        self.attributes
            .id_index()
            .and_then(|i| self.get(i))
            .and_then(Value::as_i64)
    }

    pub fn set_id(&mut self, id: i64) {
        if let Some(index) = self.attributes.id_index() {
            self.set(index, Some(Value::Integer(id)));
        }
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get_by_name(name).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get_by_name(name).and_then(Value::as_f64)
    }

    pub fn get_text(&self, name: &str) -> Option<String> {
        self.get_by_name(name).map(Value::to_text)
    }

    /// Copies values by attribute name onto a profile of another schema
    pub fn project(&self, attributes: Arc<AttributeList>) -> Profile {
        let mut profile = Profile::new(attributes);
        for (i, attribute) in self.attributes.iter().enumerate() {
            if let Some(value) = self.get(i) {
                profile.set_by_name(&attribute.name, Some(value.clone()));
            }
        }
        profile
    }
}

impl Serialize for Profile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (attribute, value) in self.attributes.iter().zip(&self.values) {
            map.serialize_entry(&attribute.name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::attribute::Attribute;

    fn item_attributes() -> Arc<AttributeList> {
        Arc::new(AttributeList::new(vec![
            Attribute::new("itemid", AttributeType::Integer).key(),
            Attribute::new("title", AttributeType::String),
            Attribute::new("price", AttributeType::Real),
            Attribute::new("released", AttributeType::Date),
        ]))
    }

    #[test]
    fn test_set_coerces_to_column_type() {
        let mut profile = Profile::new(item_attributes());
        profile.set(0, Some(Value::Real(7.0)));
        profile.set(2, Some(Value::Integer(3)));

        assert_eq!(profile.id(), Some(7));
        assert_eq!(profile.get(2), Some(&Value::Real(3.0)));
        assert_eq!(profile.missing_count(), 2);
    }

    #[test]
    fn test_parse_missing_and_dates() {
        assert_eq!(Value::parse(AttributeType::Integer, "  "), None);
        assert_eq!(Value::parse(AttributeType::Bit, "1"), Some(Value::Bit(true)));

        let date = Value::parse(AttributeType::Date, "2021-03-04").unwrap();
        let text = date.to_text();
        assert_eq!(Value::parse(AttributeType::Date, &text), Some(date));
    }

    #[test]
    fn test_serializes_as_named_map() {
        let mut profile = Profile::new(item_attributes());
        profile.set_by_name("itemid", Some(Value::Integer(4)));
        profile.set_by_name("title", Some("Heat".into()));

        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["itemid"], 4);
        assert_eq!(json["title"], "Heat");
        assert!(json["price"].is_null());
    }

    #[test]
    fn test_project_keeps_shared_columns() {
        let mut profile = Profile::new(item_attributes());
        profile.set_by_name("itemid", Some(Value::Integer(9)));
        profile.set_by_name("price", Some(Value::Real(2.5)));

        let narrow = Arc::new(AttributeList::new(vec![
            Attribute::new("itemid", AttributeType::Integer).key(),
            Attribute::new("price", AttributeType::Real),
        ]));
        let projected = profile.project(narrow);
        assert_eq!(projected.id(), Some(9));
        assert_eq!(projected.get_f64("price"), Some(2.5));
    }
}
