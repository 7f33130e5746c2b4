use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Column type of an attribute
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    Bit,
    Nominal,
    Integer,
    Real,
    String,
    Date,
    Object,
}

impl AttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::Bit => "bit",
            AttributeType::Nominal => "nominal",
            AttributeType::Integer => "integer",
            AttributeType::Real => "real",
            AttributeType::String => "string",
            AttributeType::Date => "date",
            AttributeType::Object => "object",
        }
    }
}

impl Display for AttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AttributeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bit" => Ok(AttributeType::Bit),
            "nominal" => Ok(AttributeType::Nominal),
            "integer" => Ok(AttributeType::Integer),
            "real" => Ok(AttributeType::Real),
            "string" => Ok(AttributeType::String),
            "date" => Ok(AttributeType::Date),
            "object" => Ok(AttributeType::Object),
            other => Err(format!("unknown attribute type '{}'", other)),
        }
    }
}

/// One categorical value of a nominal attribute
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Nominal {
    pub index: i64,
    pub value: String,
    /// Index of the parent category, if the categories form a hierarchy
    pub parent_index: Option<i64>,
}

impl Nominal {
    pub fn new(index: i64, value: impl Into<String>) -> Self {
        Self {
            index,
            value: value.into(),
            parent_index: None,
        }
    }

    pub fn with_parent(mut self, parent_index: i64) -> Self {
        self.parent_index = Some(parent_index);
        self
    }
}

/// Ordered categorical values of one (unit, attribute) pair
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NominalList {
    pub values: Vec<Nominal>,
}

impl NominalList {
    pub fn new(mut values: Vec<Nominal>) -> Self {
        values.sort_by_key(|n| n.index);
        Self { values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn value_of(&self, index: i64) -> Option<&str> {
        self.values
            .iter()
            .find(|n| n.index == index)
            .map(|n| n.value.as_str())
    }

    pub fn index_of(&self, value: &str) -> Option<i64> {
        self.values.iter().find(|n| n.value == value).map(|n| n.index)
    }
}

/// Typed column of a unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AttributeType,
    #[serde(default)]
    pub key: bool,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nominal: Option<NominalList>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, kind: AttributeType) -> Self {
        Self {
            name: name.into(),
            kind,
            key: false,
            auto_increment: false,
            nominal: None,
        }
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn is_nominal(&self) -> bool {
        self.kind == AttributeType::Nominal
    }
}

/// Ordered attribute sequence; positions are load-bearing for every profile
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct AttributeList {
    attributes: Vec<Attribute>,
}

impl AttributeList {
    pub fn new(attributes: Vec<Attribute>) -> Self {
        Self { attributes }
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Attribute> {
        self.attributes.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Attribute> {
        self.attributes.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn find(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.attributes.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn key_indices(&self) -> Vec<usize> {
        self.attributes
            .iter()
            .enumerate()
            .filter(|(_, a)| a.key)
            .map(|(i, _)| i)
            .collect()
    }

    /// Position of the single integer key, if the unit is identified by one
    pub fn id_index(&self) -> Option<usize> {
        let keys = self.key_indices();
        match keys.as_slice() {
            [index] if matches!(
                self.attributes[*index].kind,
                AttributeType::Integer | AttributeType::Nominal
            ) =>
            {
                Some(*index)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_attributes() -> AttributeList {
        AttributeList::new(vec![
            Attribute::new("userid", AttributeType::Integer).key().auto_increment(),
            Attribute::new("user_type", AttributeType::Nominal),
        ])
    }

    #[test]
    fn test_attribute_type_parse() {
        assert_eq!("Real".parse::<AttributeType>().unwrap(), AttributeType::Real);
        assert_eq!(AttributeType::Date.to_string(), "date");
        assert!("decimal".parse::<AttributeType>().is_err());
    }

    #[test]
    fn test_id_index_requires_single_integer_key() {
        assert_eq!(user_attributes().id_index(), Some(0));

        let rating = AttributeList::new(vec![
            Attribute::new("userid", AttributeType::Integer).key(),
            Attribute::new("itemid", AttributeType::Integer).key(),
        ]);
        assert_eq!(rating.id_index(), None);

        let account = AttributeList::new(vec![Attribute::new(
            "account_name",
            AttributeType::String,
        )
        .key()]);
        assert_eq!(account.id_index(), None);
    }

    #[test]
    fn test_nominal_list_lookup() {
        let list = NominalList::new(vec![
            Nominal::new(2, "student").with_parent(1),
            Nominal::new(1, "person"),
        ]);
        assert_eq!(list.values[0].index, 1);
        assert_eq!(list.value_of(2), Some("student"));
        assert_eq!(list.index_of("person"), Some(1));
        assert_eq!(list.value_of(7), None);
    }
}
