use serde::{Deserialize, Serialize};

/// A named table (relational) or file (flat store)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Unit {
    pub name: String,
    /// Set for units outside the fixed unit set, e.g. sampler output
    pub extra: bool,
}

impl Unit {
    pub fn new(name: impl Into<String>, extra: bool) -> Self {
        Self {
            name: name.into(),
            extra,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct UnitList {
    pub units: Vec<Unit>,
}

impl UnitList {
    pub fn contains(&self, name: &str) -> bool {
        self.units.iter().any(|u| u.name == name)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn extras(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter().filter(|u| u.extra)
    }

    pub fn names(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.name.as_str()).collect()
    }
}
