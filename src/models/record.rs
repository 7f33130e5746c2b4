use serde::{Deserialize, Serialize};

/// Identifies a value inside this system: (unit, attribute, value)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct InternalRecord {
    pub unit: String,
    pub attribute: String,
    pub value: String,
}

impl InternalRecord {
    pub fn new(
        unit: impl Into<String>,
        attribute: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            unit: unit.into(),
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.unit.is_empty() && !self.attribute.is_empty() && !self.value.is_empty()
    }
}

/// Identifies the same value inside an external system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ExternalRecord {
    pub unit: String,
    pub attribute: String,
    pub value: String,
}

impl ExternalRecord {
    pub fn new(
        unit: impl Into<String>,
        attribute: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            unit: unit.into(),
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.unit.is_empty() && !self.attribute.is_empty() && !self.value.is_empty()
    }
}

/// Bidirectional mapping between an internal and an external record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct InterchangeAttributeMap {
    pub internal: InternalRecord,
    pub external: ExternalRecord,
}

impl InterchangeAttributeMap {
    pub fn new(internal: InternalRecord, external: ExternalRecord) -> Self {
        Self { internal, external }
    }

    /// Both sides must fully specify (unit, attribute, value)
    pub fn is_valid(&self) -> bool {
        self.internal.is_valid() && self.external.is_valid()
    }
}
