use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A context value attached to a rating, e.g. "location = home"
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Context {
    pub template_id: i64,
    /// `None` selects every value of the template
    pub value: Option<i64>,
}

impl Context {
    pub fn new(template_id: i64, value: Option<i64>) -> Self {
        Self { template_id, value }
    }
}

/// Typed context dimension
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextTemplate {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: i64,
    pub parent: Option<i64>,
}

impl ContextTemplate {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: 0,
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: i64) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// Hierarchy of context templates keyed by id
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContextTemplateSchema {
    templates: BTreeMap<i64, ContextTemplate>,
}

impl ContextTemplateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, template: ContextTemplate) {
        self.templates.insert(template.id, template);
    }

    pub fn get(&self, id: i64) -> Option<&ContextTemplate> {
        self.templates.get(&id)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn templates(&self) -> impl Iterator<Item = &ContextTemplate> {
        self.templates.values()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.templates.keys().copied().collect()
    }

    /// Whether `ancestor` is reachable from `id` by following parent links
    pub fn is_ancestor(&self, ancestor: i64, id: i64) -> bool {
        let mut current = self.get(id).and_then(|t| t.parent);
        let mut hops = 0;
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            hops += 1;
            // guards against cyclic parent links
            if hops > self.templates.len() {
                return false;
            }
            current = self.get(parent).and_then(|t| t.parent);
        }
        false
    }

    /// Whether the selection context `wanted` can be inferred from `given`
    pub fn can_infer(&self, given: &Context, wanted: &Context) -> bool {
        if given.template_id == wanted.template_id {
            return wanted.value.is_none() || given.value == wanted.value;
        }
        wanted.value.is_none() && self.is_ancestor(wanted.template_id, given.template_id)
    }

    /// Whether every selection context is inferable from the given set
    pub fn can_infer_all(&self, given: &[Context], wanted: &[Context]) -> bool {
        wanted
            .iter()
            .all(|w| given.iter().any(|g| self.can_infer(g, w)))
    }
}
