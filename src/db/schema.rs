//! Field names and default attribute lists of the fixed unit set

use std::sync::Arc;

use crate::models::{Attribute, AttributeList, AttributeType};

pub const ATTRIBUTE: &str = "attribute";
pub const ATTRIBUTE_VALUE: &str = "attribute_value";

pub const USER_ID: &str = "userid";
pub const USER_TYPE: &str = "user_type";
pub const ITEM_ID: &str = "itemid";
pub const ITEM_TYPE: &str = "item_type";
pub const RATING_VALUE: &str = "rating";
pub const RATING_DATE: &str = "rating_date";

pub const NOMINAL_REF_UNIT: &str = "nominal_ref_unit";
pub const NOMINAL_INDEX: &str = "nominal_index";
pub const NOMINAL_VALUE: &str = "nominal_value";
pub const NOMINAL_PARENT_INDEX: &str = "nominal_parent_index";

pub const ACCOUNT_NAME: &str = "account_name";
pub const ACCOUNT_PASSWORD: &str = "account_password";
pub const ACCOUNT_PRIVS: &str = "account_privs";

pub const INTERNAL_UNIT: &str = "internal_unit";
pub const INTERNAL_ATTRIBUTE: &str = "internal_attribute_name";
pub const INTERNAL_VALUE: &str = "internal_attribute_value";
pub const EXTERNAL_UNIT: &str = "external_unit";
pub const EXTERNAL_ATTRIBUTE: &str = "external_attribute_name";
pub const EXTERNAL_VALUE: &str = "external_attribute_value";

pub const CTX_TEMPLATE_ID: &str = "ctx_templateid";
pub const CTX_NAME: &str = "ctx_name";
pub const CTX_TYPE: &str = "ctx_type";
pub const CTX_PARENT: &str = "ctx_parent";
pub const CTX_VALUE: &str = "ctx_value";

pub const SAMPLE_FIELD1: &str = "sample_field1";
pub const SAMPLE_FIELD2: &str = "sample_field2";

/// Config-unit keys of the rating range metadata
pub const MIN_RATING: &str = "min_rating";
pub const MAX_RATING: &str = "max_rating";

pub const ADMIN_ACCOUNT: &str = "admin";
pub const ADMIN_PASSWORD: &str = "admin";

fn list(attributes: Vec<Attribute>) -> Arc<AttributeList> {
    Arc::new(AttributeList::new(attributes))
}

pub fn config_attributes() -> Arc<AttributeList> {
    list(vec![
        Attribute::new(ATTRIBUTE, AttributeType::String).key(),
        Attribute::new(ATTRIBUTE_VALUE, AttributeType::String),
    ])
}

pub fn user_attributes() -> Arc<AttributeList> {
    list(vec![
        Attribute::new(USER_ID, AttributeType::Integer).key().auto_increment(),
        Attribute::new(USER_TYPE, AttributeType::Integer),
    ])
}

pub fn item_attributes() -> Arc<AttributeList> {
    list(vec![
        Attribute::new(ITEM_ID, AttributeType::Integer).key().auto_increment(),
        Attribute::new(ITEM_TYPE, AttributeType::Integer),
    ])
}

pub fn rating_attributes() -> Arc<AttributeList> {
    list(vec![
        Attribute::new(USER_ID, AttributeType::Integer).key(),
        Attribute::new(ITEM_ID, AttributeType::Integer).key(),
        Attribute::new(RATING_VALUE, AttributeType::Real),
        Attribute::new(RATING_DATE, AttributeType::Date),
    ])
}

pub fn nominal_attributes() -> Arc<AttributeList> {
    list(vec![
        Attribute::new(NOMINAL_REF_UNIT, AttributeType::String).key(),
        Attribute::new(ATTRIBUTE, AttributeType::String).key(),
        Attribute::new(NOMINAL_INDEX, AttributeType::Integer).key(),
        Attribute::new(NOMINAL_VALUE, AttributeType::String),
        Attribute::new(NOMINAL_PARENT_INDEX, AttributeType::Integer),
    ])
}

pub fn account_attributes() -> Arc<AttributeList> {
    list(vec![
        Attribute::new(ACCOUNT_NAME, AttributeType::String).key(),
        Attribute::new(ACCOUNT_PASSWORD, AttributeType::String),
        Attribute::new(ACCOUNT_PRIVS, AttributeType::String),
    ])
}

pub fn attribute_map_attributes() -> Arc<AttributeList> {
    list(vec![
        Attribute::new(INTERNAL_UNIT, AttributeType::String).key(),
        Attribute::new(INTERNAL_ATTRIBUTE, AttributeType::String).key(),
        Attribute::new(INTERNAL_VALUE, AttributeType::String).key(),
        Attribute::new(EXTERNAL_UNIT, AttributeType::String),
        Attribute::new(EXTERNAL_ATTRIBUTE, AttributeType::String),
        Attribute::new(EXTERNAL_VALUE, AttributeType::String),
    ])
}

pub fn context_template_attributes() -> Arc<AttributeList> {
    list(vec![
        Attribute::new(CTX_TEMPLATE_ID, AttributeType::Integer).key(),
        Attribute::new(CTX_NAME, AttributeType::String),
        Attribute::new(CTX_TYPE, AttributeType::Integer),
        Attribute::new(CTX_PARENT, AttributeType::Integer),
    ])
}

pub fn context_attributes() -> Arc<AttributeList> {
    list(vec![
        Attribute::new(USER_ID, AttributeType::Integer).key(),
        Attribute::new(ITEM_ID, AttributeType::Integer).key(),
        Attribute::new(CTX_TEMPLATE_ID, AttributeType::Integer).key(),
        Attribute::new(CTX_VALUE, AttributeType::Integer),
    ])
}

pub fn sample_attributes() -> Arc<AttributeList> {
    list(vec![
        Attribute::new(SAMPLE_FIELD1, AttributeType::Integer).key(),
        Attribute::new(SAMPLE_FIELD2, AttributeType::Real),
    ])
}

/// Attributes of the per-template context profile unit
pub fn context_profile_attributes() -> Arc<AttributeList> {
    list(vec![
        Attribute::new(CTX_VALUE, AttributeType::Integer).key(),
        Attribute::new(CTX_NAME, AttributeType::String),
    ])
}

/// Unit holding the profiles of one context template
pub fn context_profile_unit(context_template_unit: &str, template_id: i64) -> String {
    format!("{}_{}_profile", context_template_unit, template_id)
}

/// Template id of a per-template profile unit
pub fn parse_context_profile_unit(context_template_unit: &str, unit: &str) -> Option<i64> {
    unit.strip_prefix(context_template_unit)?
        .strip_prefix('_')?
        .strip_suffix("_profile")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_profile_unit_names() {
        let unit = context_profile_unit("hdp_context_template", 4);
        assert_eq!(unit, "hdp_context_template_4_profile");
        assert_eq!(parse_context_profile_unit("hdp_context_template", &unit), Some(4));
        assert_eq!(parse_context_profile_unit("hdp_context_template", "hdp_context"), None);
    }

    #[test]
    fn test_key_layouts() {
        assert_eq!(rating_attributes().key_indices(), vec![0, 1]);
        assert_eq!(user_attributes().id_index(), Some(0));
        assert_eq!(attribute_map_attributes().key_indices(), vec![0, 1, 2]);
        assert_eq!(config_attributes().id_index(), None);
    }
}
