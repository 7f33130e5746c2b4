pub mod account;
pub mod attribute;
pub mod context;
pub mod profile;
pub mod progress;
pub mod rating;
pub mod record;
pub mod unit;

pub use account::{hash_password, Account, Privileges};
pub use attribute::{Attribute, AttributeList, AttributeType, Nominal, NominalList};
pub use context::{Context, ContextTemplate, ContextTemplateSchema};
pub use profile::{Profile, ProfileKind, Value};
pub use progress::{ProgressEvent, ProgressListener};
pub use rating::{Rating, RatingRange, RatingTriple, RatingVector};
pub use record::{ExternalRecord, InterchangeAttributeMap, InternalRecord};
pub use unit::{Unit, UnitList};
