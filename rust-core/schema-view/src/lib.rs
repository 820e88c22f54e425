pub mod hidden;
pub mod meta_model;
pub mod property;

pub use hidden::HiddenTypeGate;
pub use meta_model::{
    Cardinality, EnumValueOverride, FieldDef, IndexDefinition, ListElementKind, Relationship,
    RelationshipDirection, RolloverConfig, RolloverGranularity, SchemaConfig, SchemaError,
    SchemaView, TypeDef, TypeKind,
};
pub use property::{
    coerce_date, coerce_date_time, coerce_geo_location, coerce_json_safe_long,
    coerce_local_time, coerce_long_string, coerce_time_zone, FieldPath, PropertyValue,
    ScalarError, JSON_SAFE_LONG_MAX, JSON_SAFE_LONG_MIN,
};

