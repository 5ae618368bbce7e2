use super::*;
use crate::demo::NoSortSchema;
use std::sync::Arc;

#[test]
fn base62_encoding_roundtrips_through_distinct_names() {
    let a = registry::schema_dir_name(0);
    let b = registry::schema_dir_name(61);
    let c = registry::schema_dir_name(62);
    assert_eq!(a, "0");
    assert_ne!(b, c);
}

#[test]
fn register_then_get_returns_same_schema() {
    let schema: Arc<dyn SchemaReflect> = Arc::new(NoSortSchema::new(9001));
    registry::register(schema.clone());
    let fetched = registry::get(9001).unwrap();
    assert_eq!(fetched.schema_id(), 9001);
}

#[test]
fn unknown_schema_lookup_errors() {
    assert!(registry::get(u32::MAX - 1).is_err());
}
