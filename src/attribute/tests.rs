use super::*;
use proptest::prelude::*;

#[test]
fn test_set_marks_dirty() {
    let mut attrs = Attributes::new();
    assert!(!attrs.is_dirty());

    attrs.set("unitSI", 1.0);
    assert!(attrs.is_dirty());
    assert_eq!(attrs.get("unitSI"), Some(&AttributeValue::F64(1.0)));

    attrs.clear_dirty();
    assert!(!attrs.is_dirty());
    assert_eq!(attrs.dirty_entries().count(), 0);
    assert_eq!(attrs.len(), 1);
}

#[test]
fn test_load_is_clean() {
    let mut attrs = Attributes::new();
    attrs.load("openPMD", AttributeValue::from("1.1.0"));
    assert!(!attrs.is_dirty());
    assert_eq!(attrs.get("openPMD").and_then(AttributeValue::as_str), Some("1.1.0"));
}

#[test]
fn test_dirty_entries_only_changed() {
    let mut attrs = Attributes::new();
    attrs.load("a", AttributeValue::I32(1));
    attrs.load("b", AttributeValue::I32(2));
    attrs.set("b", 3i32);

    let dirty: Vec<_> = attrs.dirty_entries().collect();
    assert_eq!(dirty, vec![("b", &AttributeValue::I32(3))]);
}

#[test]
fn test_value_conversions() {
    assert_eq!(AttributeValue::F32(0.5).as_f64(), Some(0.5));
    assert_eq!(AttributeValue::I64(-1).as_u64(), None);
    assert_eq!(AttributeValue::U32(7).as_u64(), Some(7));
    assert_eq!(
        AttributeValue::from(&["x", "y"][..]).as_vec_string(),
        Some(&["x".to_string(), "y".to_string()][..])
    );
    assert_eq!(
        AttributeValue::VecF32(vec![1.0, 2.0]).as_vec_f64(),
        Some(vec![1.0, 2.0])
    );
}

#[test]
fn test_value_serde_shape() {
    let json = serde_json::to_string(&AttributeValue::VecU64(vec![1, 2])).unwrap();
    assert_eq!(json, r#"{"datatype":"VEC_U64","value":[1,2]}"#);
    let back: AttributeValue = serde_json::from_str(&json).unwrap();
    assert_eq!(back, AttributeValue::VecU64(vec![1, 2]));
}

proptest! {
    #[test]
    fn prop_last_write_wins(values in proptest::collection::vec(any::<i64>(), 1..20)) {
        let mut attrs = Attributes::new();
        for v in &values {
            attrs.set("counter", *v);
        }
        let last = *values.last().unwrap();
        prop_assert_eq!(attrs.get("counter"), Some(&AttributeValue::I64(last)));
        prop_assert!(attrs.is_dirty());
        prop_assert_eq!(attrs.dirty_entries().count(), 1);
    }
}
