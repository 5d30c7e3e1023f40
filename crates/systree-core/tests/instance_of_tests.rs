use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use systree_core::{LookupError, SystemError, ValidationError};
use systree_test_utils::instance_types;

#[test]
fn test_instance_of_from_record() {
    let t = instance_types();
    let f = t.f.from_value(&json!({"num": 9})).unwrap();
    let m = t
        .holder
        .from_value(&json!({"f": {"num": 1}}))
        .unwrap()
        .with("f", f)
        .unwrap();
    let built = m.record("f").unwrap().build().unwrap();
    assert_eq!(built.as_value(), Some(&json!(9.0)));
}

#[test]
fn test_instance_of_picks_most_recent_candidate() {
    let t = instance_types();

    let m = t.holder.from_value(&json!({"f": {"num": 9}})).unwrap();
    let f = m.record("f").unwrap();
    assert!(Arc::ptr_eq(f.record_type(), &t.f));
    assert_eq!(f.build().unwrap().as_value(), Some(&json!(9.0)));

    let m = t
        .holder
        .from_value(&json!({"f": {"num": 9, "scale": 9}}))
        .unwrap();
    let f = m.record("f").unwrap();
    assert!(Arc::ptr_eq(f.record_type(), &t.f3));
    assert!(f.is_instance_of(&t.my_base));
    assert_eq!(f.build().unwrap().as_value(), Some(&json!(81.0)));
}

#[test]
fn test_instance_of_discriminator() {
    let t = instance_types();
    let m = t
        .holder
        .from_value(&json!({"f": {"num": 9, "scale": 9, "__factory__": "F2"}}))
        .unwrap();
    assert!(Arc::ptr_eq(m.record("f").unwrap().record_type(), &t.f2));

    let m = t
        .holder
        .from_value(&json!({"f": {"num": 9, "scale": 9, "__factory__": "Test:Instance/F2"}}))
        .unwrap();
    assert!(Arc::ptr_eq(m.record("f").unwrap().record_type(), &t.f2));
}

#[test]
fn test_instance_of_rejects_foreign_type() {
    let t = instance_types();
    let err = t
        .holder
        .from_value(&json!({"f": {"__factory__": "NotAMyBase"}}))
        .unwrap_err();
    assert!(matches!(
        err,
        SystemError::Validation(ValidationError::NotASubtype { .. })
    ));

    let foreign = t.not_a_my_base.default_record().unwrap();
    let err = t
        .holder
        .from_value(&json!({"f": {"num": 1}}))
        .unwrap()
        .with("f", foreign)
        .unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_instance_of_reports_every_candidate() {
    let t = instance_types();
    let err = t
        .holder
        .from_value(&json!({"f": {"bogus": 1}}))
        .unwrap_err();
    match err {
        SystemError::Validation(ValidationError::NoMatchingMember { at, attempts }) => {
            assert_eq!(at, "M.f");
            let members: Vec<_> = attempts.iter().map(|a| a.member.as_str()).collect();
            assert_eq!(members, ["F3", "F2", "F"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_unknown_discriminator_is_lookup_error() {
    let t = instance_types();
    let err = t
        .holder
        .from_value(&json!({"f": {"__factory__": "Nope"}}))
        .unwrap_err();
    assert!(matches!(
        err,
        SystemError::Lookup(LookupError::UnknownName { .. })
    ));
}
