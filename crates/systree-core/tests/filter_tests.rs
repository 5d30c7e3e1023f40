use std::rc::Rc;

use pretty_assertions::assert_eq;
use serde_json::json;
use systree_core::prelude::*;
use systree_test_utils::init_tracing;

fn child() -> std::sync::Arc<RecordType> {
    RecordType::builder("Child")
        .field(FieldSpec::new("name", FieldKind::optional(FieldKind::STR)))
        .finish()
}

#[test]
fn test_default_filter_collects_direct_children() {
    init_tracing();
    let child = child();
    let s = RecordType::builder("S")
        .attribute(
            FieldSpec::new("c1", FieldKind::record(&child)).with_default(json!({"name": "c1"})),
        )
        .attribute(
            FieldSpec::new("c2", FieldKind::record(&child)).with_default(json!({"name": "c2"})),
        )
        .filter("childs", [Target::Node], 0)
        .finish();

    let node = s.default_record().unwrap().build_node().unwrap();
    let childs = node.selection("childs").unwrap();
    assert_eq!(childs.len(), 2);
    let names: Vec<_> = childs.iter().map(Built::path).collect();
    assert_eq!(names, ["c1", "c2"]);
}

#[test]
fn test_deep_filter_reaches_collection_elements() {
    let child = child();
    let s = RecordType::builder("S")
        .attribute(
            FieldSpec::new("c1", FieldKind::record(&child)).with_default(json!({"name": "c1"})),
        )
        .attribute(
            FieldSpec::new("c2", FieldKind::record(&child)).with_default(json!({"name": "c2"})),
        )
        .attribute(
            FieldSpec::new("l", FieldKind::list_of(FieldKind::record(&child)))
                .with_default(json!([{"name": "l1"}])),
        )
        .filter("childs", [Target::of(&child)], -1)
        .finish();

    let node = s.default_record().unwrap().build_node().unwrap();
    assert_eq!(node.find(&[Target::of(&child)], -1).count(), 3);

    let childs = node.selection("childs").unwrap();
    assert_eq!(childs.len(), 3);
    let l1 = node.list("l").unwrap().node(0).unwrap();
    assert!(childs.iter().any(|c| c.as_node().is_some_and(|n| Rc::ptr_eq(n, &l1))));
}

#[test]
fn test_filter_is_inherited_and_rerun_after_invalidate() {
    let child = child();
    let base = RecordType::builder("Base")
        .field(FieldSpec::new("a", FieldKind::record(&child)))
        .filter("childs", [Target::Node], 0)
        .finish();
    let derived = RecordType::builder("Derived")
        .extends(&base)
        .field(FieldSpec::new("b", FieldKind::record(&child)))
        .finish();
    assert!(derived.filter("childs").is_some());

    let node = derived.default_record().unwrap().build_node().unwrap();
    let first = node.selection("childs").unwrap();
    assert_eq!(first.len(), 2);
    assert!(node.invalidate("childs"));
    let second = node.selection("childs").unwrap();
    assert!(!Rc::ptr_eq(&first, &second));
    assert!(first[0].same_instance(&second[0]));
}

#[test]
fn test_field_shadows_filter_of_same_name() {
    let child = child();
    let ty = RecordType::builder("T")
        .filter("c", [Target::Node], 0)
        .field(FieldSpec::new("c", FieldKind::record(&child)))
        .finish();
    assert!(ty.filter("c").is_none());
    let node = ty.default_record().unwrap().build_node().unwrap();
    assert!(node.child("c").is_ok());
}
