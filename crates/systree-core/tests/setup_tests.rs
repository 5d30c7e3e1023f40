use pretty_assertions::assert_eq;
use serde_json::json;
use systree_core::patch::{self, Setup};
use systree_core::{PatchError, SystemError};
use systree_test_utils::{init_tracing, setup_types};

#[test]
fn test_setup_initialisation() {
    init_tracing();
    let t = setup_types();

    let f = t
        .f0
        .from_value(&json!({"__setup__": {"f1.f2.x": 10, "f1.x": 8}}))
        .unwrap()
        .build_node()
        .unwrap();
    let f1 = f.child("f1").unwrap();
    assert_eq!(f1.child("f2").unwrap().value("x").unwrap(), json!(10));
    assert_eq!(f1.value("x").unwrap(), json!(8));
    assert_eq!(f1.list("l").unwrap().node(1).unwrap().value("z").unwrap(), json!(2));
    assert_eq!(f1.dict("d").unwrap().node("b").unwrap().value("z").unwrap(), json!(2));

    let f = t
        .f0
        .from_value(&json!({"__setup__": {"f1.l[1].z": 20, "f1.d[\"b\"].z": 20}}))
        .unwrap()
        .build_node()
        .unwrap();
    let f1 = f.child("f1").unwrap();
    assert_eq!(f1.list("l").unwrap().node(1).unwrap().value("z").unwrap(), json!(20));
    assert_eq!(f1.dict("d").unwrap().node("b").unwrap().value("z").unwrap(), json!(20));
}

#[test]
fn test_setup_initialisation_from_yaml() {
    let t = setup_types();
    let payload = r"
f1:
    x: 1
    f2:
        x: 2
__setup__:
    f1.x: 10
    f1.f2.x: 20
    f1.l[1].z: 200
    f1.d['b'].z: 400
";
    let raw: serde_json::Value = serde_yaml::from_str(payload).unwrap();
    let f = t.f0.from_value(&raw).unwrap().build_node().unwrap();
    let f1 = f.child("f1").unwrap();
    assert_eq!(f1.child("f2").unwrap().value("x").unwrap(), json!(20));
    assert_eq!(f1.value("x").unwrap(), json!(10));
    assert_eq!(f1.list("l").unwrap().node(1).unwrap().value("z").unwrap(), json!(200));
    assert_eq!(f1.dict("d").unwrap().node("b").unwrap().value("z").unwrap(), json!(400));
}

#[test]
fn test_setup_on_record_leaves_original() {
    let t = setup_types();
    let original = t.f0.default_record().unwrap();
    let setup = Setup::new().with("f1.x", 3).unwrap();
    let patched = original.clone().with_setup(&setup).unwrap();

    assert_eq!(patched.record("f1").unwrap().value("x"), Some(&json!(3)));
    assert_eq!(original.record("f1").unwrap().value("x"), Some(&json!(0)));
}

#[test]
fn test_apply_to_built_tree() {
    let t = setup_types();
    let root = t.f0.default_record().unwrap().build_node().unwrap();
    let f1 = root.child("f1").unwrap();
    let old = f1.list("l").unwrap().node(0).unwrap();

    let setup = Setup::from_value(&json!({
        "f1.x": 5,
        "f1.l[0].z": 50,
        "f1.d['c']": {"z": 7},
    }))
    .unwrap();
    patch::apply(&root, &setup).unwrap();

    assert_eq!(f1.value("x").unwrap(), json!(5));
    let l = f1.list("l").unwrap();
    assert!(std::rc::Rc::ptr_eq(&l.node(0).unwrap(), &old));
    assert_eq!(old.value("z").unwrap(), json!(50));
    assert_eq!(f1.dict("d").unwrap().keys(), ["a", "b", "c"]);
    assert_eq!(
        f1.dict("d").unwrap().node("c").unwrap().path(),
        "f1.d['c']"
    );
}

#[test]
fn test_apply_reports_bad_paths() {
    let t = setup_types();
    let root = t.f0.default_record().unwrap().build_node().unwrap();

    let cases = [
        ("f1.nope.x", "no step"),
        ("f1.l[9].z", "no step"),
        ("f1.nope", "no step"),
        ("f1.x[0]", "wrong container"),
        ("f1.l.z", "wrong container"),
    ];
    for (path, expected) in cases {
        let setup = Setup::new().with(path, 1).unwrap();
        let err = patch::apply(&root, &setup).unwrap_err();
        let matched = match err {
            SystemError::Patch(PatchError::NoSuchStep { .. }) => "no step",
            SystemError::Patch(PatchError::WrongContainer { .. }) => "wrong container",
            other => panic!("{path}: unexpected error {other:?}"),
        };
        assert_eq!(matched, expected, "{path}");
    }
}

#[test]
fn test_construction_setup_rejects_unknown_path() {
    let t = setup_types();
    let err = t
        .f0
        .from_value(&json!({"__setup__": {"f1.zz": 1}}))
        .unwrap_err();
    assert!(err.is_patch());

    let err = t
        .f0
        .from_value(&json!({"__setup__": {"f1.x": "ten"}}))
        .unwrap_err();
    assert!(err.is_validation());

    let err = t.f0.from_value(&json!({"__setup__": [1]})).unwrap_err();
    assert!(matches!(
        err,
        SystemError::Patch(PatchError::NotAMapping { .. })
    ));
}

#[test]
fn test_apply_touches_only_named_leaves() {
    let t = setup_types();
    let root = t.f0.default_record().unwrap().build_node().unwrap();
    let before = root.to_value();

    let setup = Setup::from_value(&json!({"f1.f2.x": 10, "f1.l[1].z": 20})).unwrap();
    patch::apply(&root, &setup).unwrap();

    let mut expected = before;
    expected["f1"]["f2"]["x"] = json!(10);
    expected["f1"]["l"][1]["z"] = json!(20);
    assert_eq!(root.to_value(), expected);
}

#[test]
fn test_apply_stops_at_first_failing_entry() {
    let t = setup_types();
    let root = t.f0.default_record().unwrap().build_node().unwrap();
    let f1 = root.child("f1").unwrap();

    let setup = Setup::new()
        .with("f1.x", 5)
        .unwrap()
        .with("f1.nope", 6)
        .unwrap()
        .with("f1.f2.x", 7)
        .unwrap();
    let err = patch::apply(&root, &setup).unwrap_err();
    assert!(matches!(
        err,
        SystemError::Patch(PatchError::NoSuchStep { .. })
    ));

    assert_eq!(f1.value("x").unwrap(), json!(5));
    assert!(!f1.has_field("nope"));
    assert_eq!(f1.child("f2").unwrap().value("x").unwrap(), json!(0));
}
