//! Testing utilities for the systree workspace
//!
//! Shared record type fixtures and tracing setup. Fixtures are declared once
//! per process and registered in the global registry, so raw data in tests
//! can name them through the discriminator key.

#![allow(missing_docs)]

use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::{json, Value};
use systree_core::{registry, Built, FieldKind, FieldSpec, RecordType};
use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber honouring `RUST_LOG`
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

fn register(name: &str, ty: &Arc<RecordType>) {
    registry::register(name, ty).unwrap();
}

/// `House` with rooms, each room with a window
#[derive(Debug)]
pub struct HouseTypes {
    pub base: Arc<RecordType>,
    pub window: Arc<RecordType>,
    pub room: Arc<RecordType>,
    pub house: Arc<RecordType>,
}

static HOUSE: Lazy<HouseTypes> = Lazy::new(|| {
    let base = RecordType::builder("BaseSystem").finish();
    let window = RecordType::builder("Window")
        .extends(&base)
        .field(FieldSpec::new("panes", FieldKind::INT).with_default(2))
        .finish();
    let room = RecordType::builder("Room")
        .extends(&base)
        .field(FieldSpec::new("width", FieldKind::FLOAT).with_default(1.0))
        .field(FieldSpec::new("height", FieldKind::FLOAT).with_default(1.0))
        .field(FieldSpec::new("window", FieldKind::record(&window)))
        .allow_mutation(true)
        .finish();
    let house = RecordType::builder("House")
        .extends(&base)
        .field(
            FieldSpec::new("bedroom", FieldKind::record(&room))
                .with_default(json!({"width": 10, "height": 12.0})),
        )
        .field(FieldSpec::new("window", FieldKind::record(&window)))
        .attribute(FieldSpec::new("garage", FieldKind::record(&room)))
        .finish();

    register("Test:Thing/BaseSystem", &base);
    register("Test:Thing/Window", &window);
    register("Test:Thing/Room", &room);
    register("Test:Thing/House", &house);
    HouseTypes {
        base,
        window,
        room,
        house,
    }
});

/// House fixture types
pub fn house_types() -> &'static HouseTypes {
    &HOUSE
}

/// `Estate` with list and dict collections of rooms
#[derive(Debug)]
pub struct EstateTypes {
    pub room: Arc<RecordType>,
    pub estate: Arc<RecordType>,
}

static ESTATE: Lazy<EstateTypes> = Lazy::new(|| {
    let room = Arc::clone(&house_types().room);
    let estate = RecordType::builder("Estate")
        .extends(&house_types().base)
        .field(FieldSpec::new("name", FieldKind::STR).with_default("estate"))
        .field(
            FieldSpec::new("rooms", FieldKind::list_of(FieldKind::record(&room)))
                .with_default(json!([{}, {"width": 9}])),
        )
        .field(
            FieldSpec::new("wings", FieldKind::dict_of(FieldKind::record(&room)))
                .with_default(json!({"bedroom": {"width": 9}, "livingroom": {}})),
        )
        .attribute(
            FieldSpec::new("garages", FieldKind::list_of(FieldKind::record(&room)))
                .with_default(json!([{}])),
        )
        .allow_mutation(true)
        .finish();
    register("Test:Thing/Estate", &estate);
    EstateTypes { room, estate }
});

/// Estate fixture types
pub fn estate_types() -> &'static EstateTypes {
    &ESTATE
}

/// Nested `F0 > F1 > (F2, list, dict)` tree used by setup patches
#[derive(Debug)]
pub struct SetupTypes {
    pub bf: Arc<RecordType>,
    pub f2: Arc<RecordType>,
    pub f1: Arc<RecordType>,
    pub f0: Arc<RecordType>,
}

static SETUP: Lazy<SetupTypes> = Lazy::new(|| {
    let bf = RecordType::builder("BF")
        .field(FieldSpec::new("z", FieldKind::INT).with_default(0))
        .finish();
    let f2 = RecordType::builder("F2")
        .extends(&bf)
        .field(FieldSpec::new("x", FieldKind::INT).with_default(0))
        .finish();
    let f1 = RecordType::builder("F1")
        .extends(&bf)
        .field(FieldSpec::new("x", FieldKind::INT).with_default(0))
        .field(
            FieldSpec::new("l", FieldKind::list_of(FieldKind::record(&bf)))
                .with_default(json!([{"z": 1}, {"z": 2}, {"z": 3}])),
        )
        .field(
            FieldSpec::new("d", FieldKind::dict_of(FieldKind::record(&bf)))
                .with_default(json!({"a": {"z": 1}, "b": {"z": 2}})),
        )
        .attribute(FieldSpec::new("f2", FieldKind::record(&f2)))
        .finish();
    let f0 = RecordType::builder("F0")
        .extends(&bf)
        .attribute(FieldSpec::new("f1", FieldKind::record(&f1)))
        .finish();
    SetupTypes { bf, f2, f1, f0 }
});

/// Setup fixture types
pub fn setup_types() -> &'static SetupTypes {
    &SETUP
}

/// `MyBase` family resolved through `InstanceOf`
#[derive(Debug)]
pub struct InstanceTypes {
    pub my_base: Arc<RecordType>,
    pub f: Arc<RecordType>,
    pub f2: Arc<RecordType>,
    pub f3: Arc<RecordType>,
    pub not_a_my_base: Arc<RecordType>,
    pub holder: Arc<RecordType>,
}

fn number(record: &systree_core::Record, name: &str) -> f64 {
    record.value(name).and_then(Value::as_f64).unwrap_or(0.0)
}

static INSTANCE: Lazy<InstanceTypes> = Lazy::new(|| {
    let my_base = RecordType::builder("MyBase").unbuildable().finish();
    let f = RecordType::builder("F")
        .extends(&my_base)
        .field(FieldSpec::new("num", FieldKind::INT).with_default(10))
        .build_with(|record, _| Ok(Built::Value(json!(number(record, "num")))))
        .finish();
    let f2 = RecordType::builder("F2")
        .extends(&my_base)
        .field(FieldSpec::new("num", FieldKind::INT).with_default(10))
        .field(FieldSpec::required("scale", FieldKind::FLOAT))
        .build_with(|record, _| {
            Ok(Built::Value(json!(number(record, "num") * number(record, "scale"))))
        })
        .finish();
    let f3 = RecordType::builder("F3")
        .extends(&f2)
        .field(FieldSpec::new("offset", FieldKind::FLOAT).with_default(0.0))
        .finish();
    let not_a_my_base = RecordType::builder("NotAMyBase").finish();
    let holder = RecordType::builder("M")
        .field(FieldSpec::required("f", FieldKind::instance_of(&my_base)))
        .finish();

    register("Test:Instance/F", &f);
    register("Test:Instance/F2", &f2);
    register("Test:Instance/F3", &f3);
    register("Test:Instance/NotAMyBase", &not_a_my_base);
    InstanceTypes {
        my_base,
        f,
        f2,
        f3,
        not_a_my_base,
        holder,
    }
});

/// Instance-of fixture types
pub fn instance_types() -> &'static InstanceTypes {
    &INSTANCE
}
