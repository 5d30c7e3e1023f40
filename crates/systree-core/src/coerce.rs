//! Raw value coercion
//!
//! Turns raw `serde_json` values into validated [`FieldValue`]s according to
//! the declared [`FieldKind`]. This is where defaults are applied, extra
//! fields are checked against the record policy, discriminators pick a
//! concrete record type and unions pick a member.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::built::Built;
use crate::error::{MemberAttempt, SystemError, ValidationError};
use crate::field::{FieldKind, ScalarKind};
use crate::patch::Setup;
use crate::record::{FieldInput, FieldValue, Record};
use crate::registry;
use crate::schema::{ExtraPolicy, RecordType};
use crate::settings::Settings;

/// Coerce a raw value to `kind`
pub(crate) fn coerce(kind: &FieldKind, raw: &Value, at: &str) -> Result<FieldValue, SystemError> {
    let settings = registry::settings();
    Coercer::new(&settings).value(kind, raw, at)
}

/// Coerce a raw mapping to a record of `ty` or a discriminated subtype
pub(crate) fn record_from_value(
    ty: &Arc<RecordType>,
    raw: &Value,
    at: &str,
) -> Result<Record, SystemError> {
    let settings = registry::settings();
    Coercer::new(&settings).record(ty, raw, at)
}

/// Coerce any field input to `kind`
pub(crate) fn coerce_input(
    kind: &FieldKind,
    input: FieldInput,
    at: &str,
) -> Result<FieldValue, SystemError> {
    match input {
        FieldInput::Raw(raw) => coerce(kind, &raw, at),
        FieldInput::Record(record) => accept_record(kind, record, at)
            .map(FieldValue::Record)
            .map_err(Into::into),
        FieldInput::Built(built) => accept_built(kind, &built, at),
    }
}

/// Coerce an input for the field `name` of `ty`, declared or extra
pub(crate) fn field_input(
    ty: &RecordType,
    name: &str,
    input: FieldInput,
    at: &str,
) -> Result<FieldValue, SystemError> {
    if let Some(spec) = ty.field(name) {
        return coerce_input(spec.kind(), input, at);
    }
    if ty.extra_policy() == ExtraPolicy::Forbid {
        return Err(ValidationError::UnknownField {
            at: at.to_string(),
            record: ty.name().to_string(),
            field: name.to_string(),
        }
        .into());
    }
    match input {
        FieldInput::Raw(raw) => {
            let settings = registry::settings();
            Coercer::new(&settings).extra(&raw, at)
        }
        FieldInput::Record(record) => Ok(FieldValue::Record(record)),
        FieldInput::Built(built) => Ok(built_to_field_value(&built)),
    }
}

/// Field value equivalent of a built value
pub(crate) fn built_to_field_value(built: &Built) -> FieldValue {
    match built {
        Built::Null | Built::Opaque(_) => FieldValue::Null,
        Built::Value(value) => FieldValue::Scalar(value.clone()),
        Built::Node(node) => FieldValue::Record(node.record().clone()),
        Built::List(list) => list.to_field_value(),
        Built::Dict(dict) => dict.to_field_value(),
        Built::Selection(items) => FieldValue::List(items.iter().map(built_to_field_value).collect()),
    }
}

/// Short name of a raw value's shape
pub(crate) fn value_kind(raw: &Value) -> &'static str {
    match raw {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

fn mismatch(at: &str, expected: impl Into<String>, raw: &Value) -> ValidationError {
    ValidationError::TypeMismatch {
        at: at.to_string(),
        expected: expected.into(),
        found: value_kind(raw).to_string(),
    }
}

fn accept_record(kind: &FieldKind, record: Record, at: &str) -> Result<Record, ValidationError> {
    let ty = record.record_type();
    let accepted = match kind.strip_optional() {
        FieldKind::Record(expected) | FieldKind::InstanceOf(expected) => ty.extends(expected),
        FieldKind::Union(members) => members.iter().any(|m| ty.extends(m)),
        FieldKind::Scalar(ScalarKind::Any) => true,
        _ => {
            return Err(ValidationError::TypeMismatch {
                at: at.to_string(),
                expected: kind.describe(),
                found: "a record".to_string(),
            })
        }
    };
    if accepted {
        Ok(record)
    } else {
        Err(ValidationError::NotASubtype {
            at: at.to_string(),
            name: ty.name().to_string(),
            expected: kind.describe(),
        })
    }
}

fn accept_built(kind: &FieldKind, built: &Built, at: &str) -> Result<FieldValue, SystemError> {
    match (kind.strip_optional(), built) {
        (_, Built::Null) => coerce(kind, &Value::Null, at),
        (_, Built::Value(raw)) => coerce(kind, raw, at),
        (_, Built::Node(node)) => accept_record(kind, node.record().clone(), at)
            .map(FieldValue::Record)
            .map_err(Into::into),
        (FieldKind::List(_), Built::List(list)) => accept_field_value(kind, list.to_field_value(), at),
        (FieldKind::Dict(_), Built::Dict(dict)) => accept_field_value(kind, dict.to_field_value(), at),
        (FieldKind::Scalar(ScalarKind::Any), Built::List(_) | Built::Dict(_)) => {
            Ok(built_to_field_value(built))
        }
        (_, other) => Err(ValidationError::TypeMismatch {
            at: at.to_string(),
            expected: kind.describe(),
            found: other.kind_name().to_string(),
        }
        .into()),
    }
}

/// Check an already validated value against another declared kind
///
/// Elements of adopted collections were validated against the element kind
/// of the collection they came from, which may differ from `kind`.
fn accept_field_value(kind: &FieldKind, value: FieldValue, at: &str) -> Result<FieldValue, SystemError> {
    match (kind.strip_optional(), value) {
        (_, FieldValue::Null) => coerce(kind, &Value::Null, at),
        (_, FieldValue::Scalar(raw)) => coerce(kind, &raw, at),
        (_, FieldValue::Record(record)) => accept_record(kind, record, at)
            .map(FieldValue::Record)
            .map_err(Into::into),
        (FieldKind::List(inner), FieldValue::List(items)) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| accept_field_value(inner, item, &format!("{at}[{i}]")))
            .collect::<Result<Vec<_>, _>>()
            .map(FieldValue::List),
        (FieldKind::Dict(inner), FieldValue::Dict(map)) => map
            .into_iter()
            .map(|(key, item)| {
                let item = accept_field_value(inner, item, &format!("{at}['{key}']"))?;
                Ok((key, item))
            })
            .collect::<Result<IndexMap<_, _>, SystemError>>()
            .map(FieldValue::Dict),
        (FieldKind::Scalar(ScalarKind::Any), value) => Ok(value),
        (_, other) => Err(ValidationError::TypeMismatch {
            at: at.to_string(),
            expected: kind.describe(),
            found: other.kind_name().to_string(),
        }
        .into()),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn scalar(kind: ScalarKind, raw: &Value, at: &str) -> Result<Value, ValidationError> {
    match kind {
        ScalarKind::Any => Ok(raw.clone()),
        ScalarKind::Bool if raw.is_boolean() => Ok(raw.clone()),
        ScalarKind::Int if raw.is_i64() || raw.is_u64() => Ok(raw.clone()),
        ScalarKind::Int => match raw.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Value::from(f as i64)),
            _ => Err(mismatch(at, kind.name(), raw)),
        },
        ScalarKind::Float => raw
            .as_f64()
            .map(Value::from)
            .ok_or_else(|| mismatch(at, kind.name(), raw)),
        ScalarKind::Str if raw.is_string() => Ok(raw.clone()),
        _ => Err(mismatch(at, kind.name(), raw)),
    }
}

struct Coercer<'s> {
    settings: &'s Settings,
}

impl<'s> Coercer<'s> {
    fn new(settings: &'s Settings) -> Self {
        Self { settings }
    }

    fn value(&self, kind: &FieldKind, raw: &Value, at: &str) -> Result<FieldValue, SystemError> {
        match kind {
            FieldKind::Optional(inner) => {
                if raw.is_null() {
                    Ok(FieldValue::Null)
                } else {
                    self.value(inner, raw, at)
                }
            }
            FieldKind::Scalar(kind) => Ok(FieldValue::Scalar(scalar(*kind, raw, at)?)),
            FieldKind::Record(ty) => self.record(ty, raw, at).map(FieldValue::Record),
            FieldKind::Union(members) => self.union(kind, members, raw, at),
            FieldKind::InstanceOf(base) => self.instance_of(kind, base, raw, at),
            FieldKind::List(inner) => {
                let items = raw.as_array().ok_or_else(|| mismatch(at, kind.describe(), raw))?;
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.value(inner, item, &format!("{at}[{i}]")))
                    .collect::<Result<Vec<_>, _>>()
                    .map(FieldValue::List)
            }
            FieldKind::Dict(inner) => {
                let map = raw.as_object().ok_or_else(|| mismatch(at, kind.describe(), raw))?;
                map.iter()
                    .map(|(key, item)| {
                        let value = self.value(inner, item, &format!("{at}['{key}']"))?;
                        Ok((key.clone(), value))
                    })
                    .collect::<Result<IndexMap<_, _>, SystemError>>()
                    .map(FieldValue::Dict)
            }
        }
    }

    /// Record type named by the discriminator entry, if present
    fn discriminated(
        &self,
        map: &Map<String, Value>,
        at: &str,
    ) -> Result<Option<Arc<RecordType>>, SystemError> {
        let Some(raw) = map.get(&self.settings.discriminator_key) else {
            return Ok(None);
        };
        let name = raw.as_str().ok_or_else(|| {
            mismatch(
                &format!("{at}.{}", self.settings.discriminator_key),
                "str",
                raw,
            )
        })?;
        let ty = registry::lookup(name)?;
        tracing::trace!(at, name, "discriminator selected record type");
        Ok(Some(ty))
    }

    fn record(&self, ty: &Arc<RecordType>, raw: &Value, at: &str) -> Result<Record, SystemError> {
        let map = raw.as_object().ok_or_else(|| mismatch(at, ty.name(), raw))?;
        match self.discriminated(map, at)? {
            Some(named) if !named.extends(ty) => Err(ValidationError::NotASubtype {
                at: at.to_string(),
                name: named.name().to_string(),
                expected: ty.name().to_string(),
            }
            .into()),
            Some(named) => self.record_from_map(&named, map, at),
            None => self.record_from_map(ty, map, at),
        }
    }

    fn union(
        &self,
        kind: &FieldKind,
        members: &[Arc<RecordType>],
        raw: &Value,
        at: &str,
    ) -> Result<FieldValue, SystemError> {
        if let Some(map) = raw.as_object() {
            if let Some(named) = self.discriminated(map, at)? {
                if !members.iter().any(|m| named.extends(m)) {
                    return Err(ValidationError::NotASubtype {
                        at: at.to_string(),
                        name: named.name().to_string(),
                        expected: kind.describe(),
                    }
                    .into());
                }
                return self.record_from_map(&named, map, at).map(FieldValue::Record);
            }
        }
        self.first_match(members.iter().cloned(), raw, at)
    }

    fn instance_of(
        &self,
        kind: &FieldKind,
        base: &Arc<RecordType>,
        raw: &Value,
        at: &str,
    ) -> Result<FieldValue, SystemError> {
        if let Some(map) = raw.as_object() {
            if let Some(named) = self.discriminated(map, at)? {
                if !named.extends(base) {
                    return Err(ValidationError::NotASubtype {
                        at: at.to_string(),
                        name: named.name().to_string(),
                        expected: kind.describe(),
                    }
                    .into());
                }
                return self.record_from_map(&named, map, at).map(FieldValue::Record);
            }
        }
        let candidates = registry::global().read().candidates(base);
        self.first_match(candidates.into_iter(), raw, at)
    }

    /// First candidate the value validates against, in iteration order
    fn first_match(
        &self,
        candidates: impl Iterator<Item = Arc<RecordType>>,
        raw: &Value,
        at: &str,
    ) -> Result<FieldValue, SystemError> {
        let mut attempts = Vec::new();
        for member in candidates {
            match self.record(&member, raw, at) {
                Ok(record) => {
                    tracing::trace!(at, member = %member.name(), "member matched");
                    return Ok(FieldValue::Record(record));
                }
                Err(err) => attempts.push(MemberAttempt {
                    member: member.name().to_string(),
                    reason: err.to_string(),
                }),
            }
        }
        Err(ValidationError::NoMatchingMember {
            at: at.to_string(),
            attempts,
        }
        .into())
    }

    fn record_from_map(
        &self,
        ty: &Arc<RecordType>,
        map: &Map<String, Value>,
        at: &str,
    ) -> Result<Record, SystemError> {
        let mut values = IndexMap::with_capacity(map.len());
        for spec in ty.fields() {
            let field_at = format!("{at}.{}", spec.name());
            let value = match map.get(spec.name()) {
                Some(raw) => self.value(spec.kind(), raw, &field_at)?,
                None => spec
                    .fresh_default(&field_at)?
                    .ok_or_else(|| ValidationError::Missing {
                        at: at.to_string(),
                        field: spec.name().to_string(),
                    })?,
            };
            values.insert(spec.name().to_string(), value);
        }

        let mut setup = None;
        for (key, raw) in map {
            if ty.field(key).is_some() || *key == self.settings.discriminator_key {
                continue;
            }
            if *key == self.settings.setup_key {
                setup = Some(raw);
                continue;
            }
            match ty.extra_policy() {
                ExtraPolicy::Forbid => {
                    return Err(ValidationError::UnknownField {
                        at: at.to_string(),
                        record: ty.name().to_string(),
                        field: key.clone(),
                    }
                    .into())
                }
                ExtraPolicy::Allow => {
                    let value = self.extra(raw, &format!("{at}.{key}"))?;
                    values.insert(key.clone(), value);
                }
            }
        }

        let record = Record::from_parts(Arc::clone(ty), values);
        match setup {
            Some(raw) => {
                tracing::debug!(at, record = %ty.name(), "applying construction-time setup");
                record.with_setup(&Setup::from_value(raw)?)
            }
            None => Ok(record),
        }
    }

    /// Extra entry: a discriminated mapping becomes a record, anything else
    /// is kept as is
    fn extra(&self, raw: &Value, at: &str) -> Result<FieldValue, SystemError> {
        if let Some(map) = raw.as_object() {
            if let Some(named) = self.discriminated(map, at)? {
                return self.record_from_map(&named, map, at).map(FieldValue::Record);
            }
        }
        Ok(FieldValue::Scalar(raw.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_coercion() {
        assert_eq!(scalar(ScalarKind::Float, &json!(3), "x").unwrap(), json!(3.0));
        assert_eq!(scalar(ScalarKind::Int, &json!(4.0), "x").unwrap(), json!(4));
        assert!(scalar(ScalarKind::Int, &json!(4.5), "x").is_err());
        assert!(scalar(ScalarKind::Int, &Value::from(2f64.powi(63)), "x").is_err());
        assert_eq!(
            scalar(ScalarKind::Int, &Value::from(2f64.powi(62)), "x").unwrap(),
            json!(1_i64 << 62)
        );
        assert!(scalar(ScalarKind::Str, &json!(1), "x").is_err());
        assert_eq!(scalar(ScalarKind::Any, &json!([1]), "x").unwrap(), json!([1]));
    }

    #[test]
    fn mismatch_reports_location() {
        let err = coerce(&FieldKind::list_of(FieldKind::INT), &json!([1, "two"]), "T.l")
            .unwrap_err();
        match err {
            SystemError::Validation(ValidationError::TypeMismatch { at, expected, found }) => {
                assert_eq!(at, "T.l[1]");
                assert_eq!(expected, "int");
                assert_eq!(found, "str");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn optional_accepts_null() {
        let kind = FieldKind::optional(FieldKind::INT);
        assert!(coerce(&kind, &Value::Null, "x").unwrap().is_null());
        assert_eq!(coerce(&kind, &json!(2), "x").unwrap().to_value(), json!(2));
    }

    #[test]
    fn closed_record_rejects_unknown_field() {
        let ty = RecordType::builder("Closed")
            .field(crate::FieldSpec::new("a", FieldKind::INT).with_default(1))
            .finish();
        let err = record_from_value(&ty, &json!({"b": 2}), "Closed").unwrap_err();
        assert!(matches!(
            err,
            SystemError::Validation(ValidationError::UnknownField { .. })
        ));
    }

    #[test]
    fn open_record_keeps_extras() {
        let ty = RecordType::builder("Open").allow_extra().finish();
        let record = record_from_value(&ty, &json!({"b": 2}), "Open").unwrap();
        assert_eq!(record.to_value(), json!({"b": 2}));
        assert_eq!(record.extras().count(), 1);
    }

    #[test]
    fn union_failure_lists_each_member() {
        let a = RecordType::builder("A")
            .field(crate::FieldSpec::required("x", FieldKind::INT))
            .finish();
        let b = RecordType::builder("B")
            .field(crate::FieldSpec::required("y", FieldKind::STR))
            .finish();
        let kind = FieldKind::union(&[&a, &b]);
        let err = coerce(&kind, &json!({"z": 1}), "M.f").unwrap_err();
        match err {
            SystemError::Validation(ValidationError::NoMatchingMember { attempts, .. }) => {
                let members: Vec<_> = attempts.iter().map(|a| a.member.as_str()).collect();
                assert_eq!(members, ["A", "B"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn union_picks_first_validating_member() {
        let a = RecordType::builder("A")
            .field(crate::FieldSpec::required("x", FieldKind::INT))
            .finish();
        let b = RecordType::builder("B")
            .field(crate::FieldSpec::required("y", FieldKind::STR))
            .finish();
        let kind = FieldKind::union(&[&a, &b]);
        let value = coerce(&kind, &json!({"y": "yes"}), "M.f").unwrap();
        let record = value.as_record().unwrap();
        assert!(Arc::ptr_eq(record.record_type(), &b));
    }
}
