//! Records
//!
//! A [`Record`] is a validated, defaulted value of some [`RecordType`]. It is
//! immutable by convention: the public API only produces new records
//! ([`Record::with`], [`Record::with_setup`], [`Record::merged`]). Runtime
//! mutation goes through [`Node`](crate::Node) and its mutation guard.

use std::fmt::{self, Debug, Formatter};
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::built::{BuildContext, Built};
use crate::coerce;
use crate::error::{BuildError, LookupError, SystemError, ValidationError};
use crate::node::Node;
use crate::patch::{self, Setup};
use crate::schema::{Factory, RecordType};

/// Validated field value
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// Absent optional value
    Null,

    /// Plain value
    Scalar(Value),

    /// Nested record
    Record(Record),

    /// Ordered collection
    List(Vec<FieldValue>),

    /// Keyed collection
    Dict(IndexMap<String, FieldValue>),
}

impl FieldValue {
    /// Check for [`FieldValue::Null`]
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Nested record, if this is one
    #[inline]
    #[must_use]
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Plain value, if this is one
    #[inline]
    #[must_use]
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// Short kind name used in diagnostics
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Scalar(_) => "a value",
            Self::Record(_) => "a record",
            Self::List(_) => "a list",
            Self::Dict(_) => "a dict",
        }
    }

    /// Render to a plain value
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Scalar(value) => value.clone(),
            Self::Record(record) => record.to_value(),
            Self::List(items) => Value::Array(items.iter().map(Self::to_value).collect()),
            Self::Dict(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_value()))
                    .collect(),
            ),
        }
    }
}

/// Anything that can be assigned to a field or collection slot
#[derive(Debug, Clone)]
pub enum FieldInput {
    /// Raw value, coerced to the declared kind
    Raw(Value),

    /// Record, checked against the declared kind
    Record(Record),

    /// Already built value, adopted as is
    Built(Built),
}

impl From<Value> for FieldInput {
    fn from(value: Value) -> Self {
        Self::Raw(value)
    }
}

impl From<Record> for FieldInput {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

impl From<Built> for FieldInput {
    fn from(built: Built) -> Self {
        Self::Built(built)
    }
}

impl From<Rc<Node>> for FieldInput {
    fn from(node: Rc<Node>) -> Self {
        Self::Built(Built::Node(node))
    }
}

macro_rules! raw_input_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for FieldInput {
                fn from(value: $ty) -> Self {
                    Self::Raw(Value::from(value))
                }
            }
        )*
    };
}

raw_input_from!(bool, i32, i64, u32, u64, f64, &str, String);

/// Validated value of a record type
#[derive(Clone)]
pub struct Record {
    ty: Arc<RecordType>,
    values: IndexMap<String, FieldValue>,
}

impl Record {
    pub(crate) fn from_parts(ty: Arc<RecordType>, values: IndexMap<String, FieldValue>) -> Self {
        Self { ty, values }
    }

    /// Record type
    #[inline]
    #[must_use]
    pub fn record_type(&self) -> &Arc<RecordType> {
        &self.ty
    }

    /// Check if the record type is `ty` or derives from it
    #[inline]
    #[must_use]
    pub fn is_instance_of(&self, ty: &RecordType) -> bool {
        self.ty.extends(ty)
    }

    /// Field value by name
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    /// Plain value of a field
    #[inline]
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name).and_then(FieldValue::as_scalar)
    }

    /// Nested record of a field
    #[inline]
    #[must_use]
    pub fn record(&self, name: &str) -> Option<&Record> {
        self.values.get(name).and_then(FieldValue::as_record)
    }

    /// Fields and extra entries in order
    #[inline]
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Entries not declared by the record type
    pub fn extras(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields().filter(|(name, _)| self.ty.field(name).is_none())
    }

    /// Copy with one field replaced
    ///
    /// # Errors
    /// Returns error if the value does not fit the field
    pub fn with(mut self, name: &str, input: impl Into<FieldInput>) -> Result<Self, SystemError> {
        let at = format!("{}.{name}", self.ty.name());
        self.assign(name, input.into(), &at)?;
        Ok(self)
    }

    /// Copy with several fields replaced from a raw mapping
    ///
    /// # Errors
    /// Returns error if `overrides` is not a mapping or a value does not fit
    pub fn merged(&self, overrides: &Value) -> Result<Self, SystemError> {
        let map = overrides
            .as_object()
            .ok_or_else(|| ValidationError::TypeMismatch {
                at: self.ty.name().to_string(),
                expected: "mapping".to_string(),
                found: coerce::value_kind(overrides).to_string(),
            })?;
        let mut record = self.clone();
        for (name, raw) in map {
            let at = format!("{}.{name}", self.ty.name());
            record.assign(name, FieldInput::Raw(raw.clone()), &at)?;
        }
        Ok(record)
    }

    /// Copy with a setup patch applied
    ///
    /// Setup assignment is authorized post-construction configuration and
    /// does not consult the mutation policy.
    ///
    /// # Errors
    /// Returns error if a path does not resolve or a value does not fit
    pub fn with_setup(mut self, setup: &Setup) -> Result<Self, SystemError> {
        patch::apply_to_record(&mut self, setup)?;
        Ok(self)
    }

    /// Build as a root
    ///
    /// # Errors
    /// Returns error if the record type cannot be built
    pub fn build(&self) -> Result<Built, SystemError> {
        self.build_in(&BuildContext::root())
    }

    /// Build as a root and expect a node
    ///
    /// # Errors
    /// Returns error if the record type cannot be built or does not build a node
    pub fn build_node(&self) -> Result<Rc<Node>, SystemError> {
        match self.build()? {
            Built::Node(node) => Ok(node),
            other => Err(LookupError::WrongKind {
                path: String::new(),
                expected: "a node",
                found: other.kind_name(),
            }
            .into()),
        }
    }

    /// Build at the position described by `ctx`
    ///
    /// # Errors
    /// Returns error if the record type cannot be built or the factory fails
    pub fn build_in(&self, ctx: &BuildContext) -> Result<Built, SystemError> {
        tracing::debug!(record = %self.ty.name(), path = %ctx.path(), "building record");
        match self.ty.factory() {
            Factory::Unbuildable => Err(BuildError::NotBuildable {
                record: self.ty.name().to_string(),
            }
            .into()),
            Factory::Node => Ok(Built::Node(Node::new(self.clone(), ctx.link().clone()))),
            Factory::Custom(build) => build(self, ctx),
        }
    }

    /// Render to a plain value
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(name, value)| (name.clone(), value.to_value()))
                .collect(),
        )
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut FieldValue> {
        self.values.get_mut(name)
    }

    pub(crate) fn insert(&mut self, name: &str, value: FieldValue) {
        self.values.insert(name.to_string(), value);
    }

    pub(crate) fn assign(
        &mut self,
        name: &str,
        input: FieldInput,
        at: &str,
    ) -> Result<(), SystemError> {
        let value = coerce::field_input(&self.ty, name, input, at)?;
        self.insert(name, value);
        Ok(())
    }

    /// Names of entries that build into sub-trees, in order
    pub(crate) fn factory_names(&self) -> Vec<String> {
        self.values
            .iter()
            .filter(|(name, value)| {
                !value.is_null()
                    && match self.ty.field(name) {
                        Some(spec) => spec.is_factory(),
                        None => matches!(value, FieldValue::Record(_)),
                    }
            })
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl Debug for Record {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.ty.name());
        for (name, value) in &self.values {
            s.field(name, value);
        }
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldKind, FieldSpec};
    use serde_json::json;

    fn room() -> Arc<RecordType> {
        RecordType::builder("Room")
            .field(FieldSpec::new("width", FieldKind::FLOAT).with_default(1.0))
            .field(FieldSpec::new("height", FieldKind::FLOAT).with_default(1.0))
            .finish()
    }

    #[test]
    fn record_with_replaces_one_field() {
        let record = room().default_record().unwrap().with("width", 4).unwrap();
        assert_eq!(record.value("width"), Some(&json!(4.0)));
        assert_eq!(record.value("height"), Some(&json!(1.0)));
    }

    #[test]
    fn record_with_unknown_field_fails() {
        let err = room()
            .default_record()
            .unwrap()
            .with("depth", 4)
            .unwrap_err();
        assert!(matches!(
            err,
            SystemError::Validation(ValidationError::UnknownField { .. })
        ));
    }

    #[test]
    fn record_merged_leaves_original() {
        let original = room().default_record().unwrap();
        let merged = original.merged(&json!({"height": 2})).unwrap();
        assert_eq!(merged.value("height"), Some(&json!(2.0)));
        assert_eq!(original.value("height"), Some(&json!(1.0)));
    }

    #[test]
    fn unbuildable_record_fails_to_build() {
        let base = RecordType::builder("BaseConfig").unbuildable().finish();
        let record = base.default_record().unwrap();
        let err = record.build().unwrap_err();
        assert!(matches!(err, SystemError::Build(BuildError::NotBuildable { .. })));
    }

    #[test]
    fn custom_factory_builds_plain_value() {
        let ty = RecordType::builder("Scaled")
            .field(FieldSpec::new("num", FieldKind::INT).with_default(10))
            .field(FieldSpec::required("scale", FieldKind::FLOAT))
            .build_with(|record, _| {
                let num = record.value("num").and_then(Value::as_f64).unwrap_or(0.0);
                let scale = record.value("scale").and_then(Value::as_f64).unwrap_or(0.0);
                Ok(Built::Value(json!(num * scale)))
            })
            .finish();
        let record = ty.from_value(&json!({"num": 9, "scale": 9})).unwrap();
        assert_eq!(record.build().unwrap().as_value(), Some(&json!(81.0)));
    }

    #[test]
    fn node_building_record_wraps_itself() {
        let node = room()
            .from_value(&json!({"width": 3}))
            .unwrap()
            .build_node()
            .unwrap();
        assert_eq!(node.value("width").unwrap(), json!(3.0));
        assert_eq!(node.path(), "");
    }
}
