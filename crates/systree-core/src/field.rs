//! Field metadata
//!
//! A [`FieldSpec`] names a field, declares its [`FieldKind`] and says how a
//! missing value is defaulted. Defaults are produced fresh for every record
//! constructed, so collection defaults are never shared between records.

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coerce;
use crate::error::SystemError;
use crate::record::{FieldValue, Record};
use crate::schema::RecordType;

/// Plain value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    /// Any plain value, stored as given
    Any,
    /// `true` / `false`
    Bool,
    /// Integer (floats without fraction are accepted)
    Int,
    /// Float (integers are widened)
    Float,
    /// String
    Str,
}

impl ScalarKind {
    /// Human readable name used in diagnostics
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
        }
    }
}

/// Declared type of a field
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Plain value
    Scalar(ScalarKind),

    /// Nested record of the given type (or a registered subtype)
    Record(Arc<RecordType>),

    /// One of the listed record types
    Union(Vec<Arc<RecordType>>),

    /// Any registered record type extending the given base
    InstanceOf(Arc<RecordType>),

    /// Ordered collection of elements
    List(Box<FieldKind>),

    /// String-keyed collection of elements
    Dict(Box<FieldKind>),

    /// Value or null
    Optional(Box<FieldKind>),
}

impl FieldKind {
    /// Any plain value
    pub const ANY: Self = Self::Scalar(ScalarKind::Any);
    /// Boolean
    pub const BOOL: Self = Self::Scalar(ScalarKind::Bool);
    /// Integer
    pub const INT: Self = Self::Scalar(ScalarKind::Int);
    /// Float
    pub const FLOAT: Self = Self::Scalar(ScalarKind::Float);
    /// String
    pub const STR: Self = Self::Scalar(ScalarKind::Str);

    /// Nested record
    #[inline]
    #[must_use]
    pub fn record(ty: &Arc<RecordType>) -> Self {
        Self::Record(Arc::clone(ty))
    }

    /// Union of record types, tried in the given order
    #[inline]
    #[must_use]
    pub fn union(members: &[&Arc<RecordType>]) -> Self {
        Self::Union(members.iter().map(|m| Arc::clone(m)).collect())
    }

    /// Any registered subtype of `base`
    #[inline]
    #[must_use]
    pub fn instance_of(base: &Arc<RecordType>) -> Self {
        Self::InstanceOf(Arc::clone(base))
    }

    /// Ordered collection
    #[inline]
    #[must_use]
    pub fn list_of(element: Self) -> Self {
        Self::List(Box::new(element))
    }

    /// Keyed collection
    #[inline]
    #[must_use]
    pub fn dict_of(element: Self) -> Self {
        Self::Dict(Box::new(element))
    }

    /// Nullable
    #[inline]
    #[must_use]
    pub fn optional(inner: Self) -> Self {
        Self::Optional(Box::new(inner))
    }

    /// Check if values of this kind build into sub-trees
    #[must_use]
    pub fn is_factory(&self) -> bool {
        match self {
            Self::Scalar(_) => false,
            Self::Record(_) | Self::Union(_) | Self::InstanceOf(_) | Self::List(_) | Self::Dict(_) => {
                true
            }
            Self::Optional(inner) => inner.is_factory(),
        }
    }

    /// Human readable description used in diagnostics
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Scalar(kind) => kind.name().to_string(),
            Self::Record(ty) => ty.name().to_string(),
            Self::Union(members) => {
                let names: Vec<_> = members.iter().map(|m| m.name()).collect();
                format!("Union[{}]", names.join(" | "))
            }
            Self::InstanceOf(base) => format!("InstanceOf[{}]", base.name()),
            Self::List(inner) => format!("List[{}]", inner.describe()),
            Self::Dict(inner) => format!("Dict[str, {}]", inner.describe()),
            Self::Optional(inner) => format!("Optional[{}]", inner.describe()),
        }
    }

    /// Element kind of a collection kind, [`FieldKind::ANY`] otherwise
    pub(crate) fn element_kind(&self) -> Self {
        match self {
            Self::List(inner) | Self::Dict(inner) => (**inner).clone(),
            Self::Optional(inner) => inner.element_kind(),
            _ => Self::ANY,
        }
    }

    /// Declared kind with any optional wrapper removed
    pub(crate) fn strip_optional(&self) -> &Self {
        match self {
            Self::Optional(inner) => inner.strip_optional(),
            other => other,
        }
    }

    /// Default used when a field declares none
    ///
    /// Collections start empty, optionals start null and nested records
    /// start from their own defaults. Everything else is required.
    fn implicit_default(&self) -> FieldDefault {
        match self {
            Self::Optional(_) => FieldDefault::Raw(Value::Null),
            Self::List(_) => FieldDefault::factory(|| FieldValue::List(Vec::new())),
            Self::Dict(_) => FieldDefault::factory(|| FieldValue::Dict(IndexMap::new())),
            Self::Record(_) => FieldDefault::Raw(Value::Object(serde_json::Map::new())),
            Self::Scalar(_) | Self::Union(_) | Self::InstanceOf(_) => FieldDefault::Required,
        }
    }
}

/// Producer of a fresh default value
pub type DefaultFn = Arc<dyn Fn() -> FieldValue + Send + Sync>;

/// How a missing field value is produced
#[derive(Clone)]
pub enum FieldDefault {
    /// No default; the field must be given
    Required,

    /// Raw value coerced anew for every record
    Raw(Value),

    /// Record template, cloned for every record
    Record(Record),

    /// Closure called for every record
    Factory(DefaultFn),
}

impl FieldDefault {
    /// Default produced by a closure
    #[inline]
    pub fn factory(f: impl Fn() -> FieldValue + Send + Sync + 'static) -> Self {
        Self::Factory(Arc::new(f))
    }
}

impl Debug for FieldDefault {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => f.write_str("Required"),
            Self::Raw(value) => f.debug_tuple("Raw").field(value).finish(),
            Self::Record(record) => f.debug_tuple("Record").field(record).finish(),
            Self::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Per-field metadata
#[derive(Debug, Clone)]
pub struct FieldSpec {
    name: String,
    kind: FieldKind,
    default: FieldDefault,
    doc: Option<String>,
}

impl FieldSpec {
    /// Field with the kind's implicit default
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let default = kind.implicit_default();
        Self {
            name: name.into(),
            kind,
            default,
            doc: None,
        }
    }

    /// Field without a default
    #[must_use]
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            default: FieldDefault::Required,
            ..Self::new(name, kind)
        }
    }

    /// With a raw default, coerced for each new record
    #[inline]
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = FieldDefault::Raw(value.into());
        self
    }

    /// With a record template as default
    #[inline]
    #[must_use]
    pub fn with_record_default(mut self, record: Record) -> Self {
        self.default = FieldDefault::Record(record);
        self
    }

    /// With a default-producing closure
    #[inline]
    #[must_use]
    pub fn with_default_fn(mut self, f: impl Fn() -> FieldValue + Send + Sync + 'static) -> Self {
        self.default = FieldDefault::factory(f);
        self
    }

    /// With documentation
    #[inline]
    #[must_use]
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Field name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Default policy
    #[inline]
    #[must_use]
    pub fn default(&self) -> &FieldDefault {
        &self.default
    }

    /// Documentation
    #[inline]
    #[must_use]
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Check if the field must be given
    #[inline]
    #[must_use]
    pub fn is_required(&self) -> bool {
        matches!(self.default, FieldDefault::Required)
    }

    /// Check if the field builds into a sub-tree
    #[inline]
    #[must_use]
    pub fn is_factory(&self) -> bool {
        self.kind.is_factory()
    }

    /// Produce a fresh default value, `None` if the field is required
    pub(crate) fn fresh_default(&self, at: &str) -> Result<Option<FieldValue>, SystemError> {
        match &self.default {
            FieldDefault::Required => Ok(None),
            FieldDefault::Raw(raw) => coerce::coerce(&self.kind, raw, at).map(Some),
            FieldDefault::Record(record) => Ok(Some(FieldValue::Record(record.clone()))),
            FieldDefault::Factory(f) => Ok(Some(f())),
        }
    }
}
