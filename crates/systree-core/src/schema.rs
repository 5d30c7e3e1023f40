//! Record types
//!
//! A [`RecordType`] is a static schema: an ordered field table plus the
//! per-type policies (open/closed, mutable/read-only) and the build
//! capability. Types are declared once through [`RecordTypeBuilder`] and
//! shared as `Arc<RecordType>`; type identity is pointer identity.
//!
//! # Schema composition
//!
//! [`RecordTypeBuilder::extends`] starts from the base type's field table.
//! Fields declared again on the derived type override the inherited entry in
//! place (most-derived wins, inherited order kept). Calling
//! [`RecordTypeBuilder::replace_schema`] discards the inherited fields
//! altogether while still keeping the base for subtype checks and
//! inherited policies.
//!
//! Fields come from two declaration sites: the schema body
//! ([`RecordTypeBuilder::field`]) and type-level sub-factory attributes
//! ([`RecordTypeBuilder::attribute`]). When both declare the same name the
//! body declaration wins and the attribute is dropped with a warning.
//!
//! Filter fields ([`RecordTypeBuilder::filter`]) are inherited the same way
//! and lose to a field of the same name.

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::built::{BuildContext, Built};
use crate::coerce;
use crate::error::SystemError;
use crate::field::{FieldKind, FieldSpec};
use crate::record::Record;
use crate::traverse::{Filter, Target};

/// Custom build function
pub type BuildFn = Arc<dyn Fn(&Record, &BuildContext) -> Result<Built, SystemError> + Send + Sync>;

/// Build capability of a record type
#[derive(Clone)]
pub enum Factory {
    /// Abstract record; building fails with a build error
    Unbuildable,

    /// Builds a node wrapping the record
    Node,

    /// Builds through a custom function
    Custom(BuildFn),
}

impl Debug for Factory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbuildable => f.write_str("Unbuildable"),
            Self::Node => f.write_str("Node"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Handling of fields a record type does not declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtraPolicy {
    /// Unknown fields are a validation error
    #[default]
    Forbid,

    /// Unknown fields are kept as extra entries
    Allow,
}

/// Static schema of a record
pub struct RecordType {
    name: String,
    base: Option<Arc<RecordType>>,
    fields: IndexMap<String, FieldSpec>,
    filters: IndexMap<String, Filter>,
    extra: ExtraPolicy,
    allow_mutation: bool,
    factory: Factory,
    produces: Option<Arc<RecordType>>,
}

impl RecordType {
    /// Start declaring a record type
    #[inline]
    #[must_use]
    pub fn builder(name: impl Into<String>) -> RecordTypeBuilder {
        RecordTypeBuilder::new(name)
    }

    /// Type name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base type, if any
    #[inline]
    #[must_use]
    pub fn base(&self) -> Option<&Arc<RecordType>> {
        self.base.as_ref()
    }

    /// Fields in declaration order
    #[inline]
    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.values()
    }

    /// Field by name
    #[inline]
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    /// Filter field by name
    #[inline]
    #[must_use]
    pub fn filter(&self, name: &str) -> Option<&Filter> {
        self.filters.get(name)
    }

    /// Filter field names in declaration order
    pub fn filter_names(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(String::as_str)
    }

    /// Extra field policy
    #[inline]
    #[must_use]
    pub fn extra_policy(&self) -> ExtraPolicy {
        self.extra
    }

    /// Check if nodes of this type accept direct field assignment
    #[inline]
    #[must_use]
    pub fn allows_mutation(&self) -> bool {
        self.allow_mutation
    }

    /// Build capability
    #[inline]
    #[must_use]
    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    /// Check if records of this type can be built
    #[inline]
    #[must_use]
    pub fn is_buildable(&self) -> bool {
        !matches!(self.factory, Factory::Unbuildable)
    }

    /// Node type produced by building records of this type
    ///
    /// Node-building types produce themselves; custom factories produce
    /// whatever they declared with [`RecordTypeBuilder::produces`].
    #[must_use]
    pub fn produced_type(self: &Arc<Self>) -> Option<Arc<RecordType>> {
        match (&self.factory, &self.produces) {
            (_, Some(produced)) => Some(Arc::clone(produced)),
            (Factory::Node, None) => Some(Arc::clone(self)),
            _ => None,
        }
    }

    /// Check if building records of this type yields nodes
    #[inline]
    #[must_use]
    pub fn produces_nodes(&self) -> bool {
        matches!(self.factory, Factory::Node) || self.produces.is_some()
    }

    /// Check if this type is `other` or derives from it
    #[must_use]
    pub fn extends(&self, other: &RecordType) -> bool {
        self.ancestors().any(|ty| std::ptr::eq(ty, other))
    }

    /// This type followed by its bases, most-derived first
    pub fn ancestors(&self) -> impl Iterator<Item = &RecordType> {
        std::iter::successors(Some(self), |ty| ty.base.as_deref())
    }

    /// Record with every field defaulted
    ///
    /// # Errors
    /// Returns error if a field is required
    pub fn default_record(self: &Arc<Self>) -> Result<Record, SystemError> {
        self.from_value(&Value::Object(serde_json::Map::new()))
    }

    /// Record from a raw mapping
    ///
    /// A discriminator naming a registered subtype selects that subtype.
    ///
    /// # Errors
    /// Returns error if the value does not validate
    pub fn from_value(self: &Arc<Self>, raw: &Value) -> Result<Record, SystemError> {
        coerce::record_from_value(self, raw, &self.name)
    }

    /// Declared fields that build into sub-trees matching any target
    ///
    /// Nothing is built; the decision is made on declared kinds only.
    pub fn find_factories<'a>(
        &'a self,
        targets: &'a [Target],
    ) -> impl Iterator<Item = &'a FieldSpec> + 'a {
        self.fields
            .values()
            .filter(|spec| targets.iter().any(|t| t.matches_kind(spec.kind())))
    }

    /// Check if `name` is a declared sub-factory field
    #[inline]
    #[must_use]
    pub fn has_factory(&self, name: &str) -> bool {
        self.fields.get(name).is_some_and(FieldSpec::is_factory)
    }
}

impl Debug for RecordType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordType")
            .field("name", &self.name)
            .field("base", &self.base.as_ref().map(|b| b.name()))
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .field("extra", &self.extra)
            .field("allow_mutation", &self.allow_mutation)
            .field("factory", &self.factory)
            .finish()
    }
}

/// Builder for [`RecordType`]
#[derive(Debug)]
pub struct RecordTypeBuilder {
    name: String,
    base: Option<Arc<RecordType>>,
    inherit_fields: bool,
    body: IndexMap<String, FieldSpec>,
    attributes: IndexMap<String, FieldSpec>,
    filters: IndexMap<String, Filter>,
    extra: Option<ExtraPolicy>,
    allow_mutation: Option<bool>,
    factory: Option<Factory>,
    produces: Option<Arc<RecordType>>,
}

impl RecordTypeBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: None,
            inherit_fields: true,
            body: IndexMap::new(),
            attributes: IndexMap::new(),
            filters: IndexMap::new(),
            extra: None,
            allow_mutation: None,
            factory: None,
            produces: None,
        }
    }

    /// Derive from `base`, inheriting its fields and policies
    #[inline]
    #[must_use]
    pub fn extends(mut self, base: &Arc<RecordType>) -> Self {
        self.base = Some(Arc::clone(base));
        self
    }

    /// Drop the inherited field table
    #[inline]
    #[must_use]
    pub fn replace_schema(mut self) -> Self {
        self.inherit_fields = false;
        self
    }

    /// Declare a field in the schema body
    #[inline]
    #[must_use]
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.body.insert(spec.name().to_string(), spec);
        self
    }

    /// Declare a type-level sub-factory attribute
    #[inline]
    #[must_use]
    pub fn attribute(mut self, spec: FieldSpec) -> Self {
        self.attributes.insert(spec.name().to_string(), spec);
        self
    }

    /// Declare a filter field collecting `targets` below the node, down to
    /// `depth` (negative for unbounded)
    #[inline]
    #[must_use]
    pub fn filter(
        mut self,
        name: impl Into<String>,
        targets: impl IntoIterator<Item = Target>,
        depth: i32,
    ) -> Self {
        self.filters.insert(name.into(), Filter::new(targets, depth));
        self
    }

    /// Keep undeclared fields instead of rejecting them
    #[inline]
    #[must_use]
    pub fn allow_extra(mut self) -> Self {
        self.extra = Some(ExtraPolicy::Allow);
        self
    }

    /// Allow or forbid direct field assignment on built nodes
    #[inline]
    #[must_use]
    pub fn allow_mutation(mut self, allow: bool) -> Self {
        self.allow_mutation = Some(allow);
        self
    }

    /// Build records through a custom function
    #[inline]
    #[must_use]
    pub fn build_with(
        mut self,
        f: impl Fn(&Record, &BuildContext) -> Result<Built, SystemError> + Send + Sync + 'static,
    ) -> Self {
        self.factory = Some(Factory::Custom(Arc::new(f)));
        self
    }

    /// Mark records of this type as not buildable
    #[inline]
    #[must_use]
    pub fn unbuildable(mut self) -> Self {
        self.factory = Some(Factory::Unbuildable);
        self
    }

    /// Build records into plain nodes
    #[inline]
    #[must_use]
    pub fn builds_nodes(mut self) -> Self {
        self.factory = Some(Factory::Node);
        self
    }

    /// Declare the node type a custom factory produces
    #[inline]
    #[must_use]
    pub fn produces(mut self, system: &Arc<RecordType>) -> Self {
        self.produces = Some(Arc::clone(system));
        self
    }

    /// Finish the declaration
    #[must_use]
    pub fn finish(self) -> Arc<RecordType> {
        let Self {
            name,
            base,
            inherit_fields,
            body,
            attributes,
            filters: declared_filters,
            extra,
            allow_mutation,
            factory,
            produces,
        } = self;

        let mut fields = match base.as_deref() {
            Some(base) if inherit_fields => base.fields.clone(),
            _ => IndexMap::new(),
        };
        let shadowed: Vec<String> = attributes
            .keys()
            .filter(|field| body.contains_key(*field))
            .cloned()
            .collect();

        fields.extend(body);
        for (field, spec) in attributes {
            if shadowed.contains(&field) {
                tracing::warn!(
                    record = %name,
                    field = %field,
                    "schema body declaration shadows type-level attribute"
                );
                continue;
            }
            fields.insert(field, spec);
        }

        let mut filters = match base.as_deref() {
            Some(base) if inherit_fields => base.filters.clone(),
            _ => IndexMap::new(),
        };
        filters.extend(declared_filters);
        filters.retain(|field, _| {
            let shadowed = fields.contains_key(field);
            if shadowed {
                tracing::warn!(record = %name, field = %field, "field declaration shadows filter");
            }
            !shadowed
        });

        let inherited = base.as_deref();
        let extra = extra.or_else(|| inherited.map(|b| b.extra)).unwrap_or_default();
        let allow_mutation = allow_mutation
            .or_else(|| inherited.map(|b| b.allow_mutation))
            .unwrap_or(false);
        let factory = factory
            .or_else(|| inherited.map(|b| b.factory.clone()))
            .unwrap_or(Factory::Node);

        tracing::trace!(record = %name, fields = fields.len(), "declared record type");

        Arc::new(RecordType {
            name,
            base,
            fields,
            filters,
            extra,
            allow_mutation,
            factory,
            produces,
        })
    }
}
