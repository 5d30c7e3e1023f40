//! Built nodes
//!
//! A [`Node`] wraps the record it was built from. Sub-factory fields are
//! built on first access and cached until the field is reassigned,
//! invalidated or the node is reconfigured. Plain fields are read straight
//! from the record.

use std::cell::{Ref, RefCell};
use std::fmt::{self, Debug, Formatter};
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use systree_path::{NodePath, PathStep};

use crate::built::{resolve_path, BuildContext, Built, ParentLink};
use crate::coerce;
use crate::collection::{NodeDict, NodeList};
use crate::error::{LookupError, MutationError, SystemError, ValidationError};
use crate::field::FieldKind;
use crate::record::{FieldInput, FieldValue, Record};
use crate::schema::{ExtraPolicy, RecordType};
use crate::traverse::{self, Filter, Find, Target};

/// Build a field value at the position described by `ctx`
///
/// Records go through their factory, collections become node collections
/// over `kind`'s element kind. Plain values are returned as they are.
pub(crate) fn build_value(
    value: &FieldValue,
    kind: &FieldKind,
    ctx: &BuildContext,
) -> Result<Built, SystemError> {
    match value {
        FieldValue::Null => Ok(Built::Null),
        FieldValue::Scalar(raw) => Ok(Built::Value(raw.clone())),
        FieldValue::Record(record) => record.build_in(ctx),
        FieldValue::List(items) => Ok(Built::List(NodeList::new(
            kind.element_kind(),
            items.clone(),
            ctx.link().clone(),
        ))),
        FieldValue::Dict(map) => Ok(Built::Dict(NodeDict::new(
            kind.element_kind(),
            map.clone(),
            ctx.link().clone(),
        ))),
    }
}

fn plain(value: FieldValue) -> Built {
    match value {
        FieldValue::Null => Built::Null,
        FieldValue::Scalar(raw) => Built::Value(raw),
        other => Built::Value(other.to_value()),
    }
}

/// Runtime node built from a record
pub struct Node {
    record: RefCell<Record>,
    link: RefCell<ParentLink>,
    cache: RefCell<IndexMap<String, Built>>,
}

impl Node {
    /// Create a node for `record` placed at `link`
    #[must_use]
    pub fn new(record: Record, link: ParentLink) -> Rc<Self> {
        Rc::new(Self {
            record: RefCell::new(record),
            link: RefCell::new(link),
            cache: RefCell::new(IndexMap::new()),
        })
    }

    /// Record type of the wrapped record
    #[inline]
    #[must_use]
    pub fn record_type(&self) -> Arc<RecordType> {
        Arc::clone(self.record.borrow().record_type())
    }

    /// Wrapped record
    #[inline]
    pub fn record(&self) -> Ref<'_, Record> {
        self.record.borrow()
    }

    /// Check if the node's record type is `ty` or derives from it
    #[inline]
    #[must_use]
    pub fn is_instance_of(&self, ty: &RecordType) -> bool {
        self.record.borrow().is_instance_of(ty)
    }

    /// Link to the container this node was reached from
    #[inline]
    #[must_use]
    pub fn link(&self) -> ParentLink {
        self.link.borrow().clone()
    }

    pub(crate) fn set_link(&self, link: ParentLink) {
        *self.link.borrow_mut() = link;
    }

    /// Container this node was reached from
    #[must_use]
    pub fn parent(&self) -> Option<Built> {
        match &*self.link.borrow() {
            ParentLink::Root => None,
            ParentLink::Attr { parent, .. } => parent.upgrade().map(Built::Node),
            ParentLink::Index { parent } => parent.upgrade().map(Built::List),
            ParentLink::Key { parent } => parent.upgrade().map(Built::Dict),
        }
    }

    /// Current path from the root
    #[must_use]
    pub fn node_path(&self) -> NodePath {
        resolve_path(self.link(), (self as *const Self).cast())
    }

    /// Current path from the root, rendered
    ///
    /// The root has the empty path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> String {
        self.node_path().to_string()
    }

    /// Check if `name` is a field, filter or extra entry of this node
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        let record = self.record.borrow();
        let ty = record.record_type();
        record.get(name).is_some() || ty.field(name).is_some() || ty.filter(name).is_some()
    }

    /// Read a field
    ///
    /// Sub-factory fields are built on first access and the same instance is
    /// returned until the field changes.
    ///
    /// # Errors
    /// Returns error if the field does not exist or building fails
    pub fn get(self: &Rc<Self>, name: &str) -> Result<Built, SystemError> {
        if let Some(built) = self.cache.borrow().get(name) {
            tracing::trace!(field = name, "cache hit");
            return Ok(built.clone());
        }

        let filter = {
            let record = self.record.borrow();
            match record.get(name) {
                Some(_) => None,
                None => record.record_type().filter(name).cloned(),
            }
        };
        if let Some(filter) = filter {
            return self.select(name, &filter);
        }

        let (value, kind) = {
            let record = self.record.borrow();
            let value = record.get(name).cloned().ok_or_else(|| self.no_field(name))?;
            let kind = record.record_type().field(name).map(|spec| spec.kind().clone());
            (value, kind)
        };
        let kind = match kind {
            Some(kind) if kind.is_factory() => kind,
            None if matches!(value, FieldValue::Record(_)) => FieldKind::ANY,
            _ => return Ok(plain(value)),
        };

        let ctx = BuildContext::new(ParentLink::attr(self, name));
        let built = build_value(&value, &kind, &ctx)?;
        if built.is_null() {
            return Ok(built);
        }
        tracing::debug!(path = %self.path(), field = name, "built sub-factory");
        let mut cache = self.cache.borrow_mut();
        Ok(cache.entry(name.to_string()).or_insert(built).clone())
    }

    /// Read a field that builds into a node
    ///
    /// # Errors
    /// Returns error if the field is missing or is not a node
    pub fn child(self: &Rc<Self>, name: &str) -> Result<Rc<Node>, SystemError> {
        match self.get(name)? {
            Built::Node(node) => Ok(node),
            other => Err(self.wrong_kind(name, "a node", &other)),
        }
    }

    /// Read a field that builds into an ordered collection
    ///
    /// # Errors
    /// Returns error if the field is missing or is not a list
    pub fn list(self: &Rc<Self>, name: &str) -> Result<Rc<NodeList>, SystemError> {
        match self.get(name)? {
            Built::List(list) => Ok(list),
            other => Err(self.wrong_kind(name, "a list", &other)),
        }
    }

    /// Read a field that builds into a keyed collection
    ///
    /// # Errors
    /// Returns error if the field is missing or is not a dict
    pub fn dict(self: &Rc<Self>, name: &str) -> Result<Rc<NodeDict>, SystemError> {
        match self.get(name)? {
            Built::Dict(dict) => Ok(dict),
            other => Err(self.wrong_kind(name, "a dict", &other)),
        }
    }

    /// Matches of a filter field, found on first access and cached
    ///
    /// # Errors
    /// Returns error if the field is missing, is not a filter or building a
    /// visited branch fails
    pub fn selection(self: &Rc<Self>, name: &str) -> Result<Rc<[Built]>, SystemError> {
        match self.get(name)? {
            Built::Selection(items) => Ok(items),
            other => Err(self.wrong_kind(name, "a selection", &other)),
        }
    }

    /// Plain value of a field
    ///
    /// Built sub-trees are rendered from their current state. Filter fields
    /// are run if they have not been yet.
    ///
    /// # Errors
    /// Returns error if the field does not exist
    pub fn value(self: &Rc<Self>, name: &str) -> Result<Value, SystemError> {
        if let Some(built) = self.cache.borrow().get(name) {
            if built.is_container() || built.as_selection().is_some() {
                return Ok(built.to_value());
            }
        }
        if self.record_type().filter(name).is_some() && self.record.borrow().get(name).is_none() {
            return self.get(name).map(|built| built.to_value());
        }
        self.record
            .borrow()
            .get(name)
            .map(FieldValue::to_value)
            .ok_or_else(|| self.no_field(name))
    }

    /// Check if a sub-factory field has a cached instance
    #[inline]
    #[must_use]
    pub fn is_built(&self, name: &str) -> bool {
        self.cache.borrow().contains_key(name)
    }

    /// Drop the cached instance of a field; the next read rebuilds it
    ///
    /// Returns `true` if something was cached.
    pub fn invalidate(&self, name: &str) -> bool {
        let dropped = self.cache.borrow_mut().shift_remove(name).is_some();
        if dropped {
            tracing::debug!(path = %self.path(), field = name, "invalidated");
        }
        dropped
    }

    /// Assign a field through the mutation guard
    ///
    /// A built node or collection is adopted as is and re-parented here;
    /// anything else replaces the record value and drops the cached instance.
    ///
    /// # Errors
    /// Returns error if the record type is read-only or the value does not
    /// fit the field
    pub fn set(self: &Rc<Self>, name: &str, input: impl Into<FieldInput>) -> Result<(), SystemError> {
        let ty = self.record_type();
        if !ty.allows_mutation() {
            return Err(MutationError::ReadOnly {
                record: ty.name().to_string(),
                field: name.to_string(),
                path: self.path(),
            }
            .into());
        }
        self.assign(name, input.into())
    }

    /// Assign a field without consulting the mutation guard
    pub(crate) fn assign(self: &Rc<Self>, name: &str, input: FieldInput) -> Result<(), SystemError> {
        let ty = self.record_type();
        let at = self.node_path().child(PathStep::attr(name)).to_string();
        let adopted = match &input {
            FieldInput::Built(built) if built.is_container() => Some(built.clone()),
            _ => None,
        };
        let value = coerce::field_input(&ty, name, input, &at)?;
        self.record.borrow_mut().insert(name, value);

        let mut cache = self.cache.borrow_mut();
        match adopted {
            Some(built) => {
                built.relink(ParentLink::attr(self, name));
                cache.insert(name.to_string(), built);
            }
            None => {
                cache.shift_remove(name);
            }
        }
        tracing::debug!(path = %at, "assigned");
        Ok(())
    }

    /// Merge raw overrides into the record and drop every cached instance
    ///
    /// Allowed regardless of the mutation policy. Either every override
    /// applies or none does.
    ///
    /// # Errors
    /// Returns error if `overrides` is not a mapping or a value does not fit
    pub fn reconfigure(&self, overrides: &Value) -> Result<(), SystemError> {
        let map = overrides
            .as_object()
            .ok_or_else(|| ValidationError::TypeMismatch {
                at: self.path(),
                expected: "mapping".to_string(),
                found: coerce::value_kind(overrides).to_string(),
            })?;
        let path = self.node_path();
        let mut record = self.record.borrow().clone();
        for (name, raw) in map {
            let at = path.child(PathStep::attr(name)).to_string();
            record.assign(name, FieldInput::Raw(raw.clone()), &at)?;
        }
        *self.record.borrow_mut() = record;
        self.cache.borrow_mut().clear();
        tracing::debug!(path = %path, fields = map.len(), "reconfigured");
        Ok(())
    }

    /// Names of sub-factory fields, optionally only those whose built value
    /// matches one of `targets`
    ///
    /// Filtering builds the fields it inspects.
    ///
    /// # Errors
    /// Returns error if building a field fails
    pub fn children(self: &Rc<Self>, targets: Option<&[Target]>) -> Result<Vec<String>, SystemError> {
        let names = self.factory_names();
        let Some(targets) = targets else {
            return Ok(names);
        };
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let built = self.get(&name)?;
            if targets.iter().any(|t| t.matches(&built)) {
                out.push(name);
            }
        }
        Ok(out)
    }

    /// Descendants matching any of `targets`, preorder, down to `depth`
    ///
    /// See [`traverse::find`].
    #[inline]
    pub fn find(self: &Rc<Self>, targets: &[Target], depth: i32) -> Find {
        traverse::find(&Built::Node(Rc::clone(self)), targets, depth)
    }

    /// Render the node to a plain value
    ///
    /// Built sub-trees are rendered from their current state, so collection
    /// edits show up; unbuilt fields are rendered from the record.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let record = self.record.borrow();
        let cache = self.cache.borrow();
        Value::Object(
            record
                .fields()
                .map(|(name, value)| {
                    let rendered = match cache.get(name) {
                        Some(built) if built.is_container() => built.to_value(),
                        _ => value.to_value(),
                    };
                    (name.to_string(), rendered)
                })
                .collect(),
        )
    }

    fn select(self: &Rc<Self>, name: &str, filter: &Filter) -> Result<Built, SystemError> {
        let found = filter.select(&Built::Node(Rc::clone(self)))?;
        tracing::debug!(path = %self.path(), field = name, found = found.len(), "ran filter");
        let built = Built::Selection(found.into());
        let mut cache = self.cache.borrow_mut();
        Ok(cache.entry(name.to_string()).or_insert(built).clone())
    }

    pub(crate) fn factory_names(&self) -> Vec<String> {
        self.record.borrow().factory_names()
    }

    fn no_field(&self, name: &str) -> SystemError {
        let record = self.record.borrow();
        LookupError::NoField {
            record: record.record_type().name().to_string(),
            path: self.path(),
            field: name.to_string(),
        }
        .into()
    }

    fn wrong_kind(&self, name: &str, expected: &'static str, found: &Built) -> SystemError {
        LookupError::WrongKind {
            path: self.node_path().child(PathStep::attr(name)).to_string(),
            expected,
            found: found.kind_name(),
        }
        .into()
    }

    /// Check if the record type keeps undeclared entries
    pub(crate) fn accepts_extra(&self) -> bool {
        self.record.borrow().record_type().extra_policy() == ExtraPolicy::Allow
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("record", &*self.record.borrow())
            .field("path", &self.path())
            .field("built", &self.cache.borrow().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldSpec;
    use serde_json::json;

    fn window() -> Arc<RecordType> {
        RecordType::builder("Window")
            .field(FieldSpec::new("panes", FieldKind::INT).with_default(2))
            .finish()
    }

    fn room(window: &Arc<RecordType>, mutable: bool) -> Arc<RecordType> {
        RecordType::builder("Room")
            .field(FieldSpec::new("width", FieldKind::FLOAT).with_default(1.0))
            .field(FieldSpec::new("window", FieldKind::record(window)))
            .allow_mutation(mutable)
            .finish()
    }

    #[test]
    fn sub_factory_is_cached() {
        let node = room(&window(), false).default_record().unwrap().build_node().unwrap();
        assert!(!node.is_built("window"));
        let a = node.child("window").unwrap();
        let b = node.child("window").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert!(node.is_built("window"));
        assert_eq!(a.path(), "window");
    }

    #[test]
    fn invalidate_rebuilds() {
        let node = room(&window(), false).default_record().unwrap().build_node().unwrap();
        let a = node.child("window").unwrap();
        assert!(node.invalidate("window"));
        assert!(!node.invalidate("window"));
        let b = node.child("window").unwrap();
        assert!(!Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn set_requires_mutation_flag() {
        let node = room(&window(), false).default_record().unwrap().build_node().unwrap();
        let err = node.set("width", 3.0).unwrap_err();
        assert!(err.is_mutation());
        assert_eq!(node.value("width").unwrap(), json!(1.0));
    }

    #[test]
    fn set_replaces_cached_instance() {
        let node = room(&window(), true).default_record().unwrap().build_node().unwrap();
        let before = node.child("window").unwrap();
        node.set("window", json!({"panes": 4})).unwrap();
        let after = node.child("window").unwrap();
        assert!(!Rc::ptr_eq(&before, &after));
        assert_eq!(after.value("panes").unwrap(), json!(4));
    }

    #[test]
    fn set_adopts_built_node() {
        let window = window();
        let node = room(&window, true).default_record().unwrap().build_node().unwrap();
        let loose = window.from_value(&json!({"panes": 6})).unwrap().build_node().unwrap();
        node.set("window", Rc::clone(&loose)).unwrap();
        assert!(Rc::ptr_eq(&node.child("window").unwrap(), &loose));
        assert_eq!(loose.path(), "window");
    }

    #[test]
    fn reconfigure_is_atomic() {
        let node = room(&window(), false).default_record().unwrap().build_node().unwrap();
        let err = node
            .reconfigure(&json!({"width": 5, "window": "not a window"}))
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(node.value("width").unwrap(), json!(1.0));

        node.reconfigure(&json!({"width": 5})).unwrap();
        assert_eq!(node.value("width").unwrap(), json!(5.0));
    }

    #[test]
    fn reconfigure_drops_cache() {
        let node = room(&window(), false).default_record().unwrap().build_node().unwrap();
        let _ = node.child("window").unwrap();
        node.reconfigure(&json!({"width": 2})).unwrap();
        assert!(!node.is_built("window"));
    }

    #[test]
    fn children_lists_sub_factories() {
        let node = room(&window(), false).default_record().unwrap().build_node().unwrap();
        assert_eq!(node.children(None).unwrap(), ["window"]);
    }

    #[test]
    fn adopted_collection_is_checked_against_element_kind() {
        let window = window();
        let shelf = RecordType::builder("Shelf")
            .field(FieldSpec::new("windows", FieldKind::list_of(FieldKind::record(&window))))
            .allow_mutation(true)
            .finish();
        let node = shelf.default_record().unwrap().build_node().unwrap();

        let ints = NodeList::new(
            FieldKind::INT,
            vec![FieldValue::Scalar(json!(1)), FieldValue::Scalar(json!(2))],
            ParentLink::Root,
        );
        let err = node.set("windows", Built::List(ints)).unwrap_err();
        match err {
            SystemError::Validation(ValidationError::TypeMismatch { at, .. }) => {
                assert_eq!(at, "windows[0]");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(node.value("windows").unwrap(), json!([]));

        let panes = NodeList::new(
            FieldKind::record(&window),
            vec![FieldValue::Record(window.default_record().unwrap())],
            ParentLink::Root,
        );
        node.set("windows", Built::List(Rc::clone(&panes))).unwrap();
        assert!(Rc::ptr_eq(&node.list("windows").unwrap(), &panes));
        assert_eq!(panes.node(0).unwrap().path(), "windows[0]");
    }

    #[test]
    fn filter_field_collects_matches_once() {
        let window = window();
        let room = RecordType::builder("Room")
            .field(FieldSpec::new("front", FieldKind::record(&window)))
            .field(FieldSpec::new("back", FieldKind::record(&window)))
            .filter("windows", [Target::of(&window)], 0)
            .finish();
        let node = room.default_record().unwrap().build_node().unwrap();

        assert!(node.has_field("windows"));
        assert_eq!(node.children(None).unwrap(), ["front", "back"]);
        let first = node.selection("windows").unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].path(), "back");
        assert!(Rc::ptr_eq(&first, &node.selection("windows").unwrap()));
        assert_eq!(node.value("windows").unwrap(), json!([{"panes": 2}, {"panes": 2}]));
        assert_eq!(node.to_value(), json!({"front": {"panes": 2}, "back": {"panes": 2}}));
        assert!(node.selection("front").unwrap_err().is_lookup());
    }

    #[test]
    fn missing_field_is_lookup_error() {
        let node = room(&window(), false).default_record().unwrap().build_node().unwrap();
        assert!(node.get("door").unwrap_err().is_lookup());
        assert!(node.child("width").unwrap_err().is_lookup());
    }
}
