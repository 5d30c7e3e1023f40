//! Built values and their position in the tree
//!
//! Building a record yields a [`Built`]: usually a [`Node`], or a node
//! collection for collection fields. Every node and collection keeps a
//! non-owning [`ParentLink`] to the container it was reached from. Paths are
//! never stored; they are recomputed from these links on every query, so a
//! collection element always reports the position it occupies right now.

use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::rc::{Rc, Weak};

use serde_json::Value;
use systree_path::{NodePath, PathStep};

use crate::collection::{NodeDict, NodeList};
use crate::node::Node;

/// Runtime value produced by building a record or reading a field
#[derive(Clone)]
pub enum Built {
    /// Absent optional value
    Null,

    /// Plain value
    Value(Value),

    /// Built node
    Node(Rc<Node>),

    /// Ordered node collection
    List(Rc<NodeList>),

    /// Keyed node collection
    Dict(Rc<NodeDict>),

    /// Result of a filter field: matches found below the owning node
    Selection(Rc<[Built]>),

    /// Application object produced by a custom factory
    Opaque(Rc<dyn Any>),
}

impl Built {
    /// Wrap an application object
    #[inline]
    pub fn opaque<T: Any>(value: T) -> Self {
        Self::Opaque(Rc::new(value))
    }

    /// Node, if this is one
    #[inline]
    #[must_use]
    pub fn as_node(&self) -> Option<&Rc<Node>> {
        match self {
            Self::Node(node) => Some(node),
            _ => None,
        }
    }

    /// Ordered collection, if this is one
    #[inline]
    #[must_use]
    pub fn as_list(&self) -> Option<&Rc<NodeList>> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    /// Keyed collection, if this is one
    #[inline]
    #[must_use]
    pub fn as_dict(&self) -> Option<&Rc<NodeDict>> {
        match self {
            Self::Dict(dict) => Some(dict),
            _ => None,
        }
    }

    /// Filter matches, if this is a selection
    #[inline]
    #[must_use]
    pub fn as_selection(&self) -> Option<&[Built]> {
        match self {
            Self::Selection(items) => Some(items),
            _ => None,
        }
    }

    /// Plain value, if this is one
    #[inline]
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Application object of type `T`, if this is one
    #[inline]
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Opaque(value) => value.downcast_ref(),
            _ => None,
        }
    }

    /// Check for [`Built::Null`]
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check if this value has children of its own
    #[inline]
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Node(_) | Self::List(_) | Self::Dict(_))
    }

    /// Check if both values are the same built instance
    ///
    /// Plain values never share identity.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Node(a), Self::Node(b)) => Rc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Dict(a), Self::Dict(b)) => Rc::ptr_eq(a, b),
            (Self::Selection(a), Self::Selection(b)) => Rc::ptr_eq(a, b),
            (Self::Opaque(a), Self::Opaque(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Short kind name used in diagnostics
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Value(_) => "a value",
            Self::Node(_) => "a node",
            Self::List(_) => "a list",
            Self::Dict(_) => "a dict",
            Self::Selection(_) => "a selection",
            Self::Opaque(_) => "an object",
        }
    }

    /// Current path, empty for values that are not placed in a tree
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::Node(node) => node.path(),
            Self::List(list) => list.path(),
            Self::Dict(dict) => dict.path(),
            _ => String::new(),
        }
    }

    /// Render to a plain value
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Null | Self::Opaque(_) => Value::Null,
            Self::Value(value) => value.clone(),
            Self::Node(node) => node.to_value(),
            Self::List(list) => list.to_value(),
            Self::Dict(dict) => dict.to_value(),
            Self::Selection(items) => Value::Array(items.iter().map(Self::to_value).collect()),
        }
    }

    pub(crate) fn addr(&self) -> Option<*const ()> {
        match self {
            Self::Node(node) => Some(Rc::as_ptr(node).cast()),
            Self::List(list) => Some(Rc::as_ptr(list).cast()),
            Self::Dict(dict) => Some(Rc::as_ptr(dict).cast()),
            _ => None,
        }
    }

    pub(crate) fn relink(&self, link: ParentLink) {
        match self {
            Self::Node(node) => node.set_link(link),
            Self::List(list) => list.set_link(link),
            Self::Dict(dict) => dict.set_link(link),
            _ => {}
        }
    }
}

impl Debug for Built {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Node(node) => f
                .debug_tuple("Node")
                .field(&node.record_type().name())
                .field(&node.path())
                .finish(),
            Self::List(list) => f.debug_tuple("List").field(&list.path()).finish(),
            Self::Dict(dict) => f.debug_tuple("Dict").field(&dict.path()).finish(),
            Self::Selection(items) => f.debug_tuple("Selection").field(&items.len()).finish(),
            Self::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

impl From<Rc<Node>> for Built {
    fn from(node: Rc<Node>) -> Self {
        Self::Node(node)
    }
}

impl From<Value> for Built {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Non-owning reference to the container a value was reached from
#[derive(Debug, Clone, Default)]
pub enum ParentLink {
    /// Not placed under anything
    #[default]
    Root,

    /// Reached through a named field
    Attr { parent: Weak<Node>, name: String },

    /// Element of an ordered collection; the index is looked up on demand
    Index { parent: Weak<NodeList> },

    /// Element of a keyed collection; the key is looked up on demand
    Key { parent: Weak<NodeDict> },
}

impl ParentLink {
    /// Link to a named field of `parent`
    #[inline]
    #[must_use]
    pub fn attr(parent: &Rc<Node>, name: impl Into<String>) -> Self {
        Self::Attr {
            parent: Rc::downgrade(parent),
            name: name.into(),
        }
    }
}

/// Where a record is being built
///
/// Carries the link the built value will hold and the step that will name
/// it: a field name, or the index or key of a collection slot.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    link: ParentLink,
    step: Option<PathStep>,
}

impl BuildContext {
    /// Context for building a root
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Context for building at `link`
    ///
    /// A named field link names the built value after the field.
    #[must_use]
    pub fn new(link: ParentLink) -> Self {
        let step = match &link {
            ParentLink::Attr { name, .. } => Some(PathStep::attr(name.clone())),
            _ => None,
        };
        Self { link, step }
    }

    /// Context for building the collection slot at `step`
    #[inline]
    #[must_use]
    pub fn element(link: ParentLink, step: PathStep) -> Self {
        Self {
            link,
            step: Some(step),
        }
    }

    /// Position the built value will occupy
    #[inline]
    #[must_use]
    pub fn link(&self) -> &ParentLink {
        &self.link
    }

    /// Step from the container to the built value
    #[inline]
    #[must_use]
    pub fn step(&self) -> Option<&PathStep> {
        self.step.as_ref()
    }

    /// Container the value is built for
    #[must_use]
    pub fn parent(&self) -> Option<Built> {
        match &self.link {
            ParentLink::Root => None,
            ParentLink::Attr { parent, .. } => parent.upgrade().map(Built::Node),
            ParentLink::Index { parent } => parent.upgrade().map(Built::List),
            ParentLink::Key { parent } => parent.upgrade().map(Built::Dict),
        }
    }

    /// Owning node when building a named field
    #[must_use]
    pub fn parent_node(&self) -> Option<Rc<Node>> {
        match &self.link {
            ParentLink::Attr { parent, .. } => parent.upgrade(),
            _ => None,
        }
    }

    /// Field name when building a named field
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.step.as_ref().and_then(PathStep::as_attr)
    }

    /// Slot index when building an element of an ordered collection
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        match self.step {
            Some(PathStep::Index(index)) => Some(index),
            _ => None,
        }
    }

    /// Slot key when building an entry of a keyed collection
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match &self.step {
            Some(PathStep::Key(key)) => Some(key),
            _ => None,
        }
    }

    /// Path the built value will have
    #[must_use]
    pub fn path(&self) -> NodePath {
        let mut path = self
            .parent()
            .map(|parent| match parent {
                Built::Node(node) => node.node_path(),
                Built::List(list) => list.node_path(),
                Built::Dict(dict) => dict.node_path(),
                _ => NodePath::root(),
            })
            .unwrap_or_default();
        if let Some(step) = &self.step {
            path.push(step.clone());
        }
        path
    }
}

/// Walk parent links up to the root, collecting steps
///
/// `addr` identifies the value owning `link`; it is used to find the
/// current index or key inside collections. A value whose container is gone
/// or no longer holds it is treated as the root of the remaining path.
pub(crate) fn resolve_path(mut link: ParentLink, mut addr: *const ()) -> NodePath {
    let mut steps = Vec::new();
    loop {
        match link {
            ParentLink::Root => break,
            ParentLink::Attr { parent, name } => {
                let Some(parent) = parent.upgrade() else {
                    break;
                };
                steps.push(PathStep::Attr(name));
                addr = Rc::as_ptr(&parent).cast();
                link = parent.link();
            }
            ParentLink::Index { parent } => {
                let Some((index, list)) = parent
                    .upgrade()
                    .and_then(|list| list.position(addr).map(|i| (i, list)))
                else {
                    break;
                };
                steps.push(PathStep::Index(index));
                addr = Rc::as_ptr(&list).cast();
                link = list.link();
            }
            ParentLink::Key { parent } => {
                let Some((key, dict)) = parent
                    .upgrade()
                    .and_then(|dict| dict.key_of(addr).map(|k| (k, dict)))
                else {
                    break;
                };
                steps.push(PathStep::Key(key));
                addr = Rc::as_ptr(&dict).cast();
                link = dict.link();
            }
        }
    }
    steps.reverse();
    NodePath::from(steps)
}
