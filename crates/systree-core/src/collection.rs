//! Node collections
//!
//! [`NodeList`] and [`NodeDict`] hold the elements of collection fields.
//! Each slot keeps its validated source value and builds it on first access;
//! inserting, replacing or removing a slot touches only that slot. Elements
//! find their index or key by asking their container, so positions stay
//! correct after insertions and removals.

use std::cell::RefCell;
use std::fmt::{self, Debug, Formatter};
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;
use systree_path::{NodePath, PathStep};

use crate::built::{resolve_path, BuildContext, Built, ParentLink};
use crate::coerce;
use crate::error::{LookupError, SystemError};
use crate::field::FieldKind;
use crate::node::{build_value, Node};
use crate::record::{FieldInput, FieldValue};
use crate::traverse::Target;

struct Slot {
    source: FieldValue,
    built: Option<Built>,
}

impl Slot {
    fn pending(source: FieldValue) -> Self {
        Self {
            source,
            built: None,
        }
    }

    fn addr(&self) -> Option<*const ()> {
        self.built.as_ref().and_then(Built::addr)
    }

    fn to_field_value(&self) -> FieldValue {
        match &self.built {
            Some(built) if built.is_container() => coerce::built_to_field_value(built),
            _ => self.source.clone(),
        }
    }

    fn to_value(&self) -> Value {
        match &self.built {
            Some(built) if built.is_container() => built.to_value(),
            _ => self.source.to_value(),
        }
    }

    /// Drop the built instance, keeping edits made through it
    ///
    /// Nodes and collections write their current state back to the source.
    /// Anything else was produced by a factory and is rebuilt from the
    /// untouched source.
    fn release(&mut self) -> bool {
        match self.built.take() {
            Some(built) => {
                if built.is_container() {
                    self.source = coerce::built_to_field_value(&built);
                }
                true
            }
            None => false,
        }
    }

    fn detach(&self) {
        if let Some(built) = &self.built {
            built.relink(ParentLink::Root);
        }
    }
}

/// Validated slot plus the built value to adopt, if one was given
fn prepare(element: &FieldKind, input: FieldInput, at: &str) -> Result<Slot, SystemError> {
    let adopted = match &input {
        FieldInput::Built(built) if built.is_container() => Some(built.clone()),
        _ => None,
    };
    let source = coerce::coerce_input(element, input, at)?;
    Ok(Slot {
        source,
        built: adopted,
    })
}

/// Ordered collection of built elements
pub struct NodeList {
    element: FieldKind,
    slots: RefCell<Vec<Slot>>,
    link: RefCell<ParentLink>,
}

impl NodeList {
    pub(crate) fn new(element: FieldKind, items: Vec<FieldValue>, link: ParentLink) -> Rc<Self> {
        Rc::new(Self {
            element,
            slots: RefCell::new(items.into_iter().map(Slot::pending).collect()),
            link: RefCell::new(link),
        })
    }

    /// Declared element kind
    #[inline]
    #[must_use]
    pub fn element_kind(&self) -> &FieldKind {
        &self.element
    }

    /// Number of elements
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Check if there are no elements
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }

    /// Element at `index`, built on first access
    ///
    /// # Errors
    /// Returns error if `index` is out of range or building fails
    pub fn get(self: &Rc<Self>, index: usize) -> Result<Built, SystemError> {
        let source = {
            let slots = self.slots.borrow();
            let slot = slots.get(index).ok_or_else(|| self.no_index(index, slots.len()))?;
            if let Some(built) = &slot.built {
                return Ok(built.clone());
            }
            slot.source.clone()
        };
        let ctx = BuildContext::element(self.element_link(), PathStep::Index(index));
        let built = build_value(&source, &self.element, &ctx)?;
        let mut slots = self.slots.borrow_mut();
        match slots.get_mut(index) {
            Some(slot) => Ok(slot.built.get_or_insert(built).clone()),
            None => Ok(built),
        }
    }

    /// Element at `index` that builds into a node
    ///
    /// # Errors
    /// Returns error if `index` is out of range or the element is not a node
    pub fn node(self: &Rc<Self>, index: usize) -> Result<Rc<Node>, SystemError> {
        match self.get(index)? {
            Built::Node(node) => Ok(node),
            other => Err(LookupError::WrongKind {
                path: format!("{}[{index}]", self.path()),
                expected: "a node",
                found: other.kind_name(),
            }
            .into()),
        }
    }

    /// Last element
    ///
    /// # Errors
    /// Returns error if the list is empty or building fails
    pub fn last(self: &Rc<Self>) -> Result<Built, SystemError> {
        match self.len() {
            0 => Err(self.no_index(0, 0)),
            len => self.get(len - 1),
        }
    }

    /// Append an element
    ///
    /// # Errors
    /// Returns error if the value does not fit the element kind
    pub fn append(self: &Rc<Self>, input: impl Into<FieldInput>) -> Result<(), SystemError> {
        let index = self.len();
        self.insert(index, input)
    }

    /// Insert an element before `index`; `index == len` appends
    ///
    /// # Errors
    /// Returns error if `index` is past the end or the value does not fit
    pub fn insert(
        self: &Rc<Self>,
        index: usize,
        input: impl Into<FieldInput>,
    ) -> Result<(), SystemError> {
        let len = self.len();
        if index > len {
            return Err(self.no_index(index, len));
        }
        let slot = prepare(&self.element, input.into(), &self.element_at(index))?;
        self.adopt(&slot);
        self.slots.borrow_mut().insert(index, slot);
        tracing::trace!(path = %self.path(), index, "inserted element");
        Ok(())
    }

    /// Append several elements; nothing is appended if any of them fails
    ///
    /// # Errors
    /// Returns error if a value does not fit the element kind
    pub fn extend<I>(self: &Rc<Self>, inputs: I) -> Result<(), SystemError>
    where
        I: IntoIterator,
        I::Item: Into<FieldInput>,
    {
        let start = self.len();
        let slots = inputs
            .into_iter()
            .enumerate()
            .map(|(i, input)| prepare(&self.element, input.into(), &self.element_at(start + i)))
            .collect::<Result<Vec<_>, _>>()?;
        for slot in &slots {
            self.adopt(slot);
        }
        self.slots.borrow_mut().extend(slots);
        Ok(())
    }

    /// Replace the element at `index`
    ///
    /// The replaced instance is detached from the tree.
    ///
    /// # Errors
    /// Returns error if `index` is out of range or the value does not fit
    pub fn set(self: &Rc<Self>, index: usize, input: impl Into<FieldInput>) -> Result<(), SystemError> {
        let len = self.len();
        if index >= len {
            return Err(self.no_index(index, len));
        }
        let slot = prepare(&self.element, input.into(), &self.element_at(index))?;
        self.adopt(&slot);
        let old = std::mem::replace(&mut self.slots.borrow_mut()[index], slot);
        old.detach();
        Ok(())
    }

    /// Remove the element at `index`, detaching it from the tree
    ///
    /// # Errors
    /// Returns error if `index` is out of range
    pub fn remove(&self, index: usize) -> Result<(), SystemError> {
        let len = self.len();
        if index >= len {
            return Err(self.no_index(index, len));
        }
        let old = self.slots.borrow_mut().remove(index);
        old.detach();
        Ok(())
    }

    /// Check if the element at `index` has been built
    #[must_use]
    pub fn is_built(&self, index: usize) -> bool {
        self.slots
            .borrow()
            .get(index)
            .is_some_and(|slot| slot.built.is_some())
    }

    /// Drop the built instance at `index`; the next read rebuilds it
    pub fn invalidate(&self, index: usize) -> bool {
        let mut slots = self.slots.borrow_mut();
        let Some(slot) = slots.get_mut(index) else {
            return false;
        };
        slot.release()
    }

    /// Elements in order, built on access
    pub fn iter(self: &Rc<Self>) -> impl Iterator<Item = Result<Built, SystemError>> + '_ {
        (0..self.len()).map(move |index| self.get(index))
    }

    /// Elements that are nodes, in order
    ///
    /// # Errors
    /// Returns error if building an element fails
    pub fn iter_built(self: &Rc<Self>) -> Result<Vec<Rc<Node>>, SystemError> {
        let mut out = Vec::new();
        for built in self.iter() {
            if let Built::Node(node) = built? {
                out.push(node);
            }
        }
        Ok(out)
    }

    /// Named sub-factories; collections have none of their own
    #[inline]
    #[must_use]
    pub fn children(&self, _targets: Option<&[Target]>) -> Vec<String> {
        Vec::new()
    }

    /// Link to the container this list was reached from
    #[inline]
    #[must_use]
    pub fn link(&self) -> ParentLink {
        self.link.borrow().clone()
    }

    pub(crate) fn set_link(&self, link: ParentLink) {
        *self.link.borrow_mut() = link;
    }

    /// Current path from the root
    #[must_use]
    pub fn node_path(&self) -> NodePath {
        resolve_path(self.link(), (self as *const Self).cast())
    }

    /// Current path from the root, rendered
    #[inline]
    #[must_use]
    pub fn path(&self) -> String {
        self.node_path().to_string()
    }

    /// Render to a plain value
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Array(self.slots.borrow().iter().map(Slot::to_value).collect())
    }

    pub(crate) fn to_field_value(&self) -> FieldValue {
        FieldValue::List(self.slots.borrow().iter().map(Slot::to_field_value).collect())
    }

    pub(crate) fn position(&self, addr: *const ()) -> Option<usize> {
        self.slots
            .borrow()
            .iter()
            .position(|slot| slot.addr() == Some(addr))
    }

    fn element_link(self: &Rc<Self>) -> ParentLink {
        ParentLink::Index {
            parent: Rc::downgrade(self),
        }
    }

    fn adopt(self: &Rc<Self>, slot: &Slot) {
        if let Some(built) = &slot.built {
            built.relink(self.element_link());
        }
    }

    fn element_at(&self, index: usize) -> String {
        format!("{}[{index}]", self.path())
    }

    fn no_index(&self, index: usize, len: usize) -> SystemError {
        LookupError::NoIndex {
            path: self.path(),
            index,
            len,
        }
        .into()
    }
}

impl Debug for NodeList {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeList")
            .field("element", &self.element.describe())
            .field("len", &self.len())
            .field("path", &self.path())
            .finish()
    }
}

/// String-keyed collection of built elements
pub struct NodeDict {
    element: FieldKind,
    slots: RefCell<IndexMap<String, Slot>>,
    link: RefCell<ParentLink>,
}

impl NodeDict {
    pub(crate) fn new(
        element: FieldKind,
        items: IndexMap<String, FieldValue>,
        link: ParentLink,
    ) -> Rc<Self> {
        Rc::new(Self {
            element,
            slots: RefCell::new(
                items
                    .into_iter()
                    .map(|(key, value)| (key, Slot::pending(value)))
                    .collect(),
            ),
            link: RefCell::new(link),
        })
    }

    /// Declared element kind
    #[inline]
    #[must_use]
    pub fn element_kind(&self) -> &FieldKind {
        &self.element
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Check if there are no entries
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }

    /// Keys in insertion order
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.slots.borrow().keys().cloned().collect()
    }

    /// Check if `key` is present
    #[inline]
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.slots.borrow().contains_key(key)
    }

    /// Entry under `key`, built on first access
    ///
    /// # Errors
    /// Returns error if `key` is missing or building fails
    pub fn get(self: &Rc<Self>, key: &str) -> Result<Built, SystemError> {
        let source = {
            let slots = self.slots.borrow();
            let slot = slots.get(key).ok_or_else(|| self.no_key(key))?;
            if let Some(built) = &slot.built {
                return Ok(built.clone());
            }
            slot.source.clone()
        };
        let ctx = BuildContext::element(self.element_link(), PathStep::key(key));
        let built = build_value(&source, &self.element, &ctx)?;
        let mut slots = self.slots.borrow_mut();
        match slots.get_mut(key) {
            Some(slot) => Ok(slot.built.get_or_insert(built).clone()),
            None => Ok(built),
        }
    }

    /// Entry under `key` that builds into a node
    ///
    /// # Errors
    /// Returns error if `key` is missing or the entry is not a node
    pub fn node(self: &Rc<Self>, key: &str) -> Result<Rc<Node>, SystemError> {
        match self.get(key)? {
            Built::Node(node) => Ok(node),
            other => Err(LookupError::WrongKind {
                path: self.entry_at(key),
                expected: "a node",
                found: other.kind_name(),
            }
            .into()),
        }
    }

    /// Insert or replace the entry under `key`
    ///
    /// A replaced instance is detached from the tree; a new key goes last.
    ///
    /// # Errors
    /// Returns error if the value does not fit the element kind
    pub fn insert(
        self: &Rc<Self>,
        key: impl Into<String>,
        input: impl Into<FieldInput>,
    ) -> Result<(), SystemError> {
        let key = key.into();
        let slot = prepare(&self.element, input.into(), &self.entry_at(&key))?;
        self.adopt(&slot);
        let old = self.slots.borrow_mut().insert(key.clone(), slot);
        if let Some(old) = old {
            old.detach();
        }
        tracing::trace!(path = %self.path(), key = %key, "inserted entry");
        Ok(())
    }

    /// Insert several entries; nothing changes if any of them fails
    ///
    /// # Errors
    /// Returns error if a value does not fit the element kind
    pub fn update<I, K, V>(self: &Rc<Self>, entries: I) -> Result<(), SystemError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldInput>,
    {
        let prepared = entries
            .into_iter()
            .map(|(key, input)| {
                let key = key.into();
                let slot = prepare(&self.element, input.into(), &self.entry_at(&key))?;
                Ok((key, slot))
            })
            .collect::<Result<Vec<_>, SystemError>>()?;
        for (key, slot) in prepared {
            self.adopt(&slot);
            let old = self.slots.borrow_mut().insert(key, slot);
            if let Some(old) = old {
                old.detach();
            }
        }
        Ok(())
    }

    /// Remove the entry under `key`, detaching it from the tree
    ///
    /// # Errors
    /// Returns error if `key` is missing
    pub fn remove(&self, key: &str) -> Result<(), SystemError> {
        let old = self
            .slots
            .borrow_mut()
            .shift_remove(key)
            .ok_or_else(|| self.no_key(key))?;
        old.detach();
        Ok(())
    }

    /// Check if the entry under `key` has been built
    #[must_use]
    pub fn is_built(&self, key: &str) -> bool {
        self.slots
            .borrow()
            .get(key)
            .is_some_and(|slot| slot.built.is_some())
    }

    /// Drop the built instance under `key`; the next read rebuilds it
    pub fn invalidate(&self, key: &str) -> bool {
        let mut slots = self.slots.borrow_mut();
        let Some(slot) = slots.get_mut(key) else {
            return false;
        };
        slot.release()
    }

    /// Entries in order, built on access
    pub fn iter(self: &Rc<Self>) -> impl Iterator<Item = (String, Result<Built, SystemError>)> + '_ {
        self.keys().into_iter().map(move |key| {
            let built = self.get(&key);
            (key, built)
        })
    }

    /// Named sub-factories; collections have none of their own
    #[inline]
    #[must_use]
    pub fn children(&self, _targets: Option<&[Target]>) -> Vec<String> {
        Vec::new()
    }

    /// Link to the container this dict was reached from
    #[inline]
    #[must_use]
    pub fn link(&self) -> ParentLink {
        self.link.borrow().clone()
    }

    pub(crate) fn set_link(&self, link: ParentLink) {
        *self.link.borrow_mut() = link;
    }

    /// Current path from the root
    #[must_use]
    pub fn node_path(&self) -> NodePath {
        resolve_path(self.link(), (self as *const Self).cast())
    }

    /// Current path from the root, rendered
    #[inline]
    #[must_use]
    pub fn path(&self) -> String {
        self.node_path().to_string()
    }

    /// Render to a plain value
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.slots
                .borrow()
                .iter()
                .map(|(key, slot)| (key.clone(), slot.to_value()))
                .collect(),
        )
    }

    pub(crate) fn to_field_value(&self) -> FieldValue {
        FieldValue::Dict(
            self.slots
                .borrow()
                .iter()
                .map(|(key, slot)| (key.clone(), slot.to_field_value()))
                .collect(),
        )
    }

    pub(crate) fn key_of(&self, addr: *const ()) -> Option<String> {
        self.slots
            .borrow()
            .iter()
            .find(|(_, slot)| slot.addr() == Some(addr))
            .map(|(key, _)| key.clone())
    }

    pub(crate) fn key_at(&self, index: usize) -> Option<String> {
        self.slots
            .borrow()
            .get_index(index)
            .map(|(key, _)| key.clone())
    }

    fn element_link(self: &Rc<Self>) -> ParentLink {
        ParentLink::Key {
            parent: Rc::downgrade(self),
        }
    }

    fn adopt(self: &Rc<Self>, slot: &Slot) {
        if let Some(built) = &slot.built {
            built.relink(self.element_link());
        }
    }

    fn entry_at(&self, key: &str) -> String {
        self.node_path()
            .child(PathStep::key(key))
            .to_string()
    }

    fn no_key(&self, key: &str) -> SystemError {
        LookupError::NoKey {
            path: self.path(),
            key: key.to_string(),
        }
        .into()
    }
}

impl Debug for NodeDict {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDict")
            .field("element", &self.element.describe())
            .field("keys", &self.keys())
            .field("path", &self.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldSpec;
    use crate::schema::RecordType;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn item() -> Arc<RecordType> {
        RecordType::builder("Item")
            .field(FieldSpec::new("z", FieldKind::INT).with_default(0))
            .finish()
    }

    fn list_of_items(n: usize) -> Rc<NodeList> {
        let items = (0..n)
            .map(|i| {
                FieldValue::Record(item().from_value(&json!({ "z": i })).unwrap())
            })
            .collect();
        NodeList::new(FieldKind::record(&item()), items, ParentLink::Root)
    }

    #[test]
    fn elements_report_current_index() {
        let list = list_of_items(3);
        let second = list.node(1).unwrap();
        assert_eq!(second.path(), "[1]");

        list.insert(0, json!({"z": 9})).unwrap();
        assert_eq!(second.path(), "[2]");

        list.remove(0).unwrap();
        assert_eq!(second.path(), "[1]");
    }

    #[test]
    fn removed_element_is_detached() {
        let list = list_of_items(2);
        let first = list.node(0).unwrap();
        list.remove(0).unwrap();
        assert_eq!(first.path(), "");
        assert!(first.parent().is_none());
    }

    #[test]
    fn extend_is_all_or_nothing() {
        let list = list_of_items(1);
        let err = list
            .extend([json!({"z": 1}), json!({"z": "bad"})])
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(list.len(), 1);

        list.extend([json!({"z": 1}), json!({"z": 2})]).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.last().unwrap().as_node().unwrap().path(), "[2]");
    }

    #[test]
    fn out_of_range_is_lookup_error() {
        let list = list_of_items(1);
        assert!(list.get(3).unwrap_err().is_lookup());
        assert!(list.insert(5, json!({})).unwrap_err().is_lookup());
        assert!(NodeList::new(FieldKind::INT, Vec::new(), ParentLink::Root)
            .last()
            .unwrap_err()
            .is_lookup());
    }

    #[test]
    fn dict_entries_report_key() {
        let dict = NodeDict::new(FieldKind::record(&item()), IndexMap::new(), ParentLink::Root);
        dict.insert("a", json!({"z": 1})).unwrap();
        dict.update([("b", json!({"z": 2})), ("c", json!({"z": 3}))])
            .unwrap();
        assert_eq!(dict.keys(), ["a", "b", "c"]);
        assert_eq!(dict.node("b").unwrap().path(), "['b']");

        let replaced = dict.node("a").unwrap();
        dict.insert("a", json!({"z": 7})).unwrap();
        assert_eq!(replaced.path(), "");
        assert_eq!(dict.node("a").unwrap().value("z").unwrap(), json!(7));
    }

    #[test]
    fn dict_remove_missing_key() {
        let dict = NodeDict::new(FieldKind::INT, IndexMap::new(), ParentLink::Root);
        assert!(dict.remove("nope").unwrap_err().is_lookup());
    }

    #[test]
    fn scalar_elements_stay_plain() {
        let list = NodeList::new(
            FieldKind::INT,
            vec![FieldValue::Scalar(json!(1))],
            ParentLink::Root,
        );
        list.append(2).unwrap();
        assert_eq!(list.to_value(), json!([1, 2]));
        assert!(list.append("three").unwrap_err().is_validation());
    }

    #[test]
    fn invalidate_reruns_custom_factory() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let doubled = RecordType::builder("Doubled")
            .field(FieldSpec::new("num", FieldKind::INT).with_default(0))
            .build_with(move |record, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                let num = record.value("num").and_then(Value::as_i64).unwrap_or(0);
                Ok(Built::Value(json!(num * 2)))
            })
            .finish();
        let item = FieldValue::Record(doubled.from_value(&json!({"num": 3})).unwrap());
        let list = NodeList::new(FieldKind::record(&doubled), vec![item], ParentLink::Root);

        assert_eq!(list.get(0).unwrap().as_value(), Some(&json!(6)));
        assert_eq!(list.to_value(), json!([{"num": 3}]));
        assert!(list.invalidate(0));
        assert_eq!(list.to_value(), json!([{"num": 3}]));
        assert_eq!(list.get(0).unwrap().as_value(), Some(&json!(6)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalidate_keeps_edits_of_built_elements() {
        let inner = NodeList::new(
            FieldKind::INT,
            vec![FieldValue::Scalar(json!(1))],
            ParentLink::Root,
        );
        let outer = NodeList::new(
            FieldKind::list_of(FieldKind::INT),
            vec![inner.to_field_value()],
            ParentLink::Root,
        );
        outer.get(0).unwrap().as_list().unwrap().append(2).unwrap();
        assert!(outer.invalidate(0));
        assert_eq!(outer.to_value(), json!([[1, 2]]));
    }

    #[test]
    fn element_factories_see_their_slot() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let leaf = RecordType::builder("Leaf")
            .build_with(move |_, ctx| {
                log.lock().push((
                    ctx.path().to_string(),
                    ctx.index(),
                    ctx.key().map(str::to_string),
                    ctx.parent().is_some(),
                ));
                Ok(Built::Null)
            })
            .finish();
        let element = || FieldValue::Record(leaf.default_record().unwrap());

        let list = NodeList::new(
            FieldKind::record(&leaf),
            vec![element(), element()],
            ParentLink::Root,
        );
        list.get(1).unwrap();
        let dict = NodeDict::new(
            FieldKind::record(&leaf),
            std::iter::once(("k".to_string(), element())).collect(),
            ParentLink::Root,
        );
        dict.get("k").unwrap();

        assert_eq!(
            *seen.lock(),
            [
                ("[1]".to_string(), Some(1), None, true),
                ("['k']".to_string(), None, Some("k".to_string()), true),
            ]
        );
    }

    #[test]
    fn children_of_collections_are_empty() {
        let list = list_of_items(2);
        assert!(list.children(None).is_empty());
    }
}
