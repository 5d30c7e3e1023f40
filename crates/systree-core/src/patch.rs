//! Setup patches
//!
//! A [`Setup`] maps path expressions (`f1.l[1].z`, `rooms['hall'].width`) to
//! raw values. It can be applied to a built tree with [`apply`], or to a
//! record before building through [`Record::with_setup`] and the setup key of
//! a raw mapping.
//!
//! Every step but the last must already exist. The last step is assigned;
//! on a keyed collection it may introduce a new key. Assignment bypasses the
//! mutation guard.

use std::rc::Rc;

use serde_json::Value;
use systree_path::{NodePath, PathStep};

use crate::built::Built;
use crate::coerce;
use crate::error::{PatchError, SystemError};
use crate::field::FieldKind;
use crate::node::Node;
use crate::record::{FieldInput, FieldValue, Record};
use crate::schema::ExtraPolicy;

/// Ordered path to value assignments
#[derive(Debug, Clone, Default)]
pub struct Setup {
    entries: Vec<(NodePath, Value)>,
}

impl Setup {
    /// Create an empty setup
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw mapping of path expressions to values
    ///
    /// # Errors
    /// Returns error if `raw` is not a mapping or a key is not a valid path
    pub fn from_value(raw: &Value) -> Result<Self, PatchError> {
        let map = raw.as_object().ok_or_else(|| PatchError::NotAMapping {
            found: coerce::value_kind(raw).to_string(),
        })?;
        map.iter()
            .map(|(path, value)| Ok((path.parse::<NodePath>()?, value.clone())))
            .collect::<Result<Vec<_>, PatchError>>()
            .map(|entries| Self { entries })
    }

    /// With one more assignment
    ///
    /// # Errors
    /// Returns error if `path` is not a valid path
    pub fn with(mut self, path: &str, value: impl Into<Value>) -> Result<Self, PatchError> {
        self.entries.push((path.parse()?, value.into()));
        Ok(self)
    }

    /// Assignments in order
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&NodePath, &Value)> {
        self.entries.iter().map(|(path, value)| (path, value))
    }

    /// Number of assignments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no assignments
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(NodePath, Value)> for Setup {
    fn from_iter<I: IntoIterator<Item = (NodePath, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Apply `setup` to a built tree, in order
///
/// Assignments before a failing one stay applied.
///
/// # Errors
/// Returns error if a path does not resolve or a value does not fit
pub fn apply(root: &Rc<Node>, setup: &Setup) -> Result<(), SystemError> {
    for (path, value) in setup.iter() {
        apply_one(root, path, value)?;
        tracing::debug!(path = %path, "applied setup entry");
    }
    Ok(())
}

fn no_step(path: &NodePath, step: &PathStep) -> SystemError {
    PatchError::NoSuchStep {
        path: path.to_string(),
        step: step.to_string(),
    }
    .into()
}

fn wrong_container(path: &NodePath, step: &PathStep, found: &'static str) -> SystemError {
    PatchError::WrongContainer {
        path: path.to_string(),
        step: step.to_string(),
        found,
    }
    .into()
}

fn apply_one(root: &Rc<Node>, path: &NodePath, value: &Value) -> Result<(), SystemError> {
    let (last, prefix) = path.steps().split_last().ok_or(PatchError::EmptyPath)?;
    let mut current = Built::Node(Rc::clone(root));
    for step in prefix {
        current = step_into(&current, step, path)?;
    }

    let raw = FieldInput::Raw(value.clone());
    match (&current, last) {
        (Built::Node(node), PathStep::Attr(name)) => {
            if !node.has_field(name) && !node.accepts_extra() {
                return Err(no_step(path, last));
            }
            node.assign(name, raw)
        }
        (Built::List(list), PathStep::Index(index)) => {
            if *index >= list.len() {
                return Err(no_step(path, last));
            }
            list.set(*index, raw)
        }
        (Built::Dict(dict), PathStep::Key(key)) => dict.insert(key.clone(), raw),
        (other, step) => Err(wrong_container(path, step, other.kind_name())),
    }
}

fn step_into(current: &Built, step: &PathStep, path: &NodePath) -> Result<Built, SystemError> {
    match (current, step) {
        (Built::Node(node), PathStep::Attr(name)) if node.has_field(name) => node.get(name),
        (Built::List(list), PathStep::Index(index)) if *index < list.len() => list.get(*index),
        (Built::Dict(dict), PathStep::Key(key)) if dict.contains_key(key) => dict.get(key),
        (Built::Node(_), PathStep::Attr(_))
        | (Built::List(_), PathStep::Index(_))
        | (Built::Dict(_), PathStep::Key(_)) => Err(no_step(path, step)),
        (other, step) => Err(wrong_container(path, step, other.kind_name())),
    }
}

/// Apply `setup` to a record tree before anything is built
pub(crate) fn apply_to_record(record: &mut Record, setup: &Setup) -> Result<(), SystemError> {
    for (path, value) in setup.iter() {
        patch_record(record, path.steps(), value, path)?;
    }
    Ok(())
}

fn patch_record(
    record: &mut Record,
    steps: &[PathStep],
    value: &Value,
    path: &NodePath,
) -> Result<(), SystemError> {
    let (first, rest) = steps.split_first().ok_or(PatchError::EmptyPath)?;
    let PathStep::Attr(name) = first else {
        return Err(wrong_container(path, first, "a record"));
    };
    let ty = std::sync::Arc::clone(record.record_type());

    if rest.is_empty() {
        if record.get(name).is_none()
            && ty.field(name).is_none()
            && ty.extra_policy() == ExtraPolicy::Forbid
        {
            return Err(no_step(path, first));
        }
        return record.assign(name, FieldInput::Raw(value.clone()), &path.to_string());
    }

    let kind = ty.field(name).map_or(FieldKind::ANY, |spec| spec.kind().clone());
    let field = record.get_mut(name).ok_or_else(|| no_step(path, first))?;
    patch_field(field, &kind, rest, value, path)
}

fn patch_field(
    field: &mut FieldValue,
    kind: &FieldKind,
    steps: &[PathStep],
    value: &Value,
    path: &NodePath,
) -> Result<(), SystemError> {
    let (first, rest) = steps.split_first().ok_or(PatchError::EmptyPath)?;
    match (field, first) {
        (FieldValue::Record(record), PathStep::Attr(_)) => patch_record(record, steps, value, path),
        (FieldValue::List(items), PathStep::Index(index)) => {
            let element = kind.element_kind();
            let item = items.get_mut(*index).ok_or_else(|| no_step(path, first))?;
            if rest.is_empty() {
                *item = coerce::coerce(&element, value, &path.to_string())?;
                Ok(())
            } else {
                patch_field(item, &element, rest, value, path)
            }
        }
        (FieldValue::Dict(map), PathStep::Key(key)) => {
            let element = kind.element_kind();
            if rest.is_empty() {
                let coerced = coerce::coerce(&element, value, &path.to_string())?;
                map.insert(key.clone(), coerced);
                Ok(())
            } else {
                let item = map.get_mut(key).ok_or_else(|| no_step(path, first))?;
                patch_field(item, &element, rest, value, path)
            }
        }
        (other, step) => Err(wrong_container(path, step, other.kind_name())),
    }
}
