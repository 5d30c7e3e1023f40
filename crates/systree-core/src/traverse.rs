//! Tree traversal
//!
//! [`find`] walks a built tree in preorder, building sub-factories as it goes,
//! and yields every value matching one of the given [`Target`]s.
//!
//! Depth counts container levels below the start: `0` visits the start's
//! direct children only, `1` also their children, and so on. Collections
//! are a level of their own, so the elements of a collection field sit at
//! depth `1`. A negative depth is unbounded.

use std::sync::Arc;

use crate::built::Built;
use crate::error::SystemError;
use crate::field::FieldKind;
use crate::schema::RecordType;

/// What a traversal looks for
#[derive(Debug, Clone)]
pub enum Target {
    /// Any node
    Node,

    /// Nodes whose record type is the given type or derives from it
    Type(Arc<RecordType>),

    /// Ordered collections
    List,

    /// Keyed collections
    Dict,
}

impl Target {
    /// Target nodes of `ty` and its subtypes
    #[inline]
    #[must_use]
    pub fn of(ty: &Arc<RecordType>) -> Self {
        Self::Type(Arc::clone(ty))
    }

    /// Check a built value
    #[must_use]
    pub fn matches(&self, built: &Built) -> bool {
        match (self, built) {
            (Self::Node, Built::Node(_)) | (Self::List, Built::List(_)) | (Self::Dict, Built::Dict(_)) => {
                true
            }
            (Self::Type(ty), Built::Node(node)) => node.is_instance_of(ty),
            _ => false,
        }
    }

    /// Check a declared field kind without building anything
    #[must_use]
    pub fn matches_kind(&self, kind: &FieldKind) -> bool {
        match kind {
            FieldKind::Optional(inner) => self.matches_kind(inner),
            FieldKind::Scalar(_) => false,
            FieldKind::List(_) => matches!(self, Self::List),
            FieldKind::Dict(_) => matches!(self, Self::Dict),
            FieldKind::Record(ty) | FieldKind::InstanceOf(ty) => self.accepts(ty),
            FieldKind::Union(members) => members.iter().any(|ty| self.accepts(ty)),
        }
    }

    fn accepts(&self, ty: &Arc<RecordType>) -> bool {
        match self {
            Self::Node => ty.produces_nodes(),
            Self::Type(target) => ty.produced_type().is_some_and(|p| p.extends(target)),
            Self::List | Self::Dict => false,
        }
    }
}

/// Child at position `index` of a container, if any
fn child_at(container: &Built, index: usize) -> Option<Result<Built, SystemError>> {
    match container {
        Built::Node(node) => {
            let name = node.factory_names().into_iter().nth(index)?;
            Some(node.get(&name))
        }
        Built::List(list) => (index < list.len()).then(|| list.get(index)),
        Built::Dict(dict) => {
            let key = dict.key_at(index)?;
            Some(dict.get(&key))
        }
        _ => None,
    }
}

/// Direct children of a built value, built on access
///
/// # Errors
/// Returns error if building a child fails
pub fn children(container: &Built) -> Result<Vec<Built>, SystemError> {
    let mut out = Vec::new();
    let mut index = 0;
    while let Some(child) = child_at(container, index) {
        out.push(child?);
        index += 1;
    }
    Ok(out)
}

/// Preorder search below `root`
///
/// `root` itself is never yielded. See the module docs for `depth`.
#[must_use]
pub fn find(root: &Built, targets: &[Target], depth: i32) -> Find {
    Find {
        targets: targets.to_vec(),
        max_depth: usize::try_from(depth).ok(),
        stack: vec![Frame {
            container: root.clone(),
            next: 0,
        }],
    }
}

struct Frame {
    container: Built,
    next: usize,
}

/// Lazy preorder traversal, see [`find`]
pub struct Find {
    targets: Vec<Target>,
    max_depth: Option<usize>,
    stack: Vec<Frame>,
}

impl Iterator for Find {
    type Item = Result<Built, SystemError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let level = self.stack.len().checked_sub(1)?;
            let frame = self.stack.last_mut()?;
            let index = frame.next;
            frame.next += 1;

            let Some(child) = child_at(&frame.container, index) else {
                self.stack.pop();
                if self.stack.is_empty() {
                    return None;
                }
                continue;
            };
            let child = match child {
                Ok(child) => child,
                Err(err) => return Some(Err(err)),
            };

            if child.is_container() && self.max_depth.map_or(true, |max| level < max) {
                self.stack.push(Frame {
                    container: child.clone(),
                    next: 0,
                });
            }
            if self.targets.iter().any(|t| t.matches(&child)) {
                return Some(Ok(child));
            }
        }
    }
}

impl std::fmt::Debug for Find {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Find")
            .field("targets", &self.targets)
            .field("max_depth", &self.max_depth)
            .field("pending", &self.stack.len())
            .finish()
    }
}

/// Declared search run by a filter field
///
/// A filter field builds into a [`Built::Selection`] holding every match of
/// [`find`] below the owning node. Filter fields are not sub-factories, so
/// they never show up in their own search or in another filter's.
#[derive(Debug, Clone)]
pub struct Filter {
    targets: Vec<Target>,
    depth: i32,
}

impl Filter {
    /// Search for `targets` down to `depth`
    #[must_use]
    pub fn new(targets: impl IntoIterator<Item = Target>, depth: i32) -> Self {
        Self {
            targets: targets.into_iter().collect(),
            depth,
        }
    }

    /// Targets searched for
    #[inline]
    #[must_use]
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Search depth, negative for unbounded
    #[inline]
    #[must_use]
    pub fn depth(&self) -> i32 {
        self.depth
    }

    /// Run the search below `root`
    ///
    /// # Errors
    /// Returns error if building a visited branch fails
    pub fn select(&self, root: &Built) -> Result<Vec<Built>, SystemError> {
        find(root, &self.targets, self.depth).collect()
    }
}

impl Default for Filter {
    /// Direct child nodes of any type
    fn default() -> Self {
        Self::new([Target::Node], 0)
    }
}

/// Node targets for `types`, handy for call sites listing several types
#[must_use]
pub fn targets_of(types: &[&Arc<RecordType>]) -> Vec<Target> {
    types.iter().map(|ty| Target::of(ty)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldSpec;
    use serde_json::json;

    fn tree() -> (Arc<RecordType>, Built) {
        let leaf = RecordType::builder("Leaf").finish();
        let branch = RecordType::builder("Branch")
            .field(FieldSpec::new("leaves", FieldKind::list_of(FieldKind::record(&leaf))))
            .finish();
        let root = RecordType::builder("Root")
            .field(FieldSpec::new("branch", FieldKind::record(&branch)))
            .finish();
        let built = root
            .from_value(&json!({"branch": {"leaves": [{}, {}]}}))
            .unwrap()
            .build()
            .unwrap();
        (leaf, built)
    }

    #[test]
    fn depth_counts_collections_as_a_level() {
        let (leaf, root) = tree();
        let targets = [Target::of(&leaf)];
        assert_eq!(find(&root, &targets, 0).count(), 0);
        assert_eq!(find(&root, &targets, 1).count(), 0);
        assert_eq!(find(&root, &targets, 2).count(), 2);
        assert_eq!(find(&root, &targets, -1).count(), 2);
    }

    #[test]
    fn collections_are_targets_too() {
        let (_, root) = tree();
        let lists: Vec<_> = find(&root, &[Target::List], -1)
            .map(|b| b.unwrap().path())
            .collect();
        assert_eq!(lists, ["branch.leaves"]);
        assert_eq!(children(&root).unwrap().len(), 1);
    }

    #[test]
    fn kind_matching_without_building() {
        let (leaf, _) = tree();
        assert!(Target::Node.matches_kind(&FieldKind::record(&leaf)));
        assert!(Target::List.matches_kind(&FieldKind::optional(FieldKind::list_of(FieldKind::INT))));
        assert!(!Target::Dict.matches_kind(&FieldKind::list_of(FieldKind::INT)));
        assert!(!Target::Node.matches_kind(&FieldKind::STR));
    }
}
