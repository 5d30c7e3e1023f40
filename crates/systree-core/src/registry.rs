//! Record type registry
//!
//! Maps names to record types so raw data can name the concrete type it
//! wants through the discriminator key. Names may be qualified as
//! `namespace:kind/name`; a lookup by any suffix form (`kind/name`, `name`,
//! `namespace:name`) finds the entry as long as it is unique.
//!
//! A process-wide registry is available through [`global`] and the free
//! functions of this module; local [`Registry`] values are useful in tests.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::LookupError;
use crate::schema::RecordType;
use crate::settings::{DuplicatePolicy, Settings};

/// Registered name split into its parts
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    /// Namespace before `:`
    pub namespace: Option<String>,
    /// Kind before `/`
    pub kind: Option<String>,
    /// Plain name
    pub name: String,
}

impl QualifiedName {
    /// Check if `query` names this entry
    ///
    /// Parts the query leaves out match anything.
    #[must_use]
    pub fn matches(&self, query: &QualifiedName) -> bool {
        fn part(entry: Option<&String>, query: Option<&String>) -> bool {
            query.map_or(true, |q| entry == Some(q))
        }
        self.name == query.name
            && part(self.namespace.as_ref(), query.namespace.as_ref())
            && part(self.kind.as_ref(), query.kind.as_ref())
    }
}

impl FromStr for QualifiedName {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(split_name(s))
    }
}

impl Display for QualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(namespace) = &self.namespace {
            write!(f, "{namespace}:")?;
        }
        if let Some(kind) = &self.kind {
            write!(f, "{kind}/")?;
        }
        f.write_str(&self.name)
    }
}

/// Split `namespace:kind/name` into its parts
///
/// ```
/// use systree_core::registry::split_name;
///
/// let q = split_name("Test:Thing/House");
/// assert_eq!(q.namespace.as_deref(), Some("Test"));
/// assert_eq!(q.kind.as_deref(), Some("Thing"));
/// assert_eq!(q.name, "House");
/// ```
#[must_use]
pub fn split_name(s: &str) -> QualifiedName {
    let (namespace, rest) = match s.split_once(':') {
        Some((namespace, rest)) => (Some(namespace.to_string()), rest),
        None => (None, s),
    };
    let (kind, name) = match rest.split_once('/') {
        Some((kind, name)) => (Some(kind.to_string()), name),
        None => (None, rest),
    };
    QualifiedName {
        namespace,
        kind,
        name: name.to_string(),
    }
}

#[derive(Debug, Clone)]
struct Entry {
    name: QualifiedName,
    ty: Arc<RecordType>,
}

/// Name to record type mapping
#[derive(Debug, Default)]
pub struct Registry {
    settings: Settings,
    entries: IndexMap<String, Entry>,
}

impl Registry {
    /// Create an empty registry with default settings
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry with `settings`
    #[inline]
    #[must_use]
    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings,
            entries: IndexMap::new(),
        }
    }

    /// Current settings
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace settings
    #[inline]
    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    /// Register `ty` under `name`
    ///
    /// Registering the same type under the same name again is a no-op.
    ///
    /// # Errors
    /// Returns error if the name is taken by a different type and the
    /// duplicate policy rejects it
    pub fn register(&mut self, name: &str, ty: &Arc<RecordType>) -> Result<(), LookupError> {
        if let Some(existing) = self.entries.get(name) {
            if Arc::ptr_eq(&existing.ty, ty) {
                return Ok(());
            }
            if self.settings.duplicate_policy == DuplicatePolicy::Reject {
                return Err(LookupError::Duplicate {
                    name: name.to_string(),
                });
            }
            tracing::warn!(name, "overwriting registered record type");
            // re-registration moves the entry to the most-recent position
            self.entries.shift_remove(name);
        }
        tracing::debug!(name, record = %ty.name(), "registered record type");
        self.entries.insert(
            name.to_string(),
            Entry {
                name: split_name(name),
                ty: Arc::clone(ty),
            },
        );
        Ok(())
    }

    /// Register `ty` under its own name
    ///
    /// # Errors
    /// See [`Registry::register`]
    #[inline]
    pub fn register_type(&mut self, ty: &Arc<RecordType>) -> Result<(), LookupError> {
        self.register(ty.name(), ty)
    }

    /// Resolve a name
    ///
    /// An exact match wins; otherwise every entry whose qualified name
    /// matches the parts given in `name` is a candidate.
    ///
    /// # Errors
    /// Returns error if nothing or more than one entry matches
    pub fn lookup(&self, name: &str) -> Result<Arc<RecordType>, LookupError> {
        if let Some(entry) = self.entries.get(name) {
            return Ok(Arc::clone(&entry.ty));
        }
        let query = split_name(name);
        let mut matches = self.entries.iter().filter(|(_, e)| e.name.matches(&query));
        match (matches.next(), matches.next()) {
            (Some((_, entry)), None) => Ok(Arc::clone(&entry.ty)),
            (None, _) => Err(LookupError::UnknownName {
                name: name.to_string(),
                known: self.names(),
            }),
            (Some(_), Some(_)) => Err(LookupError::Ambiguous {
                name: name.to_string(),
                candidates: self
                    .entries
                    .iter()
                    .filter(|(_, e)| e.name.matches(&query))
                    .map(|(key, _)| key.clone())
                    .collect(),
            }),
        }
    }

    /// Check if `name` resolves to a registered type
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_ok()
    }

    /// Check if `name` resolves to a buildable record type
    #[inline]
    #[must_use]
    pub fn is_record_type(&self, name: &str) -> bool {
        self.lookup(name).is_ok_and(|ty| ty.is_buildable())
    }

    /// Node type produced by the record type registered under `name`
    ///
    /// # Errors
    /// Returns error if the name is unknown or the type builds no nodes
    pub fn system_type(&self, name: &str) -> Result<Arc<RecordType>, LookupError> {
        self.lookup(name)?
            .produced_type()
            .ok_or_else(|| LookupError::NoSystemType {
                name: name.to_string(),
            })
    }

    /// Buildable registered types extending `base`, most recently
    /// registered first
    #[must_use]
    pub fn candidates(&self, base: &RecordType) -> Vec<Arc<RecordType>> {
        let mut out: Vec<Arc<RecordType>> = Vec::new();
        for entry in self.entries.values().rev() {
            if entry.ty.is_buildable()
                && entry.ty.extends(base)
                && !out.iter().any(|ty| Arc::ptr_eq(ty, &entry.ty))
            {
                out.push(Arc::clone(&entry.ty));
            }
        }
        out
    }

    /// Registered names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Number of registered names
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove a registration by its exact name
    pub fn remove(&mut self, name: &str) -> Option<Arc<RecordType>> {
        self.entries.shift_remove(name).map(|entry| entry.ty)
    }
}

static GLOBAL: Lazy<RwLock<Registry>> = Lazy::new(|| RwLock::new(Registry::new()));

/// Process-wide registry
#[inline]
pub fn global() -> &'static RwLock<Registry> {
    &GLOBAL
}

/// Register `ty` under `name` in the global registry
///
/// # Errors
/// See [`Registry::register`]
pub fn register(name: &str, ty: &Arc<RecordType>) -> Result<(), LookupError> {
    GLOBAL.write().register(name, ty)
}

/// Register `ty` under its own name in the global registry
///
/// # Errors
/// See [`Registry::register`]
pub fn register_type(ty: &Arc<RecordType>) -> Result<(), LookupError> {
    GLOBAL.write().register_type(ty)
}

/// Resolve a name in the global registry
///
/// # Errors
/// See [`Registry::lookup`]
pub fn lookup(name: &str) -> Result<Arc<RecordType>, LookupError> {
    GLOBAL.read().lookup(name)
}

/// Node type produced by a globally registered record type
///
/// # Errors
/// See [`Registry::system_type`]
pub fn system_type(name: &str) -> Result<Arc<RecordType>, LookupError> {
    GLOBAL.read().system_type(name)
}

/// Replace the global settings
pub fn configure_global(settings: Settings) {
    tracing::debug!(?settings, "configuring global registry");
    GLOBAL.write().set_settings(settings);
}

/// Snapshot of the global settings
#[must_use]
pub fn settings() -> Settings {
    GLOBAL.read().settings().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ty(name: &str) -> Arc<RecordType> {
        RecordType::builder(name).finish()
    }

    #[test]
    fn split_name_forms() {
        let cases = [
            ("ns:kind/name", (Some("ns"), Some("kind"), "name")),
            ("kind/name", (None, Some("kind"), "name")),
            ("name", (None, None, "name")),
            ("ns:name", (Some("ns"), None, "name")),
        ];
        for (input, (namespace, kind, name)) in cases {
            let q = split_name(input);
            assert_eq!(q.namespace.as_deref(), namespace, "{input}");
            assert_eq!(q.kind.as_deref(), kind, "{input}");
            assert_eq!(q.name, name, "{input}");
            assert_eq!(q.to_string(), input);
        }
    }

    #[test]
    fn lookup_by_suffix() {
        let house = ty("House");
        let mut reg = Registry::new();
        reg.register("Test:Thing/House", &house).unwrap();

        for query in ["Test:Thing/House", "Thing/House", "House", "Test:House"] {
            let found = reg.lookup(query).unwrap();
            assert!(Arc::ptr_eq(&found, &house), "{query}");
        }
        assert!(reg.lookup("Other:House").is_err());
        assert!(reg.lookup("Barn").is_err());
    }

    #[test]
    fn ambiguous_lookup() {
        let mut reg = Registry::new();
        reg.register("a:House", &ty("House")).unwrap();
        reg.register("b:House", &ty("House")).unwrap();
        let err = reg.lookup("House").unwrap_err();
        assert!(matches!(err, LookupError::Ambiguous { .. }));
        assert!(reg.lookup("a:House").is_ok());
    }

    #[test]
    fn duplicate_policy() {
        let mut reg = Registry::new();
        let first = ty("Room");
        reg.register_type(&first).unwrap();
        reg.register_type(&first).unwrap();
        assert_eq!(reg.len(), 1);

        let err = reg.register_type(&ty("Room")).unwrap_err();
        assert_eq!(
            err,
            LookupError::Duplicate {
                name: "Room".into()
            }
        );

        reg.set_settings(Settings::new().with_duplicate_policy(DuplicatePolicy::Overwrite));
        let second = ty("Room");
        reg.register_type(&second).unwrap();
        assert!(Arc::ptr_eq(&reg.lookup("Room").unwrap(), &second));
    }

    #[test]
    fn candidates_most_recent_first() {
        let base = RecordType::builder("Base").unbuildable().finish();
        let f = RecordType::builder("F").extends(&base).builds_nodes().finish();
        let f2 = RecordType::builder("F2").extends(&base).builds_nodes().finish();
        let other = ty("Other");

        let mut reg = Registry::new();
        for t in [&base, &f, &other, &f2] {
            reg.register_type(t).unwrap();
        }
        let names: Vec<_> = reg
            .candidates(&base)
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, ["F2", "F"]);
    }

    #[test]
    fn system_type_of_factory() {
        let system = ty("Room");
        let factory = RecordType::builder("RoomFactory")
            .build_with(|_, _| Ok(crate::Built::Null))
            .produces(&system)
            .finish();
        let plain = RecordType::builder("Plain")
            .build_with(|_, _| Ok(crate::Built::Null))
            .finish();

        let mut reg = Registry::new();
        reg.register_type(&factory).unwrap();
        reg.register_type(&plain).unwrap();
        assert!(Arc::ptr_eq(&reg.system_type("RoomFactory").unwrap(), &system));
        assert!(matches!(
            reg.system_type("Plain"),
            Err(LookupError::NoSystemType { .. })
        ));
    }

    #[test]
    fn remove_entry() {
        let mut reg = Registry::new();
        reg.register_type(&ty("Room")).unwrap();
        assert!(reg.remove("Room").is_some());
        assert!(reg.is_empty());
        assert!(!reg.contains("Room"));
    }
}
