//! Error types for the system tree
//!
//! Every failure surfaces to the immediate caller as one of:
//! - [`ValidationError`]: raw data does not fit a record type
//! - [`MutationError`]: write to a read-only field
//! - [`LookupError`]: unknown registered name or missing child
//! - [`PatchError`]: setup path cannot be resolved
//! - [`BuildError`]: record type cannot produce a runtime value

use systree_path::PathError;

/// Main system tree error type
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    /// Raw value does not coerce into the declared type
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Write refused by the mutation guard
    #[error(transparent)]
    Mutation(#[from] MutationError),

    /// Unknown name
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// Setup patch path could not be applied
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// Record cannot be built
    #[error(transparent)]
    Build(#[from] BuildError),
}

impl SystemError {
    /// Check if this is a validation failure
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is a mutation guard failure
    #[inline]
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Mutation(_))
    }

    /// Check if this is a lookup failure
    #[inline]
    #[must_use]
    pub fn is_lookup(&self) -> bool {
        matches!(self, Self::Lookup(_))
    }

    /// Check if this is a setup patch failure
    #[inline]
    #[must_use]
    pub fn is_patch(&self) -> bool {
        matches!(self, Self::Patch(_))
    }

    /// Check if this is a build failure
    #[inline]
    #[must_use]
    pub fn is_build(&self) -> bool {
        matches!(self, Self::Build(_))
    }
}

/// One failed candidate during union resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberAttempt {
    /// Record type name of the candidate
    pub member: String,
    /// Why it was rejected
    pub reason: String,
}

/// Record validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Required field has no value and no default
    #[error("{at}: missing required field '{field}'")]
    Missing { at: String, field: String },

    /// Field not declared on a closed record type
    #[error("{at}: unknown field '{field}' on {record}")]
    UnknownField {
        at: String,
        record: String,
        field: String,
    },

    /// Value has the wrong shape for the declared type
    #[error("{at}: expected {expected}, found {found}")]
    TypeMismatch {
        at: String,
        expected: String,
        found: String,
    },

    /// Discriminated type is not acceptable for the field
    #[error("{at}: '{name}' is not a {expected}")]
    NotASubtype {
        at: String,
        name: String,
        expected: String,
    },

    /// No union member validated the value
    #[error("{at}: no member matched, tried [{}]", format_attempts(.attempts))]
    NoMatchingMember {
        at: String,
        attempts: Vec<MemberAttempt>,
    },
}

impl ValidationError {
    /// Location inside the record tree where validation failed
    #[must_use]
    pub fn at(&self) -> &str {
        match self {
            Self::Missing { at, .. }
            | Self::UnknownField { at, .. }
            | Self::TypeMismatch { at, .. }
            | Self::NotASubtype { at, .. }
            | Self::NoMatchingMember { at, .. } => at,
        }
    }
}

fn format_attempts(attempts: &[MemberAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.member, a.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Mutation guard errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    /// Record type does not allow direct assignment
    #[error("cannot assign '{field}' on {record} at '{path}': {record} is read-only")]
    ReadOnly {
        record: String,
        field: String,
        path: String,
    },
}

/// Registry and child lookup errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// Name is not registered
    #[error("unknown record type '{name}' (known: {})", .known.join(", "))]
    UnknownName { name: String, known: Vec<String> },

    /// Qualified lookup matched more than one entry
    #[error("'{name}' is ambiguous between {}", .candidates.join(", "))]
    Ambiguous {
        name: String,
        candidates: Vec<String>,
    },

    /// Name already registered to a different type
    #[error("'{name}' is already registered to a different record type")]
    Duplicate { name: String },

    /// Registered type does not produce nodes
    #[error("'{name}' does not produce a system type")]
    NoSystemType { name: String },

    /// Node has no such field
    #[error("{record} at '{path}' has no field '{field}'")]
    NoField {
        record: String,
        path: String,
        field: String,
    },

    /// Index past the end of an ordered collection
    #[error("index {index} out of range for '{path}' of length {len}")]
    NoIndex {
        path: String,
        index: usize,
        len: usize,
    },

    /// Key missing from a keyed collection
    #[error("no key '{key}' in '{path}'")]
    NoKey { path: String, key: String },

    /// Built value is not of the requested kind
    #[error("'{path}' is {found}, not {expected}")]
    WrongKind {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Setup patch errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    /// Path expression does not parse
    #[error("invalid setup path: {0}")]
    Parse(#[from] PathError),

    /// Setup payload is not a mapping of paths to values
    #[error("setup must map paths to values, found {found}")]
    NotAMapping { found: String },

    /// Empty path cannot be assigned
    #[error("setup path is empty")]
    EmptyPath,

    /// Step does not exist in the tree
    #[error("setup path '{path}': no step '{step}'")]
    NoSuchStep { path: String, step: String },

    /// Step kind does not fit the value it is applied to
    #[error("setup path '{path}': step '{step}' cannot be applied to {found}")]
    WrongContainer {
        path: String,
        step: String,
        found: &'static str,
    },
}

/// Build errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// Record type declares no build capability
    #[error("record type {record} cannot be built")]
    NotBuildable { record: String },

    /// Custom factory failed
    #[error("building {record} at '{path}' failed: {reason}")]
    Failed {
        record: String,
        path: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_failure_lists_all_members() {
        let err = ValidationError::NoMatchingMember {
            at: "M.f".into(),
            attempts: vec![
                MemberAttempt {
                    member: "A".into(),
                    reason: "bad".into(),
                },
                MemberAttempt {
                    member: "B".into(),
                    reason: "worse".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("A: bad"));
        assert!(msg.contains("B: worse"));
        assert_eq!(err.at(), "M.f");
    }

    #[test]
    fn system_error_classification() {
        let err: SystemError = BuildError::NotBuildable {
            record: "Base".into(),
        }
        .into();
        assert!(err.is_build());
        assert!(!err.is_validation());

        let err: SystemError = PatchError::EmptyPath.into();
        assert!(err.is_patch());
    }

    #[test]
    fn lookup_error_names_known_types() {
        let err = LookupError::UnknownName {
            name: "Attic".into(),
            known: vec!["House".into(), "Room".into()],
        };
        assert_eq!(
            err.to_string(),
            "unknown record type 'Attic' (known: House, Room)"
        );
    }
}
