//! Systree Core
//!
//! Declarative record types resolved into lazily built system trees:
//! - Record types declare fields, defaults and policies, with inheritance
//! - Raw data (JSON, YAML, anything `serde`) is validated into [`Record`]s
//! - A discriminator key selects registered subtypes at any depth
//! - Building a record yields a [`Node`] whose sub-factories are built on
//!   first access and cached
//! - Nodes and collections know their path from the root at all times
//! - Trees can be searched by type and patched by path
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use systree_core::prelude::*;
//!
//! # fn main() -> Result<(), SystemError> {
//! let window = RecordType::builder("Window")
//!     .field(FieldSpec::new("panes", FieldKind::INT).with_default(2))
//!     .finish();
//! let room = RecordType::builder("Room")
//!     .field(FieldSpec::new("width", FieldKind::FLOAT).with_default(1.0))
//!     .field(FieldSpec::new("window", FieldKind::record(&window)))
//!     .finish();
//! let house = RecordType::builder("House")
//!     .field(FieldSpec::new("rooms", FieldKind::dict_of(FieldKind::record(&room))))
//!     .finish();
//!
//! let root = house
//!     .from_value(&json!({"rooms": {"hall": {"width": 4}}}))?
//!     .build_node()?;
//! let hall = root.dict("rooms")?.node("hall")?;
//! assert_eq!(hall.path(), "rooms['hall']");
//! assert_eq!(hall.child("window")?.path(), "rooms['hall'].window");
//!
//! let windows = root.find(&[Target::of(&window)], -1).count();
//! assert_eq!(windows, 1);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod built;
mod coerce;
mod collection;
mod error;
mod field;
mod node;
mod record;
mod schema;
mod settings;

pub mod patch;
pub mod registry;
pub mod traverse;

pub use built::{BuildContext, Built, ParentLink};
pub use collection::{NodeDict, NodeList};
pub use error::{
    BuildError, LookupError, MemberAttempt, MutationError, PatchError, SystemError,
    ValidationError,
};
pub use field::{DefaultFn, FieldDefault, FieldKind, FieldSpec, ScalarKind};
pub use node::Node;
pub use patch::Setup;
pub use record::{FieldInput, FieldValue, Record};
pub use registry::{QualifiedName, Registry};
pub use schema::{BuildFn, ExtraPolicy, Factory, RecordType, RecordTypeBuilder};
pub use settings::{DuplicatePolicy, Settings};
pub use systree_path::{NodePath, PathError, PathStep};
pub use traverse::{Filter, Find, Target};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for declaring record types and walking system trees
    pub use crate::{
        Built, FieldKind, FieldSpec, Node, NodeDict, NodeList, Record, RecordType, Setup,
        SystemError, Target,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
