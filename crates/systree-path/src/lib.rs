//! Systree Path
//!
//! Addressing for nodes in a lazily built system tree.
//!
//! A [`NodePath`] is a sequence of [`PathStep`]s: attribute names, sequence
//! indices and mapping keys. It renders as `a.b[1]['key']` and parses back
//! from the same notation (double-quoted keys are accepted too).
//!
//! # Example
//!
//! ```rust
//! use systree_path::{NodePath, PathStep};
//!
//! let path: NodePath = "rooms['bedroom'].width".parse().unwrap();
//! assert_eq!(path.len(), 3);
//! assert_eq!(path.steps()[1], PathStep::key("bedroom"));
//! assert_eq!(path.to_string(), "rooms['bedroom'].width");
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod path;

pub use path::{NodePath, PathError, PathStep};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
