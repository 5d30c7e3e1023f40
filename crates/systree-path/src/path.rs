//! Node paths for addressing within a system tree
//!
//! Provides [`NodePath`] for hierarchical addressing of nodes reached by
//! attribute access, sequence index or mapping key.

use smallvec::SmallVec;
use std::fmt::{self, Display, Formatter, Write as _};
use std::str::FromStr;

/// One step from a container to one of its children
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathStep {
    /// Named attribute, rendered `.name`
    Attr(String),

    /// Position in an ordered collection, rendered `[index]`
    Index(usize),

    /// Key in a keyed collection, rendered `['key']`
    Key(String),
}

impl PathStep {
    /// Attribute step
    #[inline]
    #[must_use]
    pub fn attr(name: impl Into<String>) -> Self {
        Self::Attr(name.into())
    }

    /// Key step
    #[inline]
    #[must_use]
    pub fn key(key: impl Into<String>) -> Self {
        Self::Key(key.into())
    }

    /// Attribute name, if this is an attribute step
    #[inline]
    #[must_use]
    pub fn as_attr(&self) -> Option<&str> {
        match self {
            Self::Attr(name) => Some(name),
            _ => None,
        }
    }
}

impl Display for PathStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attr(name) => f.write_str(name),
            Self::Index(index) => write!(f, "[{index}]"),
            Self::Key(key) => {
                f.write_str("['")?;
                for c in key.chars() {
                    if c == '\'' || c == '\\' {
                        f.write_char('\\')?;
                    }
                    f.write_char(c)?;
                }
                f.write_str("']")
            }
        }
    }
}

/// Path from the root of a system tree to one of its nodes
///
/// The root itself has the empty path. Attribute steps are joined with `.`,
/// collection steps are appended in brackets.
///
/// # Examples
/// - `[Attr("bedroom"), Attr("window")]` → `bedroom.window`
/// - `[Attr("rooms"), Index(1)]` → `rooms[1]`
/// - `[Attr("rooms"), Key("bedroom"), Attr("width")]` → `rooms['bedroom'].width`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodePath(SmallVec<[PathStep; 4]>);

impl NodePath {
    /// Create new path from steps
    #[inline]
    #[must_use]
    pub fn new(steps: impl IntoIterator<Item = PathStep>) -> Self {
        Self(steps.into_iter().collect())
    }

    /// Empty path (root)
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self(SmallVec::new())
    }

    /// Get path steps
    #[inline]
    #[must_use]
    pub fn steps(&self) -> &[PathStep] {
        &self.0
    }

    /// Get number of steps
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if path is empty (root)
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get parent path (if not root)
    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.split_last().map(|(_, parent)| Self(parent.iter().cloned().collect()))
    }

    /// Last step and the steps leading to it
    #[inline]
    #[must_use]
    pub fn split_last(&self) -> Option<(&PathStep, &[PathStep])> {
        self.0.split_last()
    }

    /// Get last step (if not root)
    #[inline]
    #[must_use]
    pub fn last(&self) -> Option<&PathStep> {
        self.0.last()
    }

    /// Append a step, returning new path
    #[inline]
    #[must_use]
    pub fn child(&self, step: PathStep) -> Self {
        let mut new = self.clone();
        new.0.push(step);
        new
    }

    /// Append a step in place
    #[inline]
    pub fn push(&mut self, step: PathStep) {
        self.0.push(step);
    }

    /// Check if this path is a prefix of another
    ///
    /// # Examples
    /// - `rooms` is prefix of `rooms[1].width`
    /// - `rooms` is NOT prefix of `garage`
    #[inline]
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.0.len() <= other.0.len() && self.0[..] == other.0[..self.0.len()]
    }

    /// Iterator over steps from root to leaf
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &PathStep> {
        self.0.iter()
    }
}

impl Display for NodePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 && matches!(step, PathStep::Attr(_)) {
                f.write_char('.')?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

impl FromStr for NodePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Parser { src: s, pos: 0 }.parse()
    }
}

impl From<Vec<PathStep>> for NodePath {
    fn from(steps: Vec<PathStep>) -> Self {
        Self(SmallVec::from_vec(steps))
    }
}

impl FromIterator<PathStep> for NodePath {
    fn from_iter<I: IntoIterator<Item = PathStep>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Errors related to node paths
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Empty attribute name in path
    #[error("path '{path}' has an empty segment at {position}")]
    EmptySegment { path: String, position: usize },

    /// Character not allowed at this point
    #[error("path '{path}': unexpected '{found}' at {position}")]
    UnexpectedChar {
        path: String,
        position: usize,
        found: char,
    },

    /// Bracket or quote never closed
    #[error("path '{path}' is unterminated")]
    Unterminated { path: String },

    /// Index is not a non-negative integer
    #[error("path '{path}': invalid index '{text}'")]
    InvalidIndex { path: String, text: String },
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn parse(mut self) -> Result<NodePath, PathError> {
        let mut path = NodePath::root();
        while let Some(c) = self.peek() {
            match c {
                '.' if !path.is_empty() => {
                    self.bump();
                    path.push(self.ident()?);
                }
                '[' => {
                    self.bump();
                    path.push(self.bracket()?);
                }
                _ if path.is_empty() => path.push(self.ident()?),
                found => return Err(self.unexpected(found)),
            }
        }
        Ok(path)
    }

    fn ident(&mut self) -> Result<PathStep, PathError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.bump();
            } else {
                break;
            }
        }
        if start == self.pos {
            return match self.peek() {
                None | Some('.' | '[') => Err(PathError::EmptySegment {
                    path: self.src.to_string(),
                    position: self.pos,
                }),
                Some(found) => Err(self.unexpected(found)),
            };
        }
        Ok(PathStep::Attr(self.src[start..self.pos].to_string()))
    }

    fn bracket(&mut self) -> Result<PathStep, PathError> {
        let step = match self.peek() {
            Some(quote @ ('\'' | '"')) => {
                self.bump();
                PathStep::Key(self.quoted(quote)?)
            }
            Some(c) if c.is_ascii_digit() || c == '-' => {
                let start = self.pos;
                self.bump();
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
                let text = &self.src[start..self.pos];
                let index = text.parse::<usize>().map_err(|_| PathError::InvalidIndex {
                    path: self.src.to_string(),
                    text: text.to_string(),
                })?;
                PathStep::Index(index)
            }
            Some(found) => return Err(self.unexpected(found)),
            None => return Err(self.unterminated()),
        };
        match self.bump() {
            Some(']') => Ok(step),
            Some(found) => Err(PathError::UnexpectedChar {
                path: self.src.to_string(),
                position: self.pos - found.len_utf8(),
                found,
            }),
            None => Err(self.unterminated()),
        }
    }

    fn quoted(&mut self, quote: char) -> Result<String, PathError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some(c) => out.push(c),
                    None => return Err(self.unterminated()),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
                None => return Err(self.unterminated()),
            }
        }
    }

    fn unexpected(&self, found: char) -> PathError {
        PathError::UnexpectedChar {
            path: self.src.to_string(),
            position: self.pos,
            found,
        }
    }

    fn unterminated(&self) -> PathError {
        PathError::Unterminated {
            path: self.src.to_string(),
        }
    }
}
