use std::fmt::Display;

use arcstr::ArcStr;
use itertools::Itertools;

use crate::{DomainError, DomainResult};

/// One segment of a dotted field path.
///
/// `userUserFollowLink/target` is a link traversal: `link` names the link type
/// and `field` names the field on the link type to continue through.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PathSegment {
    pub field: ArcStr,
    pub link: Option<ArcStr>,
}

impl PathSegment {
    pub fn field(name: impl Into<ArcStr>) -> Self {
        Self {
            field: name.into(),
            link: None,
        }
    }

    pub fn is_link_traversal(&self) -> bool {
        self.link.is_some()
    }

    fn parse(input: &str) -> Self {
        match input.split_once('/') {
            Some((link, field)) => Self {
                field: field.into(),
                link: Some(link.into()),
            },
            None => Self::field(input),
        }
    }
}

/// A parsed `a.b/c.d` field path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

impl FieldPath {
    /// Parse a client supplied path, rejecting empty segments.
    pub fn parse(input: &str) -> DomainResult<Self> {
        let path = Self::from(input);

        for segment in &path.segments {
            let empty_link = segment.link.as_ref().is_some_and(|link| link.is_empty());
            if segment.field.is_empty() || empty_link {
                return Err(DomainError::args(format!("invalid field path `{input}`")));
            }
        }

        Ok(path)
    }

    pub fn single(name: impl Into<ArcStr>) -> Self {
        Self {
            segments: vec![PathSegment::field(name)],
        }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    pub fn child(&self, name: impl Into<ArcStr>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::field(name));
        Self { segments }
    }

    pub fn concat(&self, other: &FieldPath) -> Self {
        Self {
            segments: self
                .segments
                .iter()
                .chain(other.segments.iter())
                .cloned()
                .collect(),
        }
    }

    pub fn has_link_traversal(&self) -> bool {
        self.segments.iter().any(PathSegment::is_link_traversal)
    }

    /// The plain field names, usable as object keys when no link traversal is involved
    pub fn field_names(&self) -> impl Iterator<Item = &ArcStr> {
        self.segments.iter().map(|segment| &segment.field)
    }
}

/// Lenient conversion used when declaring schemas; malformed paths are reported by registry validation.
impl From<&str> for FieldPath {
    fn from(value: &str) -> Self {
        Self {
            segments: value.split('.').map(PathSegment::parse).collect(),
        }
    }
}

impl FromIterator<PathSegment> for FieldPath {
    fn from_iter<T: IntoIterator<Item = PathSegment>>(iter: T) -> Self {
        Self {
            segments: iter.into_iter().collect(),
        }
    }
}

impl Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.link {
            Some(link) => write!(f, "{link}/{}", self.field),
            None => write!(f, "{}", self.field),
        }
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.iter().format("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_link_traversal() {
        let path = FieldPath::parse("createdBy.userUserFollowLink/target.name").unwrap();

        assert_eq!(3, path.len());
        assert!(!path.segments()[0].is_link_traversal());
        assert_eq!(
            Some("userUserFollowLink"),
            path.segments()[1].link.as_deref()
        );
        assert_eq!("target", path.segments()[1].field.as_str());
        assert_eq!("createdBy.userUserFollowLink/target.name", path.to_string());
        assert!(path.has_link_traversal());
    }

    #[test]
    fn parse_rejects_empty_segments() {
        assert!(FieldPath::parse("a..b").is_err());
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("/target").is_err());
    }
}
