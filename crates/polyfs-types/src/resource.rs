//! Scheme-addressed resource identifiers.
//!
//! A [`Resource`] is an opaque URI of the form `scheme://authority/path`.
//! URI parsing itself is delegated to the `url` crate; this module adds
//! the path algebra the service needs: parent/child navigation, ancestor
//! tests, and canonical keys honoring provider case sensitivity.

use std::fmt;
use url::Url;

/// A resource identifier: `scheme://authority/path?query#fragment`.
///
/// Two resources are equivalent if their canonical string forms match.
/// Case sensitivity is a property of the provider, not the resource, so
/// case-normalized comparisons go through [`Resource::canonical_key`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Resource(Url);

impl Resource {
    /// Parse a resource from its string form.
    pub fn parse(input: &str) -> Result<Self, url::ParseError> {
        Url::parse(input).map(Self)
    }

    /// The URI scheme, always lowercase.
    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }

    /// The authority component (may be empty).
    pub fn authority(&self) -> &str {
        self.0.authority()
    }

    /// The path component, percent-encoded, including the leading `/`
    /// for hierarchical URIs.
    pub fn path(&self) -> &str {
        self.0.path()
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// True if the path component is absolute (starts with `/`).
    pub fn has_absolute_path(&self) -> bool {
        self.0.path().starts_with('/')
    }

    /// The canonical key for table lookups: the string form, lowercased
    /// iff the owning provider is case-insensitive.
    pub fn canonical_key(&self, case_sensitive: bool) -> String {
        if case_sensitive {
            self.0.as_str().to_string()
        } else {
            self.0.as_str().to_lowercase()
        }
    }

    /// The last path segment, or `""` for the root.
    pub fn name(&self) -> &str {
        let path = self.0.path().trim_end_matches('/');
        match path.rfind('/') {
            Some(idx) => &path[idx + 1..],
            None => path,
        }
    }

    /// The resource one level up, or `None` at the root.
    pub fn parent(&self) -> Option<Resource> {
        let path = self.0.path().trim_end_matches('/');
        if path.is_empty() {
            return None;
        }
        let idx = path.rfind('/')?;
        let parent_path = if idx == 0 { "/" } else { &path[..idx] };
        let mut url = self.0.clone();
        url.set_path(parent_path);
        url.set_query(None);
        url.set_fragment(None);
        Some(Resource(url))
    }

    /// A child of this resource with the given name appended as one
    /// path segment.
    pub fn join(&self, name: &str) -> Resource {
        let mut url = self.0.clone();
        let base = self.0.path().trim_end_matches('/');
        url.set_path(&format!("{base}/{name}"));
        Resource(url)
    }

    /// The non-empty path segments, in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.path().split('/').filter(|s| !s.is_empty())
    }

    /// True if `self` and `other` identify the same resource under the
    /// given case sensitivity.
    pub fn is_equal(&self, other: &Resource, case_sensitive: bool) -> bool {
        if case_sensitive {
            self == other
        } else {
            self.canonical_key(false) == other.canonical_key(false)
        }
    }

    /// True if `self` is `other` or a path ancestor of `other`.
    pub fn is_equal_or_parent_of(&self, other: &Resource, case_sensitive: bool) -> bool {
        let a = self.canonical_key(case_sensitive);
        let b = other.canonical_key(case_sensitive);
        if a == b {
            return true;
        }
        let prefix = if a.ends_with('/') { a } else { format!("{a}/") };
        b.starts_with(&prefix)
    }

    /// Human-readable form for error messages: the filesystem path for
    /// the `file` scheme, the full URI string otherwise.
    pub fn to_user_string(&self) -> String {
        if self.0.scheme() == "file" {
            self.0.path().to_string()
        } else {
            self.0.as_str().to_string()
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resource({})", self.0.as_str())
    }
}

impl std::str::FromStr for Resource {
    type Err = url::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Url> for Resource {
    fn from(url: Url) -> Self {
        Self(url)
    }
}
