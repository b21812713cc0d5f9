//! Fully-qualified function names.
//!
//! An FQFN uniquely names a function across the mesh and doubles as the
//! routing topic for invocations. Canonical form:
//!
//! ```text
//! identifier#namespace::name@version
//! ```
//!
//! A bare name (`resize`) parses with an empty identifier and version and the
//! default namespace, which is how a node running a loose module names itself.

use std::fmt;

/// Namespace used when none is given.
pub const NAMESPACE_DEFAULT: &str = "default";

/// Parsed fully-qualified function name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fqfn {
    pub identifier: String,
    pub namespace: String,
    pub name: String,
    pub version: String,
}

impl Fqfn {
    /// Parse an FQFN string. Never fails; missing parts are left empty.
    pub fn parse(input: &str) -> Self {
        let (identifier, rest) = match input.split_once('#') {
            Some((ident, rest)) => (ident.to_string(), rest),
            None => (String::new(), input),
        };

        let (namespace, rest) = match rest.split_once("::") {
            Some((ns, rest)) => (ns.to_string(), rest),
            None => (NAMESPACE_DEFAULT.to_string(), rest),
        };

        let (name, version) = match rest.rsplit_once('@') {
            Some((name, version)) => (name.to_string(), version.to_string()),
            None => (rest.to_string(), String::new()),
        };

        Self {
            identifier,
            namespace,
            name,
            version,
        }
    }

    /// Build an FQFN from its parts.
    pub fn from_parts(
        identifier: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let namespace = namespace.into();
        Self {
            identifier: identifier.into(),
            namespace: if namespace.is_empty() {
                NAMESPACE_DEFAULT.to_string()
            } else {
                namespace
            },
            name: name.into(),
            version: version.into(),
        }
    }

    /// True when the name carries an application identifier.
    pub fn is_qualified(&self) -> bool {
        !self.identifier.is_empty()
    }
}

impl fmt::Display for Fqfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_qualified() {
            return write!(f, "{}", self.name);
        }
        write!(f, "{}#{}::{}", self.identifier, self.namespace, self.name)?;
        if !self.version.is_empty() {
            write!(f, "@{}", self.version)?;
        }
        Ok(())
    }
}
