//! Request classification for npm registry URL shapes.
//!
//! Handles:
//! - `/lodash`, `/lodash/4.17.21` - unscoped package metadata
//! - `/@types%2fnode`, `/@types/node` - scoped package metadata
//! - `/lodash/-/lodash-4.17.21.tgz` - unscoped tarball
//! - `/@types%2fnode/-/node-18.0.0.tgz`, `/@types/node/-/node-18.0.0.tgz` - scoped tarball
//! - `/-/...` and every non-GET request - passthrough
//!
//! Every segment is percent-decoded before matching.

use std::fmt;

use percent_encoding::percent_decode_str;
use rama::http::Method;

/// Package coordinates parsed from a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// Scope including the leading `@`
    pub scope: Option<String>,
    pub name: String,
    /// Only set when the path ends in `<name>-<version>.tgz`
    pub version: Option<String>,
}

impl RouteMatch {
    /// `@scope/name` for scoped packages, `name` otherwise.
    pub fn full_name(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{scope}/{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Registry-relative tarball path, e.g. `@scope/name/-/name-1.0.0.tgz`.
    pub fn tarball_path(&self) -> Option<String> {
        let version = self.version.as_deref()?;
        Some(format!(
            "{}/-/{}-{}.tgz",
            self.full_name(),
            self.name,
            version
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `GET /favicon.ico`, answered locally
    Favicon,
    Passthrough,
    Metadata(RouteMatch),
    Tarball(RouteMatch),
}

impl Route {
    pub fn classify(method: &Method, path: &str) -> Self {
        if method != Method::GET {
            return Self::Passthrough;
        }
        if path == "/favicon.ico" {
            return Self::Favicon;
        }

        match parse_package_path(path) {
            Some(matched) if matched.version.is_some() => Self::Tarball(matched),
            Some(matched) => Self::Metadata(matched),
            None => Self::Passthrough,
        }
    }

    pub fn kind(&self) -> RouteKind {
        match self {
            Self::Favicon => RouteKind::Favicon,
            Self::Passthrough => RouteKind::Passthrough,
            Self::Metadata(_) => RouteKind::Metadata,
            Self::Tarball(_) => RouteKind::Tarball,
        }
    }
}

/// Route label for request logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Favicon,
    Passthrough,
    Metadata,
    Tarball,
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteKind::Favicon => write!(f, "favicon"),
            RouteKind::Passthrough => write!(f, "passthrough"),
            RouteKind::Metadata => write!(f, "metadata"),
            RouteKind::Tarball => write!(f, "tarball"),
        }
    }
}

fn parse_package_path(path: &str) -> Option<RouteMatch> {
    let trimmed = path.strip_prefix('/')?;
    let segments: Vec<String> = trimmed.split('/').map(decode_segment).collect();
    let (first, rest) = segments.split_first()?;

    // Registry-internal endpoints: login, whoami, search, ...
    if first.is_empty() || first == "-" {
        return None;
    }

    let (scope, name, rest) = if first.starts_with('@') {
        let (scope, name, rest) = match first.split_once('/') {
            // `@scope%2fname`
            Some((scope, name)) => (scope, name, rest),
            // `@scope/name`
            None => {
                let (name, rest) = rest.split_first()?;
                (first.as_str(), name.as_str(), rest)
            }
        };
        if scope.len() < 2 || name.is_empty() {
            return None;
        }
        (Some(scope.to_string()), name.to_string(), rest)
    } else {
        let name = first.split('@').next().filter(|s| !s.is_empty())?;
        (None, name.to_string(), rest)
    };

    let version = rest.last().and_then(|file| tarball_version(&name, file));

    Some(RouteMatch {
        scope,
        name,
        version,
    })
}

/// Percent-decodes one path segment; names, scopes and filenames all compare decoded.
fn decode_segment(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

/// Extracts the version from `<name>-<version>.tgz` when the remainder is semver.
fn tarball_version(name: &str, file: &str) -> Option<String> {
    let stem = file.strip_suffix(".tgz")?;
    let version = stem.strip_prefix(name)?.strip_prefix('-')?;
    semver::Version::parse(version).ok()?;
    Some(version.to_string())
}
