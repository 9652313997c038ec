//! Platform-tagged path values.
//!
//! [`EnvPath`] is an absolute path that remembers which environment it belongs
//! to (via its [`Descriptor`]) and therefore which syntax rules apply.
//! [`RelativePath`] is a bare sequence of segments that only becomes
//! meaningful once resolved against an `EnvPath`.
//!
//! ```text
//!   EnvPath { descriptor: local/posix, root: "/",       parts: [home, amy] }  → /home/amy
//!   EnvPath { descriptor: box/windows, root: "C:\",     parts: [Users]     }  → C:\Users
//!   EnvPath { descriptor: box/windows, root: "\\srv\s\", parts: [docs]     }  → \\srv\s\docs
//! ```
//!
//! Parsing drops empty and `.` segments but keeps `..` verbatim: collapsing it
//! lexically changes meaning in the presence of symlinks, so that is an
//! explicit [`EnvPath::normalize`] call.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{Descriptor, OsFamily};

/// Characters Windows refuses inside a path segment.
const WINDOWS_RESERVED: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Errors from building or combining paths.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path is not absolute: {0:?}")]
    NotAbsolute(String),
    #[error("invalid character {ch:?} in segment {segment:?}")]
    InvalidCharacter { segment: String, ch: char },
    #[error("invalid segment {0:?}")]
    InvalidSegment(String),
    #[error("path belongs to environment {actual}, expected {expected}")]
    EnvironmentMismatch {
        expected: Descriptor,
        actual: Descriptor,
    },
}

fn check_segment(os: OsFamily, segment: &str) -> Result<(), PathError> {
    if segment.is_empty() {
        return Err(PathError::InvalidSegment(segment.to_string()));
    }
    let bad = segment.chars().find(|&ch| match os {
        OsFamily::Posix => ch == '\0' || ch == '/',
        OsFamily::Windows => {
            (ch as u32) < 0x20 || ch == '\\' || ch == '/' || WINDOWS_RESERVED.contains(&ch)
        }
    });
    match bad {
        Some(ch) => Err(PathError::InvalidCharacter {
            segment: segment.to_string(),
            ch,
        }),
        None => Ok(()),
    }
}

fn segment_eq(os: OsFamily, a: &str, b: &str) -> bool {
    match os {
        OsFamily::Posix => a == b,
        OsFamily::Windows => a.eq_ignore_ascii_case(b),
    }
}

/// An absolute path inside one specific environment.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvPath {
    descriptor: Descriptor,
    root: String,
    parts: Vec<String>,
}

impl EnvPath {
    /// Parse an absolute path written in the environment's own syntax.
    ///
    /// Windows paths accept both `\` and `/` as separators and either a drive
    /// root (`C:\`) or a UNC root (`\\server\share`).
    pub fn parse(raw: &str, descriptor: Descriptor) -> Result<Self, PathError> {
        let (root, rest) = match descriptor.os_family {
            OsFamily::Posix => {
                let rest = raw
                    .strip_prefix('/')
                    .ok_or_else(|| PathError::NotAbsolute(raw.to_string()))?;
                ("/".to_string(), rest.to_string())
            }
            OsFamily::Windows => Self::split_windows_root(raw)?,
        };

        let sep = descriptor.os_family.separator();
        let mut parts = Vec::new();
        for segment in rest.split(sep) {
            if segment.is_empty() || segment == "." {
                continue;
            }
            check_segment(descriptor.os_family, segment)?;
            parts.push(segment.to_string());
        }

        Ok(Self {
            descriptor,
            root,
            parts,
        })
    }

    /// Split a Windows path into its root and the remainder (with `\` separators).
    fn split_windows_root(raw: &str) -> Result<(String, String), PathError> {
        let s = raw.replace('/', "\\");

        if let Some(unc) = s.strip_prefix("\\\\") {
            let mut pieces = unc.splitn(3, '\\');
            let server = pieces.next().unwrap_or("");
            let share = pieces.next().unwrap_or("");
            if server.is_empty() || share.is_empty() {
                return Err(PathError::NotAbsolute(raw.to_string()));
            }
            check_segment(OsFamily::Windows, server)?;
            check_segment(OsFamily::Windows, share)?;
            let rest = pieces.next().unwrap_or("").to_string();
            return Ok((format!("\\\\{server}\\{share}\\"), rest));
        }

        let bytes = s.as_bytes();
        if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
            // `C:foo` is drive-relative, not absolute.
            if bytes.len() > 2 && bytes[2] != b'\\' {
                return Err(PathError::NotAbsolute(raw.to_string()));
            }
            let letter = (bytes[0] as char).to_ascii_uppercase();
            let rest = s.get(2..).unwrap_or("").to_string();
            return Ok((format!("{letter}:\\"), rest));
        }

        Err(PathError::NotAbsolute(raw.to_string()))
    }

    /// The default root of an environment: `/`, or the system drive `C:\`.
    pub fn root_of(descriptor: Descriptor) -> Self {
        let root = match descriptor.os_family {
            OsFamily::Posix => "/",
            OsFamily::Windows => "C:\\",
        };
        Self {
            descriptor,
            root: root.to_string(),
            parts: Vec::new(),
        }
    }

    /// Environment this path belongs to.
    pub fn descriptor(&self) -> Descriptor {
        self.descriptor
    }

    pub fn os_family(&self) -> OsFamily {
        self.descriptor.os_family
    }

    /// The root prefix as written: `/`, `C:\` or `\\server\share\`.
    pub fn root_prefix(&self) -> &str {
        &self.root
    }

    /// The root of this path's filesystem tree.
    pub fn root(&self) -> EnvPath {
        Self {
            descriptor: self.descriptor,
            root: self.root.clone(),
            parts: Vec::new(),
        }
    }

    /// Segments below the root.
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn is_root(&self) -> bool {
        self.parts.is_empty()
    }

    /// Last segment, or `None` for a root.
    pub fn file_name(&self) -> Option<&str> {
        self.parts.last().map(String::as_str)
    }

    /// The containing directory, or `None` for a root.
    pub fn parent(&self) -> Option<EnvPath> {
        if self.parts.is_empty() {
            return None;
        }
        let mut parent = self.clone();
        parent.parts.pop();
        Some(parent)
    }

    /// Append one segment. `.` is a no-op; `..` is kept verbatim.
    pub fn join(&self, segment: &str) -> Result<EnvPath, PathError> {
        if segment == "." {
            return Ok(self.clone());
        }
        check_segment(self.os_family(), segment)?;
        let mut joined = self.clone();
        joined.parts.push(segment.to_string());
        Ok(joined)
    }

    /// Append every segment of a relative path.
    pub fn resolve(&self, relative: &RelativePath) -> Result<EnvPath, PathError> {
        let mut resolved = self.clone();
        for segment in &relative.parts {
            resolved = resolved.join(segment)?;
        }
        Ok(resolved)
    }

    /// Collapse `..` segments lexically. Never climbs above the root.
    pub fn normalize(&self) -> EnvPath {
        let mut parts: Vec<String> = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            if part == ".." {
                parts.pop();
            } else {
                parts.push(part.clone());
            }
        }
        Self {
            descriptor: self.descriptor,
            root: self.root.clone(),
            parts,
        }
    }

    /// This path with case folded the way the OS family compares it.
    ///
    /// Paths that are `same_location` have equal folded forms, so the result
    /// works as a map key. POSIX paths come back unchanged.
    pub fn case_folded(&self) -> EnvPath {
        match self.os_family() {
            OsFamily::Posix => self.clone(),
            OsFamily::Windows => Self {
                descriptor: self.descriptor,
                root: self.root.to_ascii_lowercase(),
                parts: self.parts.iter().map(|p| p.to_ascii_lowercase()).collect(),
            },
        }
    }

    /// True if `base` is this path or one of its ancestors, in the same environment.
    ///
    /// Segment comparison follows the OS family's default case sensitivity.
    pub fn starts_with(&self, base: &EnvPath) -> bool {
        let os = self.os_family();
        self.descriptor == base.descriptor
            && segment_eq(os, &self.root, &base.root)
            && base.parts.len() <= self.parts.len()
            && base
                .parts
                .iter()
                .zip(&self.parts)
                .all(|(a, b)| segment_eq(os, a, b))
    }

    /// Path of `self` relative to `base`, if `base` is an ancestor (or equal).
    pub fn relative_to(&self, base: &EnvPath) -> Option<RelativePath> {
        if !self.starts_with(base) {
            return None;
        }
        Some(RelativePath {
            parts: self.parts[base.parts.len()..].to_vec(),
        })
    }

    /// Same location, comparing with the OS family's default case sensitivity.
    pub fn same_location(&self, other: &EnvPath) -> bool {
        self.parts.len() == other.parts.len() && self.starts_with(other)
    }

    /// Fail unless this path belongs to `expected`.
    pub fn ensure_environment(&self, expected: &Descriptor) -> Result<(), PathError> {
        if self.descriptor == *expected {
            Ok(())
        } else {
            Err(PathError::EnvironmentMismatch {
                expected: *expected,
                actual: self.descriptor,
            })
        }
    }
}

impl fmt::Display for EnvPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root)?;
        let sep = self.os_family().separator();
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, "{sep}")?;
            }
            f.write_str(part)?;
        }
        Ok(())
    }
}

impl fmt::Debug for EnvPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvPath({:?} @ {})", self.to_string(), self.descriptor)
    }
}

/// A path with no root and no environment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelativePath {
    parts: Vec<String>,
}

impl RelativePath {
    /// Parse a `/`-separated relative path. Empty and `.` segments are dropped.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.starts_with('/') {
            return Err(PathError::InvalidSegment(raw.to_string()));
        }
        Self::from_parts(raw.split('/').filter(|s| !s.is_empty() && *s != "."))
    }

    pub fn from_parts<I, S>(parts: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts: Vec<String> = parts.into_iter().map(Into::into).collect();
        for part in &parts {
            if part.is_empty() || part.contains('\0') || part.contains('/') {
                return Err(PathError::InvalidSegment(part.clone()));
            }
        }
        Ok(Self { parts })
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.parts.join("/"))
    }
}

/// Target of a new symbolic link, as `ln -s` would store it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkTarget {
    Absolute(EnvPath),
    /// Interpreted relative to the directory containing the link.
    Relative(RelativePath),
}

impl fmt::Display for LinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkTarget::Absolute(p) => write!(f, "{p}"),
            LinkTarget::Relative(r) => write!(f, "{r}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::EnvironmentId;

    fn posix() -> Descriptor {
        Descriptor::new(EnvironmentId::local(), OsFamily::Posix)
    }

    fn windows() -> Descriptor {
        Descriptor::new(EnvironmentId::named("win-box"), OsFamily::Windows)
    }

    #[test]
    fn test_parse_posix() {
        let p = EnvPath::parse("/home//amy/./src", posix()).unwrap();
        assert_eq!(p.parts(), ["home", "amy", "src"]);
        assert_eq!(p.to_string(), "/home/amy/src");
        assert_eq!(p.file_name(), Some("src"));
        assert!(EnvPath::parse("/", posix()).unwrap().is_root());
    }

    #[test]
    fn test_parse_posix_rejects_relative() {
        assert_eq!(
            EnvPath::parse("home/amy", posix()),
            Err(PathError::NotAbsolute("home/amy".into()))
        );
    }

    #[test]
    fn test_parse_windows_drive() {
        let p = EnvPath::parse("c:/Users\\amy", windows()).unwrap();
        assert_eq!(p.root_prefix(), "C:\\");
        assert_eq!(p.to_string(), "C:\\Users\\amy");
        assert!(EnvPath::parse("C:Users", windows()).is_err());
        assert!(EnvPath::parse("C:", windows()).unwrap().is_root());
    }

    #[test]
    fn test_parse_windows_unc() {
        let p = EnvPath::parse("\\\\srv\\share\\docs\\a.txt", windows()).unwrap();
        assert_eq!(p.root_prefix(), "\\\\srv\\share\\");
        assert_eq!(p.parts(), ["docs", "a.txt"]);
        assert!(EnvPath::parse("\\\\srv", windows()).is_err());
    }

    #[test]
    fn test_windows_reserved_characters() {
        let err = EnvPath::parse("C:\\a|b", windows()).unwrap_err();
        assert_eq!(
            err,
            PathError::InvalidCharacter {
                segment: "a|b".into(),
                ch: '|'
            }
        );
        // Fine on POSIX.
        assert!(EnvPath::parse("/a|b", posix()).is_ok());
    }

    #[test]
    fn test_join_and_parent() {
        let base = EnvPath::parse("/srv", posix()).unwrap();
        let child = base.join("data").unwrap();
        assert_eq!(child.to_string(), "/srv/data");
        assert_eq!(child.parent().unwrap(), base);
        assert!(base.root().parent().is_none());
        assert_eq!(base.root(), EnvPath::root_of(posix()));
        assert_eq!(EnvPath::root_of(windows()).to_string(), "C:\\");
        assert!(base.join("a/b").is_err());
        assert_eq!(base.join(".").unwrap(), base);
    }

    #[test]
    fn test_relative_resolution() {
        let base = EnvPath::parse("/srv", posix()).unwrap();
        let rel = RelativePath::parse("a/./b/c").unwrap();
        let full = base.resolve(&rel).unwrap();
        assert_eq!(full.to_string(), "/srv/a/b/c");
        assert_eq!(full.relative_to(&base).unwrap(), rel);
        assert!(base.relative_to(&full).is_none());
    }

    #[test]
    fn test_normalize_stops_at_root() {
        let p = EnvPath::parse("/a/../../b/./c/..", posix()).unwrap();
        assert_eq!(p.normalize().to_string(), "/b");
    }

    #[test]
    fn test_case_rules_follow_os_family() {
        let a = EnvPath::parse("C:\\Users\\AMY", windows()).unwrap();
        let b = EnvPath::parse("c:\\users\\amy", windows()).unwrap();
        assert!(a.same_location(&b));

        let a = EnvPath::parse("/home/AMY", posix()).unwrap();
        let b = EnvPath::parse("/home/amy", posix()).unwrap();
        assert!(!a.same_location(&b));
    }

    #[test]
    fn test_case_folded_keys_match_same_location() {
        let a = EnvPath::parse("C:\\Users\\AMY", windows()).unwrap();
        let b = EnvPath::parse("c:/users/amy", windows()).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.case_folded(), b.case_folded());
        assert_eq!(a.case_folded().descriptor(), windows());

        let a = EnvPath::parse("/home/AMY", posix()).unwrap();
        let b = EnvPath::parse("/home/amy", posix()).unwrap();
        assert_eq!(a.case_folded(), a);
        assert_ne!(a.case_folded(), b.case_folded());
    }

    #[test]
    fn test_environment_mismatch() {
        let other = Descriptor::new(EnvironmentId::named("container"), OsFamily::Posix);
        let p = EnvPath::parse("/etc", other).unwrap();
        assert!(p.ensure_environment(&other).is_ok());
        assert!(matches!(
            p.ensure_environment(&posix()),
            Err(PathError::EnvironmentMismatch { .. })
        ));

        // Same text, different environment: different paths.
        let local = EnvPath::parse("/etc", posix()).unwrap();
        assert_ne!(p, local);
        assert!(!p.starts_with(&local));
    }

    #[test]
    fn test_serde_roundtrip_keeps_environment() {
        let p = EnvPath::parse("/var/log", posix()).unwrap();
        let bytes = postcard::to_stdvec(&p).unwrap();
        let back: EnvPath = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, p);
        assert_eq!(back.descriptor(), posix());
    }
}
