//! ## Version Masking
//!
//! Peers gate compatibility on the advertised semantic version, so a version crossing the
//! dialect boundary is rewritten to look native on the other side. The major of the rewritten
//! version is the target dialect's marker and its minor is the concatenation of the real major
//! and minor:
//!
//! - `3.2.1` presented to legacy peers becomes `2.32.1`;
//! - `2.7.24` presented to binary peers becomes `3.27.24`.
//!
//! A version that already carries the marker of the side it comes from (major equal to that
//! marker, minor of two or more digits starting with the target side's marker) is a masked
//! native of the target side and is restored instead, so `2.32.1` presented to binary peers is
//! `3.2.1` again. Any other version is marked: `3.12.0` presented to legacy peers is `2.312.0`.
//! Versions with a major or minor above 9 cannot be restored unambiguously.
//!
//! When prerelease hiding is enabled every `-...` suffix is removed after the rewrite.
use semver::Version;

use crate::translator::Dialect;

pub const LEGACY_MARKER: u64 = 2;
pub const BINARY_MARKER: u64 = 3;

pub fn marker(dialect: Dialect) -> u64 {
    match dialect {
        Dialect::Legacy => LEGACY_MARKER,
        Dialect::Binary => BINARY_MARKER,
    }
}

/// Removes everything from the first `-`.
pub fn strip_prerelease(version: &str) -> &str {
    version
        .split_once('-')
        .map_or(version, |(release, _)| release)
}

/// Rewrites `M.m.p` to `marker.Mm.p`, keeping prerelease and build metadata.
pub fn mark(version: &Version, marker: u64) -> Option<Version> {
    let minor = format!("{}{}", version.major, version.minor).parse().ok()?;
    Some(Version {
        major: marker,
        minor,
        patch: version.patch,
        pre: version.pre.clone(),
        build: version.build.clone(),
    })
}

/// Whether `version` looks like the output of [`mark`] with `marker` applied to a version whose
/// major was `origin`.
pub fn is_marked(version: &Version, marker: u64, origin: u64) -> bool {
    version.major == marker
        && version.minor >= 10
        && version.minor.to_string().starts_with(&origin.to_string())
}

/// Reverses [`mark`]: `marker.Mm.p` becomes `M.m.p` when `M` is `origin`.
pub fn unmark(version: &Version, marker: u64, origin: u64) -> Option<Version> {
    if !is_marked(version, marker, origin) {
        return None;
    }
    let digits = version.minor.to_string();
    let (major, minor) = digits.split_at(1);
    Some(Version {
        major: major.parse().ok()?,
        minor: minor.parse().ok()?,
        patch: version.patch,
        pre: version.pre.clone(),
        build: version.build.clone(),
    })
}

/// Version rewriting rules of one bridge instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPolicy {
    own: Version,
    hide_prerelease: bool,
}

impl VersionPolicy {
    pub fn new(own: &str, hide_prerelease: bool) -> Result<Self, semver::Error> {
        Ok(Self {
            own: Version::parse(own)?,
            hide_prerelease,
        })
    }

    pub fn hides_prerelease(&self) -> bool {
        self.hide_prerelease
    }

    pub fn is_prerelease(&self) -> bool {
        !self.own.pre.is_empty()
    }

    /// The bridge's own version, as it may be shown to binary peers.
    pub fn own_version(&self) -> String {
        self.relax(&self.own.to_string())
    }

    /// Strips the prerelease suffix when hiding is enabled.
    pub fn relax(&self, version: &str) -> String {
        if self.hide_prerelease {
            strip_prerelease(version).to_string()
        } else {
            version.to_string()
        }
    }

    /// Rewrites `version` for peers speaking `into`.
    ///
    /// Strings that are not semantic versions are only relaxed.
    pub fn translate(&self, version: &str, into: Dialect) -> String {
        let (source, target) = (marker(into.other()), marker(into));
        let rewritten = Version::parse(version).ok().and_then(|parsed| {
            if is_marked(&parsed, source, target) {
                unmark(&parsed, source, target)
            } else {
                mark(&parsed, marker(into))
            }
        });
        match rewritten {
            Some(v) => self.relax(&v.to_string()),
            None => self.relax(version),
        }
    }
}
