//! Numeric runtime version gates
//!
//! Transform and reverse each require a minimum version of the host numeric
//! runtime. The version is reported by a [`RuntimeProbe`] and compared against
//! fixed minimums.
//!
//! | Operation | Minimum |
//! |-----------|---------|
//! | transform | 1.13.0 |
//! | reverse | 2.0.0 |
//!
//! # Example
//!
//! ```ignore
//! use bettertransformer::runtime::{RuntimeVersion, FixedRuntime, require_runtime};
//!
//! let probe = FixedRuntime::new(RuntimeVersion::parse("2.1.0+cu118")?);
//! require_runtime(&probe, "reverse", MIN_RUNTIME_FOR_REVERSE)?;
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TransformError, TransformResult};
use crate::traits::RuntimeProbe;

/// Minimum runtime accepted by `transform`
pub const MIN_RUNTIME_FOR_TRANSFORM: RuntimeVersion = RuntimeVersion::new(1, 13, 0);

/// Minimum runtime accepted by `reverse`
pub const MIN_RUNTIME_FOR_REVERSE: RuntimeVersion = RuntimeVersion::new(2, 0, 0);

/// Runtime level of the in-crate tensor backend
pub const NATIVE_RUNTIME: RuntimeVersion = RuntimeVersion::new(2, 1, 0);

/// Comparable `major.minor.patch` version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuntimeVersion {
    /// Major version
    pub major: u32,
    /// Minor version
    pub minor: u32,
    /// Patch version
    pub patch: u32,
}

impl RuntimeVersion {
    /// Create a version from its components
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version string
    ///
    /// Local build tags (`+cu118`) and pre-release suffixes (`a0`, `.dev2023`,
    /// `rc1`) are ignored. Missing components default to zero.
    pub fn parse(input: &str) -> TransformResult<Self> {
        let public = input.trim().split('+').next().unwrap_or("");
        if public.is_empty() {
            return Err(TransformError::InvalidVersion(input.to_string()));
        }

        let mut parts = [0u32; 3];
        let mut seen = 0;
        for (slot, piece) in public.split('.').take(3).enumerate() {
            let digits: String = piece.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                // "2.1.dev2023" stops at the first non numeric component
                if slot == 0 {
                    return Err(TransformError::InvalidVersion(input.to_string()));
                }
                break;
            }
            parts[slot] = digits
                .parse()
                .map_err(|_| TransformError::InvalidVersion(input.to_string()))?;
            seen += 1;
            if digits.len() != piece.len() {
                break;
            }
        }

        if seen == 0 {
            return Err(TransformError::InvalidVersion(input.to_string()));
        }

        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for RuntimeVersion {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Probe that always reports the same version
#[derive(Debug, Clone, Copy)]
pub struct FixedRuntime(pub RuntimeVersion);

impl FixedRuntime {
    /// Create a probe reporting `version`
    pub fn new(version: RuntimeVersion) -> Self {
        Self(version)
    }

    /// Probe for the in-crate backend
    pub fn native() -> Self {
        Self(NATIVE_RUNTIME)
    }
}

impl Default for FixedRuntime {
    fn default() -> Self {
        Self::native()
    }
}

impl RuntimeProbe for FixedRuntime {
    fn version(&self) -> RuntimeVersion {
        self.0
    }
}

/// Fail with `VersionTooOld` when the probe reports less than `required`
pub fn require_runtime(
    probe: &dyn RuntimeProbe,
    operation: &'static str,
    required: RuntimeVersion,
) -> TransformResult<()> {
    let found = probe.version();
    if found < required {
        return Err(TransformError::VersionTooOld {
            operation,
            found,
            required,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        assert_eq!(
            RuntimeVersion::parse("2.1.0").unwrap(),
            RuntimeVersion::new(2, 1, 0)
        );
        assert_eq!(
            RuntimeVersion::parse("2.0").unwrap(),
            RuntimeVersion::new(2, 0, 0)
        );
    }

    #[test]
    fn test_parse_local_and_prerelease() {
        assert_eq!(
            RuntimeVersion::parse("2.1.2+cu118").unwrap(),
            RuntimeVersion::new(2, 1, 2)
        );
        assert_eq!(
            RuntimeVersion::parse("1.13.0a0").unwrap(),
            RuntimeVersion::new(1, 13, 0)
        );
        assert_eq!(
            RuntimeVersion::parse("2.2.dev20231001").unwrap(),
            RuntimeVersion::new(2, 2, 0)
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert!(RuntimeVersion::parse("").is_err());
        assert!(RuntimeVersion::parse("nightly").is_err());
    }

    #[test]
    fn test_ordering() {
        assert!(RuntimeVersion::new(1, 13, 1) < MIN_RUNTIME_FOR_REVERSE);
        assert!(RuntimeVersion::new(1, 13, 1) >= MIN_RUNTIME_FOR_TRANSFORM);
        assert!(MIN_RUNTIME_FOR_TRANSFORM < MIN_RUNTIME_FOR_REVERSE);
        assert!(NATIVE_RUNTIME >= MIN_RUNTIME_FOR_REVERSE);
    }

    #[test]
    fn test_require_runtime() {
        let old = FixedRuntime::new(RuntimeVersion::new(1, 12, 1));
        let err = require_runtime(&old, "transform", MIN_RUNTIME_FOR_TRANSFORM).unwrap_err();
        assert!(matches!(err, TransformError::VersionTooOld { .. }));

        assert!(require_runtime(&FixedRuntime::native(), "reverse", MIN_RUNTIME_FOR_REVERSE).is_ok());
    }
}
