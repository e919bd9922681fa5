//! Minimal semantic version parsing: `MAJOR.MINOR.PATCH[-pre][+build]`.

use std::cmp::Ordering;
use std::fmt;

/// A parsed semantic version. Build metadata is ignored for ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Semver {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

impl Semver {
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let core = input.split_once('+').map_or(input, |(v, _)| v);
        let (version_part, pre) = match core.split_once('-') {
            Some((_, p)) if p.is_empty() => return None,
            Some((v, p)) => (v, Some(p.to_string())),
            None => (core, None),
        };

        let mut parts = version_part.split('.');
        let mut next = || -> Option<u64> {
            let part = parts.next()?;
            if part.is_empty() || (part.len() > 1 && part.starts_with('0')) {
                return None;
            }
            part.parse().ok()
        };
        let major = next()?;
        let minor = next()?;
        let patch = next()?;
        if parts.next().is_some() {
            return None;
        }

        Some(Self {
            major,
            minor,
            patch,
            pre,
        })
    }

    pub fn is_valid(input: &str) -> bool {
        Self::parse(input).is_some()
    }
}

impl Ord for Semver {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for Semver {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Semver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let v = Semver::parse("1.2.3").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));
        assert_eq!(Semver::parse("2.0.0-rc.1").unwrap().pre.as_deref(), Some("rc.1"));
        assert!(Semver::is_valid("1.0.0+build.5"));
    }

    #[test]
    fn test_parse_invalid() {
        for bad in ["", "1", "1.2", "1.2.3.4", "a.b.c", "1.2.3-", "01.2.3", "1..3"] {
            assert!(Semver::parse(bad).is_none(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_prerelease_sorts_before_release() {
        let rc = Semver::parse("1.0.0-rc.1").unwrap();
        let ga = Semver::parse("1.0.0").unwrap();
        assert!(rc < ga);
        assert!(Semver::parse("1.10.0").unwrap() > Semver::parse("1.9.9").unwrap());
    }
}
