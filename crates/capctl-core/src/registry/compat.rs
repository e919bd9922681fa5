//! Pairwise compatibility matrix.
//!
//! Entries are keyed by the unordered pair, so `(a, b)` and `(b, a)` always
//! read the same entry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::capability::Capability;

/// Confidence for a pair with no declared relationship.
pub const UNDECLARED_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityEntry {
    pub a: String,
    pub b: String,
    pub compatible: bool,
    pub reasons: Vec<String>,
    pub confidence: f64,
    pub evaluated_at: DateTime<Utc>,
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Decide compatibility of two capabilities from their declarations.
///
/// A declared conflict on either side wins over everything else.
pub fn evaluate_pair(a: &Capability, b: &Capability, now: DateTime<Utc>) -> CompatibilityEntry {
    let (first, second) = pair_key(a.id(), b.id());
    let mut reasons = Vec::new();

    if a.manifest.conflicts.iter().any(|c| c == b.id()) {
        reasons.push(format!("{} declares a conflict with {}", a.id(), b.id()));
    }
    if b.manifest.conflicts.iter().any(|c| c == a.id()) {
        reasons.push(format!("{} declares a conflict with {}", b.id(), a.id()));
    }
    if !reasons.is_empty() {
        return CompatibilityEntry {
            a: first,
            b: second,
            compatible: false,
            reasons,
            confidence: 1.0,
            evaluated_at: now,
        };
    }

    let depends = a.manifest.dependencies.iter().any(|d| d == b.id())
        || b.manifest.dependencies.iter().any(|d| d == a.id());
    CompatibilityEntry {
        a: first,
        b: second,
        compatible: true,
        reasons: Vec::new(),
        confidence: if depends { 1.0 } else { UNDECLARED_CONFIDENCE },
        evaluated_at: now,
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompatibilityMatrix {
    entries: HashMap<(String, String), CompatibilityEntry>,
}

impl CompatibilityMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, a: &str, b: &str) -> Option<&CompatibilityEntry> {
        self.entries.get(&pair_key(a, b))
    }

    /// Recompute every pair involving `cap` against `others`.
    pub fn recompute_row<'a>(
        &mut self,
        cap: &Capability,
        others: impl IntoIterator<Item = &'a Capability>,
        now: DateTime<Utc>,
    ) {
        for other in others {
            if other.id() == cap.id() {
                continue;
            }
            let entry = evaluate_pair(cap, other, now);
            self.entries.insert(pair_key(cap.id(), other.id()), entry);
        }
    }

    /// Drop every entry that mentions `id`.
    pub fn remove(&mut self, id: &str) {
        self.entries.retain(|(a, b), _| a != id && b != id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries marked incompatible that involve `id`.
    pub fn conflicts_of(&self, id: &str) -> Vec<&CompatibilityEntry> {
        let mut out: Vec<&CompatibilityEntry> = self
            .entries
            .values()
            .filter(|e| !e.compatible && (e.a == id || e.b == id))
            .collect();
        out.sort_by(|x, y| (&x.a, &x.b).cmp(&(&y.a, &y.b)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::capability::CapabilityManifest;

    fn cap(manifest: CapabilityManifest) -> Capability {
        let hash = manifest.content_hash().unwrap();
        Capability::from_manifest(manifest, hash, Utc::now())
    }

    #[test]
    fn test_one_sided_conflict_is_symmetric() {
        let c = cap(CapabilityManifest::new("svc-c", "C", "1.0.0").with_conflict("svc-d"));
        let d = cap(CapabilityManifest::new("svc-d", "D", "1.0.0"));
        let mut m = CompatibilityMatrix::new();
        m.recompute_row(&c, [&d], Utc::now());

        for (x, y) in [("svc-c", "svc-d"), ("svc-d", "svc-c")] {
            let e = m.get(x, y).unwrap();
            assert!(!e.compatible);
            assert_eq!(e.confidence, 1.0);
        }
        assert_eq!(m.conflicts_of("svc-d").len(), 1);
    }

    #[test]
    fn test_dependency_is_certain_compat() {
        let a = cap(CapabilityManifest::new("a", "A", "1.0.0").with_dependency("b"));
        let b = cap(CapabilityManifest::new("b", "B", "1.0.0"));
        let e = evaluate_pair(&b, &a, Utc::now());
        assert!(e.compatible);
        assert_eq!(e.confidence, 1.0);
    }

    #[test]
    fn test_unrelated_pair_has_default_confidence() {
        let a = cap(CapabilityManifest::new("a", "A", "1.0.0"));
        let b = cap(CapabilityManifest::new("b", "B", "1.0.0"));
        let e = evaluate_pair(&a, &b, Utc::now());
        assert!(e.compatible);
        assert_eq!(e.confidence, UNDECLARED_CONFIDENCE);
    }

    #[test]
    fn test_remove_drops_all_pairs() {
        let a = cap(CapabilityManifest::new("a", "A", "1.0.0"));
        let b = cap(CapabilityManifest::new("b", "B", "1.0.0"));
        let c = cap(CapabilityManifest::new("c", "C", "1.0.0"));
        let mut m = CompatibilityMatrix::new();
        m.recompute_row(&a, [&b, &c], Utc::now());
        m.recompute_row(&b, [&c], Utc::now());
        assert_eq!(m.len(), 3);
        m.remove("a");
        assert_eq!(m.len(), 1);
        assert!(m.get("b", "c").is_some());
    }
}
