//! Release version ordering.
//!
//! Deliberately looser than semver: up to three dot-separated components,
//! missing components count as `0`, anything after a `-` in a component is
//! ignored, and components that are not integers compare as strings.
//! `1.2.3-beta` and `1.2.3` are therefore equal.

use std::cmp::Ordering;

const COMPONENTS: usize = 3;

/// Strip surrounding whitespace and one leading `v`.
pub fn strip_version_prefix(version: &str) -> &str {
    let trimmed = version.trim();
    trimmed.strip_prefix('v').unwrap_or(trimmed)
}

/// Compare two version strings.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = strip_version_prefix(a);
    let b = strip_version_prefix(b);
    if a == b {
        return Ordering::Equal;
    }

    let left = components(a);
    let right = components(b);
    for (l, r) in left.iter().zip(right.iter()) {
        let ord = compare_component(l, r);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn components(version: &str) -> [&str; COMPONENTS] {
    let mut out = ["0"; COMPONENTS];
    for (slot, part) in out.iter_mut().zip(version.split('.')) {
        *slot = part;
    }
    out
}

fn compare_component(l: &str, r: &str) -> Ordering {
    match (numeric_part(l), numeric_part(r)) {
        (Some(l), Some(r)) => l.cmp(&r),
        _ => l.cmp(r),
    }
}

fn numeric_part(component: &str) -> Option<u64> {
    let head = component.split('-').next().unwrap_or(component);
    head.parse().ok()
}
