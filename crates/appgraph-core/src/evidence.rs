//! Evidence construction, deduplication and reproducible down-sampling.

use sha2::{Digest, Sha256};

use crate::models::graph::Evidence;
use crate::normalize::normalize_path;

pub fn file_evidence(file: &str) -> Evidence {
    Evidence {
        file: file.to_string(),
        ..Evidence::default()
    }
}

pub fn line_evidence(file: &str, line: Option<u32>, end_line: Option<u32>) -> Evidence {
    Evidence {
        file: file.to_string(),
        line,
        end_line: match (line, end_line) {
            (Some(start), Some(end)) if end >= start => Some(end),
            _ => None,
        },
        ..Evidence::default()
    }
}

fn sort_key(ev: &Evidence) -> (&str, u32, u32, &str) {
    (
        ev.file.as_str(),
        ev.line.unwrap_or(0),
        ev.end_line.unwrap_or(0),
        ev.chunk_id.as_deref().unwrap_or(""),
    )
}

/// Deterministic position of an evidence item in `[0, 1)`, derived from the
/// relation id and the evidence fields only.
pub fn stable_fraction(relation_id: &str, ev: &Evidence) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(relation_id.as_bytes());
    hasher.update(b"|");
    hasher.update(ev.file.as_bytes());
    hasher.update(b"|");
    hasher.update(ev.line.map(|l| l.to_string()).unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(ev.end_line.map(|l| l.to_string()).unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(ev.chunk_id.as_deref().unwrap_or("").as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64
}

/// Normalise file paths, drop duplicates (same file, span and chunk) and sort.
pub fn dedup_evidence(items: Vec<Evidence>, project_root: Option<&str>) -> Vec<Evidence> {
    let mut normalized: Vec<Evidence> = items
        .into_iter()
        .map(|mut ev| {
            ev.file = normalize_path(&ev.file, project_root);
            ev
        })
        .filter(|ev| !ev.file.is_empty())
        .collect();
    normalized.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
    normalized.dedup_by(|later, earlier| sort_key(later) == sort_key(earlier));
    normalized
}

/// Keep evidence whose stable fraction falls below `rate`, at least one item,
/// and at most `max_items`. Input order is irrelevant to the result.
pub fn sample_evidence(
    relation_id: &str,
    items: Vec<Evidence>,
    rate: f64,
    max_items: usize,
) -> Vec<Evidence> {
    let max_items = max_items.max(1);
    if items.is_empty() || (rate >= 1.0 && items.len() <= max_items) {
        return items;
    }

    let mut scored: Vec<(f64, Evidence)> = items
        .into_iter()
        .map(|ev| (stable_fraction(relation_id, &ev), ev))
        .collect();
    scored.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then_with(|| sort_key(&a.1).cmp(&sort_key(&b.1)))
    });

    let below = scored.iter().filter(|(f, _)| *f < rate).count();
    let keep = below.clamp(1, max_items);

    let mut kept: Vec<Evidence> = scored.into_iter().take(keep).map(|(_, ev)| ev).collect();
    kept.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
    kept
}

/// Full evidence pass for one relation: normalise, dedup, sample.
pub fn finalize_evidence(
    relation_id: &str,
    items: Vec<Evidence>,
    project_root: Option<&str>,
    rate: f64,
    max_items: usize,
) -> Vec<Evidence> {
    sample_evidence(relation_id, dedup_evidence(items, project_root), rate, max_items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(file: &str, line: u32) -> Evidence {
        line_evidence(file, Some(line), None)
    }

    #[test]
    fn test_line_evidence_drops_inverted_span() {
        let e = line_evidence("a.jsp", Some(10), Some(4));
        assert_eq!(e.end_line, None);
        let e = line_evidence("a.jsp", Some(4), Some(10));
        assert_eq!(e.end_line, Some(10));
    }

    #[test]
    fn test_stable_fraction_is_deterministic_and_bounded() {
        let e = ev("web/a.jsp", 3);
        let first = stable_fraction("r1", &e);
        assert_eq!(first, stable_fraction("r1", &e));
        assert!((0.0..1.0).contains(&first));
        assert_ne!(first, stable_fraction("r2", &e));
    }

    #[test]
    fn test_dedup_normalizes_before_comparing() {
        let items = vec![
            ev("web\\a.jsp", 3),
            ev("./web/a.jsp", 3),
            ev("C:/web/a.jsp", 3),
            ev("web/a.jsp", 1),
        ];
        let out = dedup_evidence(items, None);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].line, Some(1));
        assert_eq!(out[1].file, "web/a.jsp");
    }

    #[test]
    fn test_sample_full_rate_keeps_everything() {
        let items: Vec<Evidence> = (1..=5).map(|i| ev("a.jsp", i)).collect();
        assert_eq!(sample_evidence("r", items.clone(), 1.0, 50), items);
    }

    #[test]
    fn test_sample_zero_rate_keeps_one() {
        let items: Vec<Evidence> = (1..=5).map(|i| ev("a.jsp", i)).collect();
        let kept = sample_evidence("r", items, 0.0, 50);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_sample_is_order_independent() {
        let items: Vec<Evidence> = (1..=40).map(|i| ev("a.jsp", i)).collect();
        let mut reversed = items.clone();
        reversed.reverse();
        let a = sample_evidence("rel", items, 0.3, 50);
        let b = sample_evidence("rel", reversed, 0.3, 50);
        assert_eq!(a, b);
        assert!(!a.is_empty() && a.len() < 40);
    }

    #[test]
    fn test_sample_respects_cap() {
        let items: Vec<Evidence> = (1..=20).map(|i| ev("a.jsp", i)).collect();
        assert_eq!(sample_evidence("r", items, 1.0, 5).len(), 5);
    }
}
