//! Collapse duplicated extracted readings.
//!
//! Two entries are the same biomarker when their canonical names match
//! after folding and synonym resolution, and their values agree: numerically
//! within tolerance, or both non-numeric with identical folded text. Entries
//! linked through a chain of such pairs form one group; each group keeps
//! its highest-confidence entry (first occurrence on ties). Output order
//! follows the kept entries' input order, so the result is deterministic and
//! `dedup(dedup(x)) == dedup(x)`.

use super::catalog;
use super::normalize::parse_numeric;
use super::text;
use crate::models::ExtractedReading;

const RELATIVE_TOLERANCE: f64 = 1e-3;
const ABSOLUTE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
enum ValueKey {
    Number(f64),
    Text(String),
}

struct Keyed {
    name: String,
    value: ValueKey,
    confidence: Option<f64>,
}

fn key_of(reading: &ExtractedReading) -> Keyed {
    Keyed {
        name: catalog::canonical_key(&reading.name),
        value: match parse_numeric(&reading.value) {
            Some(n) => ValueKey::Number(n),
            None => ValueKey::Text(text::fold(&reading.value)),
        },
        confidence: reading.normalization_confidence.filter(|c| c.is_finite()),
    }
}

fn values_agree(a: &ValueKey, b: &ValueKey) -> bool {
    match (a, b) {
        (ValueKey::Number(x), ValueKey::Number(y)) => {
            let scale = x.abs().max(y.abs());
            (x - y).abs() <= ABSOLUTE_TOLERANCE.max(RELATIVE_TOLERANCE * scale)
        }
        (ValueKey::Text(x), ValueKey::Text(y)) => x == y,
        _ => false,
    }
}

fn same_biomarker(a: &Keyed, b: &Keyed) -> bool {
    a.name == b.name && values_agree(&a.value, &b.value)
}

/// Disjoint-set forest over input indices.
struct Groups {
    parent: Vec<usize>,
}

impl Groups {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn root(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn join(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.root(a), self.root(b));
        if ra != rb {
            // Lower index stays root so roots are first occurrences.
            let (keep, merge) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[merge] = keep;
        }
    }
}

/// Is `candidate` a better representative than `current`?
fn outranks(candidate: &Keyed, current: &Keyed) -> bool {
    match (candidate.confidence, current.confidence) {
        (Some(a), Some(b)) => a > b,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Remove duplicate readings. See module docs for the equivalence used.
pub fn dedup(readings: &[ExtractedReading]) -> Vec<ExtractedReading> {
    let keys: Vec<Keyed> = readings.iter().map(key_of).collect();
    let mut groups = Groups::new(readings.len());

    for i in 0..keys.len() {
        for j in (i + 1)..keys.len() {
            if same_biomarker(&keys[i], &keys[j]) {
                groups.join(i, j);
            }
        }
    }

    // Best member per root, scanning in input order so ties keep the first.
    let mut best: Vec<Option<usize>> = vec![None; readings.len()];
    for i in 0..readings.len() {
        let root = groups.root(i);
        let replace = match best[root] {
            Some(current) => outranks(&keys[i], &keys[current]),
            None => true,
        };
        if replace {
            best[root] = Some(i);
        }
    }

    let mut kept: Vec<usize> = best.into_iter().flatten().collect();
    kept.sort_unstable();

    let removed = readings.len() - kept.len();
    if removed > 0 {
        tracing::debug!(removed, kept = kept.len(), "Collapsed duplicate readings");
    }

    kept.into_iter().map(|i| readings[i].clone()).collect()
}
