//! Patient name matching for exams uploaded without a target patient.

use super::text;
use crate::models::{MatchCandidate, Patient};

/// At or above this similarity the match is taken automatically.
pub const EXACT_MATCH_THRESHOLD: f64 = 95.0;
/// Below this similarity no existing patient is considered.
pub const CANDIDATE_THRESHOLD: f64 = 70.0;
pub const MAX_CANDIDATES: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum MatchDecision {
    Exact(MatchCandidate),
    CreateNew,
    Ambiguous(Vec<MatchCandidate>),
}

/// Similarity of two names as a percentage, from Levenshtein distance over
/// folded text.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = text::fold(a).chars().collect();
    let b: Vec<char> = text::fold(b).chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 100.0;
    }
    let distance = levenshtein(&a, &b);
    (1.0 - distance as f64 / longest as f64) * 100.0
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Every patient scored against `extracted_name`, best first. Ties keep
/// the directory order.
pub fn rank_candidates(extracted_name: &str, patients: &[Patient]) -> Vec<MatchCandidate> {
    let mut ranked: Vec<MatchCandidate> = patients
        .iter()
        .map(|p| MatchCandidate {
            patient_id: p.id,
            full_name: p.full_name.clone(),
            similarity: similarity(extracted_name, &p.full_name),
        })
        .collect();
    ranked.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    ranked
}

/// Apply the match thresholds to ranked candidates.
pub fn decide(ranked: Vec<MatchCandidate>) -> MatchDecision {
    match ranked.first() {
        Some(best) if best.similarity >= EXACT_MATCH_THRESHOLD => MatchDecision::Exact(best.clone()),
        Some(best) if best.similarity >= CANDIDATE_THRESHOLD => MatchDecision::Ambiguous(
            ranked
                .into_iter()
                .filter(|c| c.similarity >= CANDIDATE_THRESHOLD)
                .take(MAX_CANDIDATES)
                .collect(),
        ),
        _ => MatchDecision::CreateNew,
    }
}
