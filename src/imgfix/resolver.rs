use crate::imgfix::config::MatchingConfig;
use crate::imgfix::index::CandidateIndex;
use crate::imgfix::paths;
use crate::imgfix::similarity::{filename_similarity, path_similarity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a dangling reference was matched. Serialized names are the
/// journal's `type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MatchKind {
    #[serde(rename = "exact_match")]
    Exact,
    #[serde(rename = "smart_match")]
    Disambiguated,
    #[serde(rename = "decoded_exact_match")]
    DecodedExact,
    #[serde(rename = "decoded_smart_match")]
    DecodedDisambiguated,
    #[serde(rename = "decoded_path_match")]
    DecodedPathSimilarity,
}

impl MatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact_match",
            Self::Disambiguated => "smart_match",
            Self::DecodedExact => "decoded_exact_match",
            Self::DecodedDisambiguated => "decoded_smart_match",
            Self::DecodedPathSimilarity => "decoded_path_match",
        }
    }

    pub fn is_unique_exact(self) -> bool {
        matches!(self, Self::Exact | Self::DecodedExact)
    }

    fn decoded(self) -> Self {
        match self {
            Self::Exact => Self::DecodedExact,
            Self::Disambiguated => Self::DecodedDisambiguated,
            other => other,
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub target: String,
    pub kind: MatchKind,
    pub confidence: f64,
    pub decoded: Option<String>,
    pub similarity_score: Option<f64>,
    pub candidates_count: Option<usize>,
}

/// Percent-decode, replacing invalid UTF-8 rather than failing.
pub fn percent_decode(raw: &str) -> String {
    let bytes = urlencoding::decode_binary(raw.as_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}

pub struct Resolver<'a> {
    index: &'a CandidateIndex,
    catalogue: &'a [String],
    matching: &'a MatchingConfig,
}

impl<'a> Resolver<'a> {
    pub fn new(
        index: &'a CandidateIndex,
        catalogue: &'a [String],
        matching: &'a MatchingConfig,
    ) -> Self {
        Self {
            index,
            catalogue,
            matching,
        }
    }

    /// Whether a candidate clears the confidence gate: unique exact name
    /// matches always do, everything else must beat the accept threshold.
    pub fn accepts(&self, candidate: &MatchCandidate) -> bool {
        candidate.kind.is_unique_exact() || candidate.confidence > self.matching.accept_threshold
    }

    /// Layered lookup: exact name, disambiguated name, the same two on the
    /// percent-decoded reference, then a catalogue-wide fallback for
    /// decoded references. Decoded kinds only come from the decoded passes.
    pub fn resolve(&self, raw: &str) -> Option<MatchCandidate> {
        let reference = raw.trim();
        if reference.is_empty() {
            return None;
        }

        if let Some(found) = self.by_name(reference) {
            return Some(found);
        }

        let decoded = percent_decode(reference);
        if decoded == reference {
            return None;
        }

        if let Some(mut found) = self.by_name(&decoded) {
            found.kind = found.kind.decoded();
            found.decoded = Some(decoded);
            return Some(found);
        }

        self.global_fallback(&decoded)
    }

    fn by_name(&self, reference: &str) -> Option<MatchCandidate> {
        let candidates = self.index.lookup(reference);
        match candidates {
            [] => None,
            [only] => Some(MatchCandidate {
                target: only.clone(),
                kind: MatchKind::Exact,
                confidence: 1.0,
                decoded: None,
                similarity_score: None,
                candidates_count: Some(1),
            }),
            many => self.disambiguate(reference, many),
        }
    }

    fn disambiguate(&self, reference: &str, candidates: &[String]) -> Option<MatchCandidate> {
        let mut best: Option<(f64, f64, &String)> = None;
        for candidate in candidates {
            let name_score = filename_similarity(reference, candidate);
            if name_score < self.matching.filename_floor {
                continue;
            }
            let path_score = path_similarity(reference, candidate);
            let combined = self.matching.filename_weight * name_score
                + self.matching.path_weight() * path_score;
            if best.is_none_or(|(score, _, _)| combined > score) {
                best = Some((combined, path_score, candidate));
            }
        }

        let (score, path_score, target) = best?;
        let found = MatchCandidate {
            target: target.clone(),
            kind: MatchKind::Disambiguated,
            confidence: score,
            decoded: None,
            similarity_score: Some(path_score),
            candidates_count: Some(candidates.len()),
        };
        if !self.accepts(&found) {
            tracing::debug!(
                reference,
                best = %found.target,
                score,
                candidates = candidates.len(),
                "ambiguous name below confidence gate"
            );
            return None;
        }
        Some(found)
    }

    fn global_fallback(&self, decoded: &str) -> Option<MatchCandidate> {
        let wanted = paths::normalize(decoded).to_lowercase();
        let wanted_len = wanted.chars().count();
        let make = |target: &String, confidence: f64| MatchCandidate {
            target: target.clone(),
            kind: MatchKind::DecodedPathSimilarity,
            confidence,
            decoded: Some(decoded.to_string()),
            similarity_score: Some(confidence),
            candidates_count: Some(self.catalogue.len()),
        };

        let lowered: Vec<String> = self
            .catalogue
            .iter()
            .map(|entry| paths::normalize(entry).to_lowercase())
            .collect();

        if let Some(pos) = lowered.iter().position(|entry| *entry == wanted) {
            return Some(make(&self.catalogue[pos], 1.0));
        }

        let containment_bar = self
            .matching
            .containment_length_ratio
            .max(self.matching.accept_threshold);
        for (pos, entry) in lowered.iter().enumerate() {
            if !(entry.contains(&wanted) || wanted.contains(entry.as_str())) {
                continue;
            }
            let entry_len = entry.chars().count();
            let length_ratio =
                wanted_len.min(entry_len) as f64 / wanted_len.max(entry_len).max(1) as f64;
            if length_ratio > containment_bar {
                return Some(make(&self.catalogue[pos], length_ratio));
            }
        }

        let mut best: Option<(f64, usize)> = None;
        for (pos, entry) in self.catalogue.iter().enumerate() {
            let score = filename_similarity(decoded, entry);
            if best.is_none_or(|(top, _)| score > top) {
                best = Some((score, pos));
            }
        }
        let (score, pos) = best?;
        let found = make(&self.catalogue[pos], score);
        self.accepts(&found).then_some(found)
    }
}
