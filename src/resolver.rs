//! Title-to-id resolution: turns a free-text title list into id-map
//! entries by scoring candidate storefront titles and picking the best
//! match above a confidence threshold.
//!
//! Grounded on
//! `examples/original_source/updater/game_data_builder.py`'s
//! `should_exclude`/`calculate_score`/`find_best_match`. The similarity
//! score uses a Ratcliff/Obershelp ratio equivalent to Python's
//! `difflib.SequenceMatcher(None, a, b).ratio()` (not Levenshtein or
//! Jaro-Winkler), hand-rolled here since no crate in the pack implements
//! that exact algorithm.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;

use crate::config::{
    EXCLUDE_KEYWORDS, KEEP_EDITIONS, SCORE_AUTO_ACCEPT_THRESHOLD, SCORE_CANDIDATE_THRESHOLD,
    SCORE_EXACT_MATCH, SCORE_PARTIAL_MATCH_BASE, SCORE_SIMILARITY_MULTIPLIER,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub app_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredCandidate {
    pub app_id: String,
    pub name: String,
    pub score: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// A single candidate scored at or above `SCORE_AUTO_ACCEPT_THRESHOLD`.
    AutoAccept(ScoredCandidate),
    /// The best candidate scored in `[SCORE_CANDIDATE_THRESHOLD,
    /// SCORE_AUTO_ACCEPT_THRESHOLD)` — recorded, not auto-applied.
    LowConfidence(ScoredCandidate),
    /// More than one candidate tied at `SCORE_EXACT_MATCH`.
    Ambiguous(Vec<ScoredCandidate>),
    /// No candidate reached `SCORE_CANDIDATE_THRESHOLD`.
    NoMatch,
}

/// `true` if `title` should be dropped from the candidate pool: it
/// contains an exclude keyword and no keep-edition keyword overrides it.
pub fn should_exclude(title: &str) -> bool {
    let upper = title.to_uppercase();

    if KEEP_EDITIONS.iter().any(|k| upper.contains(&k.to_uppercase())) {
        return false;
    }

    EXCLUDE_KEYWORDS.iter().any(|k| upper.contains(&k.to_uppercase()))
}

/// Scores `candidate` against `search`: 100 for an exact (case/whitespace
/// insensitive) match, a length-penalized 90-based score for a substring
/// match, and `similarity * 80` otherwise.
pub fn calculate_score(search: &str, candidate: &str) -> i32 {
    let search_lower = search.to_lowercase();
    let search_lower = search_lower.trim();
    let candidate_lower = candidate.to_lowercase();
    let candidate_lower = candidate_lower.trim();

    if search_lower == candidate_lower {
        return SCORE_EXACT_MATCH;
    }

    if candidate_lower.contains(search_lower) {
        let length_diff = (candidate_lower.chars().count() as i32 - search_lower.chars().count() as i32).abs();
        return (SCORE_PARTIAL_MATCH_BASE - length_diff).max(0);
    }

    let similarity = sequence_matcher_ratio(search_lower, candidate_lower);
    (similarity * SCORE_SIMILARITY_MULTIPLIER as f64) as i32
}

pub fn find_best_match(title: &str, candidates: &[Candidate]) -> MatchOutcome {
    let mut scored: Vec<ScoredCandidate> = candidates
        .iter()
        .filter(|c| !c.name.is_empty() && !should_exclude(&c.name))
        .map(|c| ScoredCandidate {
            app_id: c.app_id.clone(),
            name: c.name.clone(),
            score: calculate_score(title, &c.name),
        })
        .filter(|c| c.score >= SCORE_CANDIDATE_THRESHOLD)
        .collect();

    if scored.is_empty() {
        return MatchOutcome::NoMatch;
    }

    scored.sort_by(|a, b| b.score.cmp(&a.score));

    let exact_matches: Vec<ScoredCandidate> = scored
        .iter()
        .filter(|c| c.score == SCORE_EXACT_MATCH)
        .cloned()
        .collect();
    if exact_matches.len() > 1 {
        return MatchOutcome::Ambiguous(exact_matches);
    }

    let best = scored.into_iter().next().expect("non-empty checked above");
    if best.score >= SCORE_AUTO_ACCEPT_THRESHOLD {
        MatchOutcome::AutoAccept(best)
    } else {
        MatchOutcome::LowConfidence(best)
    }
}

/// Ratcliff/Obershelp similarity ratio, matching
/// `difflib.SequenceMatcher(None, a, b).ratio()`: `2*M / T` where `M` is
/// the total length of matching blocks found by recursively locating the
/// longest common contiguous substring, and `T` is the combined length of
/// both strings.
pub fn sequence_matcher_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let matches = matching_blocks_length(&a, &b);
    2.0 * matches as f64 / (a.len() + b.len()) as f64
}

fn matching_blocks_length(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let (len, a_start, b_start) = longest_match(a, b);
    if len == 0 {
        return 0;
    }

    let left = matching_blocks_length(&a[..a_start], &b[..b_start]);
    let right = matching_blocks_length(&a[a_start + len..], &b[b_start + len..]);
    left + len + right
}

/// Finds the longest contiguous run common to `a` and `b`, returning
/// `(length, start_in_a, start_in_b)`. Ties break toward the earliest
/// match in `a` then in `b`, matching `difflib`'s behavior.
fn longest_match(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut b_index: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, &c) in b.iter().enumerate() {
        b_index.entry(c).or_default().push(j);
    }

    let mut best = (0usize, 0usize, 0usize);
    let mut run_ending_at: HashMap<usize, usize> = HashMap::new();

    for (i, &c) in a.iter().enumerate() {
        let mut new_run_ending_at: HashMap<usize, usize> = HashMap::new();
        if let Some(js) = b_index.get(&c) {
            for &j in js {
                let run_len = run_ending_at.get(&j.wrapping_sub(1)).copied().unwrap_or(0) + 1;
                new_run_ending_at.insert(j, run_len);
                if run_len > best.0 {
                    best = (run_len, i + 1 - run_len, j + 1 - run_len);
                }
            }
        }
        run_ending_at = new_run_ending_at;
    }

    best
}

/// One accepted title-to-id mapping, with its price-history id if the
/// lookup succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedMapping {
    pub app_id: String,
    pub itad_id: Option<String>,
}

/// Outcome of resolving an entire title-list file against the storefront's
/// app catalog.
#[derive(Debug, Default, Clone)]
pub struct ResolveOutcome {
    pub accepted: Vec<AcceptedMapping>,
    pub ambiguous: Vec<String>,
    pub low_confidence: Vec<(String, String, i32)>,
    pub no_match: Vec<String>,
}

/// Loads the resumable TSV cache at `mapping_result_path` (format:
/// `<app-id>\t<history-id-or-empty>`, one line per accepted mapping),
/// returning `app_id -> itad_id` so a restarted run can reuse decisions
/// from the previous attempt without re-querying price-history.
async fn load_resumed_mappings(mapping_result_path: &Path) -> Result<HashMap<String, Option<String>>> {
    let mut resumed = HashMap::new();
    let Ok(contents) = tokio::fs::read_to_string(mapping_result_path).await else {
        return Ok(resumed);
    };
    for line in contents.lines() {
        let mut parts = line.splitn(2, '\t');
        let Some(app_id) = parts.next() else { continue };
        if app_id.is_empty() {
            continue;
        }
        let itad_id = parts.next().filter(|s| !s.is_empty()).map(|s| s.to_string());
        resumed.insert(app_id.to_string(), itad_id);
    }
    Ok(resumed)
}

/// Resolves every non-blank line of `title_file` to a storefront app-id,
/// using `lookup_history_id` to fetch the price-history id for newly
/// accepted ids (resumed ids reuse the cached value and skip the lookup
/// entirely). Every newly accepted mapping is appended to
/// `mapping_result_path` as it's decided, so a crash mid-run loses no more
/// than the in-flight title.
pub async fn resolve_title_file<F, Fut>(
    title_file: &Path,
    mapping_result_path: &Path,
    candidates: &[Candidate],
    mut lookup_history_id: F,
) -> Result<ResolveOutcome>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Option<String>>,
{
    let resumed = load_resumed_mappings(mapping_result_path).await?;
    let by_app_id: HashMap<&str, &Candidate> = candidates.iter().map(|c| (c.app_id.as_str(), c)).collect();

    let contents = tokio::fs::read_to_string(title_file)
        .await
        .with_context(|| format!("failed to read title list {}", title_file.display()))?;

    if let Some(parent) = mapping_result_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    let mut mapping_file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(mapping_result_path)
        .await
        .with_context(|| format!("failed to open {}", mapping_result_path.display()))?;

    let mut outcome = ResolveOutcome::default();
    let mut accepted_ids: HashSet<String> = resumed.keys().cloned().collect();

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let numeric_app_id = line
            .split_whitespace()
            .find(|tok| !tok.is_empty() && tok.chars().all(|c| c.is_ascii_digit()))
            .filter(|tok| by_app_id.contains_key(*tok));

        let app_id = if let Some(id) = numeric_app_id {
            Some(id.to_string())
        } else {
            match find_best_match(line, candidates) {
                MatchOutcome::AutoAccept(c) => Some(c.app_id),
                MatchOutcome::LowConfidence(c) => {
                    outcome.low_confidence.push((line.to_string(), c.name, c.score));
                    None
                }
                MatchOutcome::Ambiguous(_) => {
                    outcome.ambiguous.push(line.to_string());
                    None
                }
                MatchOutcome::NoMatch => {
                    outcome.no_match.push(line.to_string());
                    None
                }
            }
        };

        let Some(app_id) = app_id else { continue };
        if accepted_ids.contains(&app_id) {
            let itad_id = resumed.get(&app_id).cloned().flatten();
            outcome.accepted.push(AcceptedMapping { app_id, itad_id });
            continue;
        }

        let itad_id = lookup_history_id(app_id.clone()).await;
        let tsv_line = format!("{app_id}\t{}\n", itad_id.as_deref().unwrap_or(""));
        mapping_file
            .write_all(tsv_line.as_bytes())
            .await
            .context("failed to append to mapping result file")?;

        accepted_ids.insert(app_id.clone());
        outcome.accepted.push(AcceptedMapping { app_id, itad_id });
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_scores_100() {
        assert_eq!(calculate_score("Portal 2", "Portal 2"), 100);
        assert_eq!(calculate_score("portal 2", "  Portal 2  "), 100);
    }

    #[test]
    fn substring_match_penalizes_length_difference() {
        let score = calculate_score("Portal", "Portal 2 Collector's Edition");
        assert!(score < SCORE_PARTIAL_MATCH_BASE);
        assert!(score >= 0);
    }

    #[test]
    fn similarity_ratio_matches_known_values() {
        assert_eq!(sequence_matcher_ratio("", ""), 1.0);
        assert!((sequence_matcher_ratio("abc", "abc") - 1.0).abs() < 1e-9);
        let r = sequence_matcher_ratio("gold", "gould");
        assert!((r - 0.888_888_888_888).abs() < 1e-6);
    }

    #[test]
    fn excludes_soundtrack_unless_keep_edition_present() {
        assert!(should_exclude("Game Title Soundtrack"));
        assert!(!should_exclude("Game Title Definitive Edition"));
    }

    #[test]
    fn find_best_match_flags_multiple_exact() {
        let candidates = vec![
            Candidate { app_id: "1".into(), name: "Portal".into() },
            Candidate { app_id: "2".into(), name: "Portal".into() },
        ];
        match find_best_match("Portal", &candidates) {
            MatchOutcome::Ambiguous(m) => assert_eq!(m.len(), 2),
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn find_best_match_reports_low_confidence_between_60_and_80() {
        let candidates = vec![Candidate {
            app_id: "1".into(),
            name: "Totally Different Thing Entirely Unrelated".into(),
        }];
        let score = calculate_score("Totally Different Thing", &candidates[0].name);
        assert!((SCORE_CANDIDATE_THRESHOLD..SCORE_AUTO_ACCEPT_THRESHOLD).contains(&score));
        match find_best_match("Totally Different Thing", &candidates) {
            MatchOutcome::LowConfidence(c) => assert_eq!(c.app_id, "1"),
            other => panic!("expected LowConfidence, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolve_title_file_accepts_exact_and_numeric_lines() {
        let dir = tempfile::tempdir().unwrap();
        let title_path = dir.path().join("titles.txt");
        let mapping_path = dir.path().join("mapping_result.txt");
        tokio::fs::write(&title_path, "Portal 2\n620\n").await.unwrap();

        let candidates = vec![
            Candidate { app_id: "400".into(), name: "Portal 2".into() },
            Candidate { app_id: "620".into(), name: "Portal 2: Extended".into() },
        ];

        let outcome = resolve_title_file(&title_path, &mapping_path, &candidates, |app_id| async move {
            Some(format!("itad-{app_id}"))
        })
        .await
        .unwrap();

        assert_eq!(outcome.accepted.len(), 2);
        assert!(outcome.accepted.iter().any(|m| m.app_id == "400"));
        assert!(outcome.accepted.iter().any(|m| m.app_id == "620"));

        let tsv = tokio::fs::read_to_string(&mapping_path).await.unwrap();
        assert_eq!(tsv.lines().count(), 2);
    }

    #[tokio::test]
    async fn resolve_title_file_resumes_without_relookup() {
        let dir = tempfile::tempdir().unwrap();
        let title_path = dir.path().join("titles.txt");
        let mapping_path = dir.path().join("mapping_result.txt");
        tokio::fs::write(&title_path, "Portal 2\n").await.unwrap();
        tokio::fs::write(&mapping_path, "400\titad-cached\n").await.unwrap();

        let candidates = vec![Candidate { app_id: "400".into(), name: "Portal 2".into() }];

        let mut lookups = 0;
        let outcome = resolve_title_file(&title_path, &mapping_path, &candidates, |_| {
            lookups += 1;
            async move { None }
        })
        .await
        .unwrap();

        assert_eq!(lookups, 0, "resumed id must not trigger a fresh lookup");
        assert_eq!(outcome.accepted[0].itad_id.as_deref(), Some("itad-cached"));
    }
}
