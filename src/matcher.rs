//! Track identity: normalization, transliteration, and cross-matching.
//!
//! Grounded directly on `sync/differ.py` (normalize, transliterate,
//! match key, cross_match) and `sync/engine.py`'s `_is_good_match`
//! static method (the three-tier acceptance check used when
//! propagating additions via a remote `search` call).

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// SequenceMatcher-style fuzzy threshold; below this on either field,
/// tier 3 rejects outright.
const FUZZY_THRESHOLD: f64 = 0.8;

/// Duration veto tolerance, in milliseconds.
const DURATION_TOLERANCE_MS: i64 = 1000;

/// A track as fetched from a remote service, shared by both clients
/// and the matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub service: &'static str,
    pub remote_id: String,
    pub artist: String,
    pub title: String,
    pub added_at: Option<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub a_track: RemoteTrack,
    pub b_track: RemoteTrack,
    pub confidence: f64,
}

static FEAT_BRACKETED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*[\(\[](feat\.?|ft\.?|featuring)\s+[^\)\]]*[\)\]]").unwrap()
});
static FEAT_INLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+(feat\.?|ft\.?|featuring)\s+.*$").unwrap());
static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*[\(\[][^\)\]]*[\)\]]").unwrap());
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Normalize a track title or artist name for matching: NFKD-decompose,
/// lowercase, strip feat./ft./featuring clauses (bracketed and inline),
/// strip remaining bracketed content, strip punctuation, collapse
/// whitespace.
pub fn normalize(text: &str) -> String {
    use unicode_normalization::UnicodeNormalization;

    let decomposed: String = text.nfkd().collect();
    let lowered = decomposed.to_lowercase();
    let no_feat_bracketed = FEAT_BRACKETED.replace_all(&lowered, "");
    let no_feat_inline = FEAT_INLINE.replace_all(&no_feat_bracketed, "");
    let no_brackets = BRACKETED.replace_all(&no_feat_inline, "");
    let no_punct = NON_WORD.replace_all(&no_brackets, "");
    WHITESPACE.replace_all(&no_punct, " ").trim().to_string()
}

const CYRILLIC_TABLE: &[(char, &str)] = &[
    ('а', "a"), ('б', "b"), ('в', "v"), ('г', "g"), ('д', "d"), ('е', "e"), ('ё', "e"),
    ('ж', "zh"), ('з', "z"), ('и', "i"), ('й', "y"), ('к', "k"), ('л', "l"), ('м', "m"),
    ('н', "n"), ('о', "o"), ('п', "p"), ('р', "r"), ('с', "s"), ('т', "t"), ('у', "u"),
    ('ф', "f"), ('х', "kh"), ('ц', "ts"), ('ч', "ch"), ('ш', "sh"), ('щ', "shch"),
    ('ъ', ""), ('ы', "y"), ('ь', ""), ('э', "e"), ('ю', "yu"), ('я', "ya"),
];

/// Transliterate Cyrillic characters to Latin for cross-platform
/// matching. Characters not in the table pass through unchanged;
/// ъ/ь map to the empty string (dropped), not left as-is.
pub fn transliterate(text: &str) -> String {
    let table: HashMap<char, &str> = CYRILLIC_TABLE.iter().copied().collect();
    let mut out = String::with_capacity(text.len());
    for ch in text.to_lowercase().chars() {
        match table.get(&ch) {
            Some(replacement) => out.push_str(replacement),
            None => out.push(ch),
        }
    }
    out
}

pub fn match_key(artist: &str, title: &str) -> String {
    format!("{}|||{}", normalize(artist), normalize(title))
}

fn contains_either(a: &str, b: &str) -> bool {
    a == b || b.contains(a) || a.contains(b)
}

/// Length-normalised ratio of matching characters, in the style of
/// Python's `difflib.SequenceMatcher.ratio()`: `2*M / (len(a)+len(b))`
/// where `M` is the total length of matching blocks found by
/// recursively taking the longest common contiguous substring. This is
/// deliberately not edit-distance/Levenshtein — the two metrics rank
/// differently on reordered substrings, and the original scores on
/// this one.
pub fn fuzzy_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let matching = matching_block_length(&a, &b);
    (2.0 * matching as f64) / ((a.len() + b.len()) as f64)
}

fn matching_block_length(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (len, ai, bi) = longest_common_substring(a, b);
    if len == 0 {
        return 0;
    }
    matching_block_length(&a[..ai], &b[..bi])
        + len
        + matching_block_length(&a[ai + len..], &b[bi + len..])
}

fn longest_common_substring(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut dp = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    let (mut best_len, mut best_ai, mut best_bi) = (0, 0, 0);
    for i in 0..a.len() {
        for j in 0..b.len() {
            if a[i] == b[j] {
                dp[i + 1][j + 1] = dp[i][j] + 1;
                if dp[i + 1][j + 1] > best_len {
                    best_len = dp[i + 1][j + 1];
                    best_ai = i + 1 - best_len;
                    best_bi = j + 1 - best_len;
                }
            }
        }
    }
    (best_len, best_ai, best_bi)
}

/// Three-tier acceptance check for a `search` result against the query
/// it was found for:
///
/// 1. Normalized containment on both fields — accept, no duration check.
/// 2. Same check after transliteration — accept, no duration check.
/// 3. Fuzzy ratio (max of plain and transliterated) `>= 0.8` on both
///    fields, vetoed if both durations are known and differ by more
///    than one second.
pub fn is_good_match(
    query_artist: &str,
    query_title: &str,
    found_artist: &str,
    found_title: &str,
    query_duration_ms: Option<i64>,
    found_duration_ms: Option<i64>,
) -> bool {
    let q_artist = normalize(query_artist);
    let q_title = normalize(query_title);
    let f_artist = normalize(found_artist);
    let f_title = normalize(found_title);

    let title_ok = contains_either(&q_title, &f_title);
    let artist_ok = contains_either(&q_artist, &f_artist);
    if title_ok && artist_ok {
        return true;
    }

    let qt_artist = transliterate(&q_artist);
    let ft_artist = transliterate(&f_artist);
    let qt_title = transliterate(&q_title);
    let ft_title = transliterate(&f_title);

    let t_artist_ok = artist_ok || contains_either(&qt_artist, &ft_artist);
    let t_title_ok = title_ok || contains_either(&qt_title, &ft_title);
    if t_artist_ok && t_title_ok {
        return true;
    }

    let fuzzy_artist = fuzzy_ratio(&q_artist, &f_artist).max(fuzzy_ratio(&qt_artist, &ft_artist));
    let fuzzy_title = fuzzy_ratio(&q_title, &f_title).max(fuzzy_ratio(&qt_title, &ft_title));

    if fuzzy_artist < FUZZY_THRESHOLD || fuzzy_title < FUZZY_THRESHOLD {
        return false;
    }

    match (query_duration_ms, found_duration_ms) {
        (Some(q), Some(f)) => (q - f).abs() <= DURATION_TOLERANCE_MS,
        _ => true,
    }
}

/// Cross-match two liked-track lists by normalized artist+title. A
/// single-pass bucket-multimap: list B is indexed by match key first,
/// then each list-A entry pops its first remaining candidate. Residual
/// B entries (queues not fully drained) come back as unmatched.
pub fn cross_match(
    a_tracks: Vec<RemoteTrack>,
    b_tracks: Vec<RemoteTrack>,
) -> (Vec<MatchResult>, Vec<RemoteTrack>, Vec<RemoteTrack>) {
    let mut index: HashMap<String, Vec<RemoteTrack>> = HashMap::new();
    for track in b_tracks {
        let key = match_key(&track.artist, &track.title);
        index.entry(key).or_default().push(track);
    }

    let mut matches = Vec::new();
    let mut unmatched_a = Vec::new();

    for a_track in a_tracks {
        let key = match_key(&a_track.artist, &a_track.title);
        let drained = match index.get_mut(&key) {
            Some(candidates) if !candidates.is_empty() => Some(candidates.remove(0)),
            _ => None,
        };
        match drained {
            Some(b_track) => matches.push(MatchResult {
                a_track,
                b_track,
                confidence: 1.0,
            }),
            None => unmatched_a.push(a_track),
        }
    }

    let unmatched_b: Vec<RemoteTrack> = index.into_values().flatten().collect();
    (matches, unmatched_a, unmatched_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_feat_parens_and_bracket_tags() {
        assert_eq!(
            normalize("Lose Yourself (feat. Eminem) [Remix]"),
            "lose yourself"
        );
    }

    #[test]
    fn normalize_strips_inline_feat_tail() {
        assert_eq!(normalize("Blinding Lights feat. Rosalia"), "blinding lights");
    }

    #[test]
    fn normalize_collapses_whitespace_and_punctuation() {
        assert_eq!(normalize("  Don't Stop, Believin'!!  "), "dont stop believin");
    }

    #[test]
    fn tier_one_accepts_normalized_containment_regardless_of_duration() {
        assert!(is_good_match(
            "Daft Punk",
            "One More Time",
            "Daft Punk",
            "One More Time (Edit)",
            Some(200_000),
            Some(999_999_999),
        ));
    }

    #[test]
    fn tier_two_accepts_after_transliteration() {
        assert!(is_good_match(
            "Ленинград", "Экспонат", "leningrad", "eksponat", None, None,
        ));
    }

    #[test]
    fn tier_three_rejects_on_duration_mismatch_despite_fuzzy_match() {
        assert!(!is_good_match(
            "The Chainsmokers",
            "Closer",
            "The Chainsmoker",
            "Closer (feat. Halsey Edit)",
            Some(200_000),
            Some(205_000),
        ));
    }

    #[test]
    fn tier_three_accepts_fuzzy_match_within_duration_tolerance() {
        assert!(is_good_match(
            "The Chainsmokerz",
            "Closer!!",
            "The Chainsmoker",
            "Closer",
            Some(200_000),
            Some(200_900),
        ));
    }

    #[test]
    fn normalize_is_idempotent() {
        let samples = [
            "Lose Yourself (feat. Eminem) [Remix]",
            "  Don't Stop, Believin'!!  ",
            "Паша Панамо",
            "",
        ];
        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn cross_match_is_symmetric_under_swap() {
        let a = vec![
            RemoteTrack {
                service: "a",
                remote_id: "1".into(),
                artist: "Daft Punk".into(),
                title: "One More Time".into(),
                added_at: None,
                duration_ms: None,
            },
            RemoteTrack {
                service: "a",
                remote_id: "2".into(),
                artist: "Only On A".into(),
                title: "Only On A".into(),
                added_at: None,
                duration_ms: None,
            },
        ];
        let b = vec![
            RemoteTrack {
                service: "b",
                remote_id: "100".into(),
                artist: "daft punk".into(),
                title: "one more time".into(),
                added_at: None,
                duration_ms: None,
            },
            RemoteTrack {
                service: "b",
                remote_id: "200".into(),
                artist: "Only On B".into(),
                title: "Only On B".into(),
                added_at: None,
                duration_ms: None,
            },
        ];

        let (matches_fwd, unmatched_a_fwd, unmatched_b_fwd) = cross_match(a.clone(), b.clone());
        let (matches_rev, unmatched_b_rev, unmatched_a_rev) = cross_match(b, a);

        assert_eq!(matches_fwd.len(), matches_rev.len());
        assert_eq!(unmatched_a_fwd.len(), unmatched_a_rev.len());
        assert_eq!(unmatched_b_fwd.len(), unmatched_b_rev.len());
        let ids_fwd: std::collections::HashSet<_> =
            matches_fwd.iter().map(|m| (m.a_track.remote_id.clone(), m.b_track.remote_id.clone())).collect();
        let ids_rev: std::collections::HashSet<_> =
            matches_rev.iter().map(|m| (m.b_track.remote_id.clone(), m.a_track.remote_id.clone())).collect();
        assert_eq!(ids_fwd, ids_rev);
    }

    #[test]
    fn cross_match_pairs_exact_duplicates_and_leaves_residuals() {
        let a = vec![
            RemoteTrack {
                service: "a",
                remote_id: "1".into(),
                artist: "Daft Punk".into(),
                title: "One More Time".into(),
                added_at: None,
                duration_ms: None,
            },
            RemoteTrack {
                service: "a",
                remote_id: "2".into(),
                artist: "Unmatched Artist".into(),
                title: "Unmatched Title".into(),
                added_at: None,
                duration_ms: None,
            },
        ];
        let b = vec![RemoteTrack {
            service: "b",
            remote_id: "100".into(),
            artist: "daft punk".into(),
            title: "one more time".into(),
            added_at: None,
            duration_ms: None,
        }];
        let (matches, unmatched_a, unmatched_b) = cross_match(a, b);
        assert_eq!(matches.len(), 1);
        assert_eq!(unmatched_a.len(), 1);
        assert!(unmatched_b.is_empty());
    }
}
