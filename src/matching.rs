use nucleo::{Config, Matcher, Utf32Str};

pub fn normalize_fuzzy_needle(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Every character of `needle` appears in `haystack` in order, ignoring case.
/// Whitespace in the needle is not required to match.
pub fn fuzzy_subsequence(haystack: &str, needle: &str) -> bool {
    let mut haystack_chars = haystack.chars().flat_map(char::to_lowercase);
    needle
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .flat_map(char::to_lowercase)
        .all(|wanted| haystack_chars.any(|ch| ch == wanted))
}

/// Case-insensitive contiguous substring match.
pub fn exact_contains(haystack: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Char positions of the first in-order occurrence of each needle character,
/// for highlighting. `None` when the needle is not a subsequence.
pub fn subsequence_positions(haystack: &str, needle: &str) -> Option<Vec<usize>> {
    let mut wanted = needle
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .flat_map(char::to_lowercase)
        .peekable();
    let mut positions = Vec::new();
    for (index, ch) in haystack.chars().enumerate() {
        let Some(next) = wanted.peek() else {
            break;
        };
        if ch.to_lowercase().any(|lower| lower == *next) {
            positions.push(index);
            wanted.next();
        }
    }
    wanted.peek().is_none().then_some(positions)
}

fn safe_fuzzy_indices(
    matcher: &mut Matcher,
    haystack: Utf32Str<'_>,
    needle: Utf32Str<'_>,
    indices: &mut Vec<u32>,
) -> Option<u16> {
    if needle.is_empty() || haystack.is_empty() {
        return None;
    }
    matcher.fuzzy_indices(haystack, needle, indices)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedCandidate {
    pub index: usize,
    pub score: u16,
    pub matched_indices: Vec<usize>,
}

/// Ranks candidates for a picker. An empty query keeps every candidate in its
/// original order.
pub fn rank_candidates<S: AsRef<str>>(query: &str, candidates: &[S]) -> Vec<RankedCandidate> {
    let normalized_query = normalize_fuzzy_needle(query);
    if normalized_query.is_empty() {
        return (0..candidates.len())
            .map(|index| RankedCandidate {
                index,
                score: 0,
                matched_indices: Vec::new(),
            })
            .collect();
    }

    let mut matcher = Matcher::new(Config::DEFAULT);
    let mut query_buf = Vec::new();
    let query_utf32 = Utf32Str::new(normalized_query.as_str(), &mut query_buf);
    let mut label_buf = Vec::new();
    let mut matched_indices = Vec::new();
    let mut ranked = Vec::new();

    for (index, candidate) in candidates.iter().enumerate() {
        let label = candidate.as_ref();
        matched_indices.clear();
        if !fuzzy_subsequence(label, normalized_query.as_str()) {
            continue;
        }
        let label_utf32 = Utf32Str::new(label, &mut label_buf);
        if let Some(score) =
            safe_fuzzy_indices(&mut matcher, label_utf32, query_utf32, &mut matched_indices)
        {
            ranked.push(RankedCandidate {
                index,
                score,
                matched_indices: matched_indices.iter().map(|idx| *idx as usize).collect(),
            });
        }
    }

    ranked.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.index.cmp(&b.index)));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fuzzy_subsequence_matches_in_order() {
        assert!(fuzzy_subsequence("Implement fuzzy search", "fzy"));
        assert!(!fuzzy_subsequence("Add rate limiting", "fzy"));
        assert!(fuzzy_subsequence("API-Server", "apis"));
        assert!(!fuzzy_subsequence("abc", "cba"));
    }

    #[test]
    fn test_fuzzy_subsequence_ignores_whitespace_in_needle() {
        assert!(fuzzy_subsequence("frontend-build", "front build"));
    }

    #[test]
    fn test_exact_contains_is_case_insensitive_substring() {
        assert!(exact_contains("Add Rate Limiting", "rate lim"));
        assert!(!exact_contains("Add rate limiting", "rtl"));
        assert!(!exact_contains("anything", "   "));
    }

    #[test]
    fn test_subsequence_positions() {
        assert_eq!(subsequence_positions("fuzzy", "fz"), Some(vec![0, 2]));
        assert_eq!(subsequence_positions("fuzzy", "zf"), None);
        assert_eq!(subsequence_positions("Abc", "a"), Some(vec![0]));
    }

    #[test]
    fn test_rank_candidates_empty_query_keeps_order() {
        let ranked = rank_candidates("", &["b", "a"]);
        assert_eq!(
            ranked.iter().map(|item| item.index).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn test_rank_candidates_filters_non_matches() {
        let candidates = ["/work/api", "/work/web", "/srv/apidocs"];
        let ranked = rank_candidates("api", &candidates);
        let indexes: Vec<usize> = ranked.iter().map(|item| item.index).collect();
        assert!(indexes.contains(&0));
        assert!(indexes.contains(&2));
        assert!(!indexes.contains(&1));
    }
}
