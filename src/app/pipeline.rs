//! Derives the displayed session list: origin, status, completion and scope
//! filters in that order, then a stable sort. Search never removes rows; it
//! yields positions into the displayed list.

use std::cmp::Ordering;
use std::path::PathBuf;

use crate::matching::{exact_contains, fuzzy_subsequence, normalize_fuzzy_needle};
use crate::types::{Session, SessionStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OriginFilter {
    #[default]
    All,
    Local,
    Remote,
}

impl OriginFilter {
    pub fn next(self) -> Self {
        match self {
            OriginFilter::All => OriginFilter::Local,
            OriginFilter::Local => OriginFilter::Remote,
            OriginFilter::Remote => OriginFilter::All,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            OriginFilter::All => "all",
            OriginFilter::Local => "local",
            OriginFilter::Remote => "remote",
        }
    }

    fn admits(self, session: &Session) -> bool {
        match self {
            OriginFilter::All => true,
            OriginFilter::Local => session.origin.is_local(),
            OriginFilter::Remote => !session.origin.is_local(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortMode {
    #[default]
    Priority,
    Alphabetical,
    Recency,
    StatusGrouped,
    PathGrouped,
}

impl SortMode {
    pub fn next(self) -> Self {
        match self {
            SortMode::Priority => SortMode::Alphabetical,
            SortMode::Alphabetical => SortMode::Recency,
            SortMode::Recency => SortMode::StatusGrouped,
            SortMode::StatusGrouped => SortMode::PathGrouped,
            SortMode::PathGrouped => SortMode::Priority,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SortMode::Priority => "priority",
            SortMode::Alphabetical => "name",
            SortMode::Recency => "recent",
            SortMode::StatusGrouped => "status",
            SortMode::PathGrouped => "path",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    pub origin: OriginFilter,
    pub status: Option<SessionStatus>,
    pub hide_completed: bool,
    pub scope: Option<PathBuf>,
}

impl FilterState {
    pub fn is_active(&self) -> bool {
        self.origin != OriginFilter::All
            || self.status.is_some()
            || self.hide_completed
            || self.scope.is_some()
    }

    /// Cycles the status filter through every status and back to none.
    pub fn cycle_status(&mut self) {
        self.status = match self.status {
            None => Some(SessionStatus::ALL[0]),
            Some(current) => SessionStatus::ALL
                .iter()
                .position(|status| *status == current)
                .and_then(|index| SessionStatus::ALL.get(index + 1).copied()),
        };
    }
}

/// Attention first, then most recent, then identity so the order is total.
pub fn canonical_cmp(a: &Session, b: &Session) -> Ordering {
    a.status
        .priority_rank()
        .cmp(&b.status.priority_rank())
        .then_with(|| b.last_activity.cmp(&a.last_activity))
        .then_with(|| a.origin.cmp(&b.origin))
        .then_with(|| a.name.cmp(&b.name))
}

pub fn sort_canonical(sessions: &mut [Session]) {
    sessions.sort_by(canonical_cmp);
}

/// Indices into `sessions` of the rows to display, in display order.
pub fn derive_displayed(sessions: &[Session], filter: &FilterState, sort: SortMode) -> Vec<usize> {
    let mut rows: Vec<usize> = (0..sessions.len())
        .filter(|&index| filter.origin.admits(&sessions[index]))
        .filter(|&index| {
            filter
                .status
                .is_none_or(|status| sessions[index].status == status)
        })
        .filter(|&index| !(filter.hide_completed && sessions[index].status.is_completed()))
        .filter(|&index| {
            filter
                .scope
                .as_ref()
                .is_none_or(|scope| sessions[index].working_dir.starts_with(scope))
        })
        .collect();

    match sort {
        SortMode::Priority => rows.sort_by(|&a, &b| {
            let (a, b) = (&sessions[a], &sessions[b]);
            a.status
                .priority_rank()
                .cmp(&b.status.priority_rank())
                .then_with(|| b.last_activity.cmp(&a.last_activity))
        }),
        SortMode::Alphabetical => rows.sort_by(|&a, &b| {
            sessions[a]
                .name
                .to_lowercase()
                .cmp(&sessions[b].name.to_lowercase())
        }),
        SortMode::Recency => {
            rows.sort_by(|&a, &b| sessions[b].last_activity.cmp(&sessions[a].last_activity))
        }
        SortMode::StatusGrouped => rows.sort_by_key(|&index| status_group(sessions[index].status)),
        SortMode::PathGrouped => {
            rows.sort_by(|&a, &b| sessions[a].working_dir.cmp(&sessions[b].working_dir))
        }
    }
    rows
}

fn status_group(status: SessionStatus) -> usize {
    SessionStatus::ALL
        .iter()
        .position(|candidate| *candidate == status)
        .unwrap_or(SessionStatus::ALL.len())
}

/// Positions in `displayed` whose session fuzzily matches `query` by name,
/// directory or status message.
pub fn session_matches(sessions: &[Session], displayed: &[usize], query: &str) -> Vec<usize> {
    let needle = normalize_fuzzy_needle(query);
    if needle.is_empty() {
        return Vec::new();
    }
    displayed
        .iter()
        .enumerate()
        .filter(|(_, index)| session_matches_query(&sessions[**index], &needle))
        .map(|(position, _)| position)
        .collect()
}

fn session_matches_query(session: &Session, needle: &str) -> bool {
    fuzzy_subsequence(&session.name, needle)
        || fuzzy_subsequence(&session.working_dir.to_string_lossy(), needle)
        || session
            .message
            .as_deref()
            .is_some_and(|message| fuzzy_subsequence(message, needle))
}

/// Positions of `titles` containing `query` as a case-insensitive substring.
pub fn title_matches<S: AsRef<str>>(titles: &[S], query: &str) -> Vec<usize> {
    titles
        .iter()
        .enumerate()
        .filter(|(_, title)| exact_contains(title.as_ref(), query))
        .map(|(position, _)| position)
        .collect()
}

/// Next match after `from` (or before it when `forward` is false), wrapping.
pub fn step_match(matches: &[usize], from: usize, forward: bool) -> Option<usize> {
    if matches.is_empty() {
        return None;
    }
    if forward {
        matches
            .iter()
            .copied()
            .find(|&position| position > from)
            .or_else(|| matches.first().copied())
    } else {
        matches
            .iter()
            .rev()
            .copied()
            .find(|&position| position < from)
            .or_else(|| matches.last().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Origin;
    use chrono::{DateTime, Utc};

    fn session(name: &str, status: SessionStatus, activity: i64) -> Session {
        let mut session = Session::new(Origin::Local, name, format!("/work/{name}"));
        session.status = status;
        session.last_activity =
            DateTime::<Utc>::from_timestamp(activity, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        session
    }

    fn names(sessions: &[Session], rows: &[usize]) -> Vec<String> {
        rows.iter().map(|index| sessions[*index].name.clone()).collect()
    }

    #[test]
    fn test_status_filter_then_clear_restores_order() {
        let mut sessions = vec![
            session("c", SessionStatus::Done, 30),
            session("b", SessionStatus::Working, 20),
            session("a", SessionStatus::Waiting, 10),
        ];
        sort_canonical(&mut sessions);
        let mut filter = FilterState::default();

        let original = derive_displayed(&sessions, &filter, SortMode::Priority);
        assert_eq!(names(&sessions, &original), vec!["a", "b", "c"]);

        filter.status = Some(SessionStatus::Working);
        let filtered = derive_displayed(&sessions, &filter, SortMode::Priority);
        assert_eq!(names(&sessions, &filtered), vec!["b"]);

        filter.status = None;
        let restored = derive_displayed(&sessions, &filter, SortMode::Priority);
        assert_eq!(restored, original);
        assert_eq!(restored.len(), 3);
    }

    #[test]
    fn test_filters_apply_together() {
        let mut remote = session("r", SessionStatus::Working, 5);
        remote.origin = Origin::Remote("box".to_string());
        let sessions = vec![
            session("done", SessionStatus::Done, 1),
            session("live", SessionStatus::Working, 2),
            remote,
        ];
        let filter = FilterState {
            origin: OriginFilter::Local,
            hide_completed: true,
            ..FilterState::default()
        };
        let rows = derive_displayed(&sessions, &filter, SortMode::Priority);
        assert_eq!(names(&sessions, &rows), vec!["live"]);

        let scoped = FilterState {
            scope: Some(PathBuf::from("/work/done")),
            ..FilterState::default()
        };
        let rows = derive_displayed(&sessions, &scoped, SortMode::Priority);
        assert_eq!(names(&sessions, &rows), vec!["done"]);
    }

    #[test]
    fn test_sort_modes_are_stable() {
        let sessions = vec![
            session("Beta", SessionStatus::Working, 1),
            session("alpha", SessionStatus::Working, 3),
            session("gamma", SessionStatus::Done, 2),
        ];
        let filter = FilterState::default();
        assert_eq!(
            names(&sessions, &derive_displayed(&sessions, &filter, SortMode::Alphabetical)),
            vec!["alpha", "Beta", "gamma"]
        );
        assert_eq!(
            names(&sessions, &derive_displayed(&sessions, &filter, SortMode::Recency)),
            vec!["alpha", "gamma", "Beta"]
        );
        // Working sessions keep their relative input order.
        assert_eq!(
            names(&sessions, &derive_displayed(&sessions, &filter, SortMode::StatusGrouped)),
            vec!["Beta", "alpha", "gamma"]
        );
    }

    #[test]
    fn test_search_marks_without_removing() {
        let mut sessions = vec![
            session("fuzzy-search", SessionStatus::Working, 1),
            session("rate-limit", SessionStatus::Working, 2),
        ];
        sessions[1].message = Some("Implement fuzzy search".to_string());
        let displayed = derive_displayed(&sessions, &FilterState::default(), SortMode::Alphabetical);

        let matches = session_matches(&sessions, &displayed, "fzy");
        assert_eq!(matches, vec![0, 1]);
        assert_eq!(displayed.len(), 2);

        assert!(session_matches(&sessions, &displayed, "   ").is_empty());
        assert_eq!(session_matches(&sessions, &displayed, "rtlm"), vec![1]);
    }

    #[test]
    fn test_title_matches_are_substrings() {
        let titles = ["Add rate limiting", "Implement fuzzy search"];
        assert_eq!(title_matches(&titles, "FUZZY"), vec![1]);
        assert!(title_matches(&titles, "fzy").is_empty());
    }

    #[test]
    fn test_step_match_wraps() {
        let matches = [1, 4, 7];
        assert_eq!(step_match(&matches, 4, true), Some(7));
        assert_eq!(step_match(&matches, 7, true), Some(1));
        assert_eq!(step_match(&matches, 1, false), Some(7));
        assert_eq!(step_match(&matches, 5, false), Some(4));
        assert_eq!(step_match(&[], 0, true), None);
    }

    #[test]
    fn test_cycle_status_returns_to_none() {
        let mut filter = FilterState::default();
        for _ in 0..SessionStatus::ALL.len() {
            filter.cycle_status();
            assert!(filter.status.is_some());
        }
        filter.cycle_status();
        assert_eq!(filter.status, None);
    }
}
