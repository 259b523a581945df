//! Coverage analysis and ranking
//!
//! Coverage is the number of a followee's write relays that the user also
//! reads from. Comparison happens on normalized URLs, but the output keeps
//! the followee's original spelling and duplicates.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{normalize_relay_url, Identity, Profile};

/// Readable/unreadable partition of a followee's write relays
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub readable_relays: Vec<String>,
    pub unreadable_relays: Vec<String>,
    pub coverage: usize,
}

/// Partition `write_relays` by membership in `read_relays`.
pub fn analyze_coverage<W, R>(write_relays: &[W], read_relays: &[R]) -> CoverageReport
where
    W: AsRef<str>,
    R: AsRef<str>,
{
    let readable_set: HashSet<String> = read_relays
        .iter()
        .map(|r| normalize_relay_url(r.as_ref()))
        .collect();

    let (readable, unreadable): (Vec<String>, Vec<String>) = write_relays
        .iter()
        .map(|w| w.as_ref().to_string())
        .partition(|w| readable_set.contains(&normalize_relay_url(w)));

    CoverageReport {
        coverage: readable.len(),
        readable_relays: readable,
        unreadable_relays: unreadable,
    }
}

/// Per-followee analysis record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolloweeAnalysis {
    pub profile: Profile,
    pub write_relays: Vec<String>,
    pub readable_relays: Vec<String>,
    pub unreadable_relays: Vec<String>,
    /// `None` until relay data for the followee has been analyzed
    pub coverage: Option<usize>,
}

impl FolloweeAnalysis {
    /// Record for a followee with no relay data yet
    pub fn pending(profile: Profile) -> Self {
        Self {
            profile,
            write_relays: Vec::new(),
            readable_relays: Vec::new(),
            unreadable_relays: Vec::new(),
            coverage: None,
        }
    }

    /// Fully analyzed record; relay fields are replaced, never merged
    pub fn analyzed(profile: Profile, write_relays: Vec<String>, report: CoverageReport) -> Self {
        Self {
            profile,
            write_relays,
            readable_relays: report.readable_relays,
            unreadable_relays: report.unreadable_relays,
            coverage: Some(report.coverage),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.profile.identity
    }

    pub fn is_analyzed(&self) -> bool {
        self.coverage.is_some()
    }

    /// Coverage with `-1` standing in for "not analyzed"
    pub fn coverage_score(&self) -> i64 {
        self.coverage.map(|c| c as i64).unwrap_or(-1)
    }
}

/// Stable sort: ascending coverage, unanalyzed records last in input order.
pub fn sort_by_coverage(analyses: &mut [FolloweeAnalysis]) {
    analyses.sort_by_key(|a| match a.coverage {
        Some(c) => (0u8, c),
        None => (1u8, 0),
    });
}

/// Competition ranks for a list in display order.
///
/// Walks the list in order counting analyzed records. A record whose coverage
/// equals the previous analyzed record's coverage shares its rank; otherwise
/// its rank is the running count of analyzed records. Unanalyzed records get
/// `None` and are skipped by the comparison.
pub fn calculate_ranks(analyses: &[FolloweeAnalysis]) -> Vec<Option<usize>> {
    let mut ranks = Vec::with_capacity(analyses.len());
    let mut analyzed_count = 0usize;
    let mut prev: Option<(usize, usize)> = None; // (coverage, rank)

    for analysis in analyses {
        let Some(coverage) = analysis.coverage else {
            ranks.push(None);
            continue;
        };
        analyzed_count += 1;
        let rank = match prev {
            Some((prev_coverage, prev_rank)) if prev_coverage == coverage => prev_rank,
            _ => analyzed_count,
        };
        ranks.push(Some(rank));
        prev = Some((coverage, rank));
    }

    ranks
}
