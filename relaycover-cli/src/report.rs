//! Text and JSON renderings of a finished analysis

use serde::Serialize;

use relaycover_core::{
    calculate_ranks, format_relay_name, read_relays, FolloweeAnalysis, Profile, RelayDescriptor,
    RelayState, RelayStatusEntry,
};

fn or_dash(value: Option<&str>) -> &str {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => "-",
    }
}

/// One comma-separated line per row: the user first, then each followee in
/// display order as `seq, rank, picture, name, display_name, coverage, relays`.
pub fn dump_lines(
    user_profile: Option<&Profile>,
    user_relays: &[RelayDescriptor],
    analyses: &[FolloweeAnalysis],
) -> Vec<String> {
    let mut lines = Vec::with_capacity(analyses.len() + 1);

    if let Some(user) = user_profile {
        let reads: Vec<&str> = user_relays
            .iter()
            .filter(|r| r.read)
            .map(|r| format_relay_name(&r.url))
            .collect();
        let relays = if reads.is_empty() { "-".to_string() } else { reads.join(", ") };
        lines.push(format!(
            ", user, -, {}, {}, {}, , {}",
            or_dash(user.picture.as_deref()),
            or_dash(user.name.as_deref()),
            or_dash(user.display_name.as_deref()),
            relays
        ));
    }

    let ranks = calculate_ranks(analyses);
    for (i, (analysis, rank)) in analyses.iter().zip(ranks).enumerate() {
        let rank = rank.map_or_else(|| "-".to_string(), |r| r.to_string());
        let coverage = analysis
            .coverage
            .map_or_else(|| "-".to_string(), |c| c.to_string());
        let marked: Vec<String> = analysis
            .readable_relays
            .iter()
            .map(|r| format!("{}:R", format_relay_name(r)))
            .chain(
                analysis
                    .unreadable_relays
                    .iter()
                    .map(|r| format!("{}:N", format_relay_name(r))),
            )
            .collect();
        let relays = if marked.is_empty() { "-".to_string() } else { marked.join(", ") };

        lines.push(format!(
            "{}, {}, {}, {}, {}, {}, {}",
            i + 1,
            rank,
            or_dash(analysis.profile.picture.as_deref()),
            or_dash(analysis.profile.name.as_deref()),
            or_dash(analysis.profile.display_name.as_deref()),
            coverage,
            relays
        ));
    }
    lines
}

/// Counts of relays per final state, in lifecycle order, skipping zeros
pub fn relay_summary(statuses: &[RelayStatusEntry]) -> String {
    const ORDER: [RelayState; 6] = [
        RelayState::Eose,
        RelayState::Loading,
        RelayState::Connecting,
        RelayState::Wait,
        RelayState::Timeout,
        RelayState::Error,
    ];
    ORDER
        .iter()
        .filter_map(|state| {
            let n = statuses.iter().filter(|s| s.state == *state).count();
            (n > 0).then(|| format!("{} {}", n, state))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Serialize)]
pub struct RankedFollowee<'a> {
    pub seq: usize,
    pub rank: Option<usize>,
    #[serde(flatten)]
    pub analysis: &'a FolloweeAnalysis,
}

/// Machine-readable run report
#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub generated_at: String,
    pub user: Option<&'a Profile>,
    pub user_read_relays: Vec<String>,
    pub analyzed: usize,
    pub total: usize,
    pub followees: Vec<RankedFollowee<'a>>,
    pub relays: &'a [RelayStatusEntry],
}

impl<'a> JsonReport<'a> {
    pub fn new(
        user: Option<&'a Profile>,
        user_relays: &[RelayDescriptor],
        analyses: &'a [FolloweeAnalysis],
        relays: &'a [RelayStatusEntry],
    ) -> Self {
        let followees = analyses
            .iter()
            .zip(calculate_ranks(analyses))
            .enumerate()
            .map(|(i, (analysis, rank))| RankedFollowee {
                seq: i + 1,
                rank,
                analysis,
            })
            .collect();
        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            user,
            user_read_relays: read_relays(user_relays),
            analyzed: analyses.iter().filter(|a| a.is_analyzed()).count(),
            total: analyses.len(),
            followees,
            relays,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycover_core::{analyze_coverage, Identity};

    fn followee(c: char, name: Option<&str>, writes: Option<&[&str]>, reads: &[&str]) -> FolloweeAnalysis {
        let mut profile = Profile::empty(Identity::from_hex(&c.to_string().repeat(64)).unwrap());
        profile.name = name.map(str::to_string);
        match writes {
            Some(w) => {
                let w: Vec<String> = w.iter().map(|s| s.to_string()).collect();
                let report = analyze_coverage(&w, reads);
                FolloweeAnalysis::analyzed(profile, w, report)
            }
            None => FolloweeAnalysis::pending(profile),
        }
    }

    #[test]
    fn test_dump_lines_format() {
        let mut user = Profile::empty(Identity::from_hex(&"e".repeat(64)).unwrap());
        user.name = Some("me".into());
        let user_relays = vec![
            RelayDescriptor::new("wss://r1.test", true, true),
            RelayDescriptor::new("wss://w.test", false, true),
        ];
        let reads = ["wss://r1.test"];
        let analyses = vec![
            followee('a', Some("alice"), Some(&["wss://r1.test", "wss://x.test"]), &reads),
            followee('b', None, None, &reads),
        ];

        let lines = dump_lines(Some(&user), &user_relays, &analyses);
        assert_eq!(lines[0], ", user, -, -, me, -, , r1.test");
        assert_eq!(lines[1], "1, 1, -, alice, -, 1, r1.test:R, x.test:N");
        assert_eq!(lines[2], "2, -, -, -, -, -, -");
    }

    #[test]
    fn test_relay_summary_skips_empty_states() {
        let statuses = vec![
            RelayStatusEntry {
                url: "wss://a.test".into(),
                state: RelayState::Eose,
            },
            RelayStatusEntry {
                url: "wss://b.test".into(),
                state: RelayState::Eose,
            },
            RelayStatusEntry {
                url: "wss://c.test".into(),
                state: RelayState::Error,
            },
        ];
        assert_eq!(relay_summary(&statuses), "2 eose, 1 error");
        assert_eq!(relay_summary(&[]), "");
    }

    #[test]
    fn test_json_report_ranks_and_counts() {
        let reads = ["wss://r1.test"];
        let analyses = vec![
            followee('a', None, Some(&["wss://r1.test"]), &reads),
            followee('b', None, Some(&["wss://r1.test"]), &reads),
            followee('c', None, None, &reads),
        ];
        let report = JsonReport::new(None, &[], &analyses, &[]);
        assert_eq!(report.analyzed, 2);
        assert_eq!(report.total, 3);
        let ranks: Vec<Option<usize>> = report.followees.iter().map(|f| f.rank).collect();
        assert_eq!(ranks, vec![Some(1), Some(1), None]);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["followees"][0]["seq"], 1);
        assert_eq!(json["followees"][0]["coverage"], 1);
    }
}
