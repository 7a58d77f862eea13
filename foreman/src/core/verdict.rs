//! Verdict resolution from a judge's reply.
//!
//! The judge is asked to end its reply with a structured `VERDICT:` line. Older
//! prompts (and custom ones) only produce free text, so marker scanning is kept
//! as a fallback: rejection markers are checked before acceptance markers
//! because "not complete" contains "complete".

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::types::Verdict;

static VERDICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s*>#_-]*verdict[\s*_]*:[\s*_]*(accepted|rejected)\b")
        .expect("verdict regex is valid")
});

static REASON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s*>#_-]*reason[\s*_]*:[\s*_]*(.+?)\s*$").expect("reason regex is valid")
});

/// Labels that introduce a rejection reason on a line.
const REASON_LABELS: &[&str] = &["原因:", "原因：", "reason:"];

/// Free-text markers used when the reply carries no structured verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerdictMarkers {
    pub rejected: Vec<String>,
    pub accepted: Vec<String>,
}

impl Default for VerdictMarkers {
    fn default() -> Self {
        Self {
            rejected: [
                "[判定: ❌",
                "未完成",
                "not complete",
                "incomplete",
                "not accepted",
                "rejected",
            ]
            .map(String::from)
            .to_vec(),
            accepted: ["[判定: ✅", "已完成", "accepted"].map(String::from).to_vec(),
        }
    }
}

/// A verdict stated with the `VERDICT:` / `REASON:` protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplicitVerdict {
    pub verdict: Verdict,
    pub reason: Option<String>,
}

/// Parse the structured verdict, if the reply carries one.
pub fn parse_explicit_verdict(reply: &str) -> Option<ExplicitVerdict> {
    let caps = VERDICT_RE.captures(reply)?;
    let verdict = match caps.get(1)?.as_str().to_ascii_lowercase().as_str() {
        "accepted" => Verdict::Accepted,
        "rejected" => Verdict::Rejected,
        _ => return None,
    };
    let reason = REASON_RE
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|reason| !reason.is_empty());
    Some(ExplicitVerdict { verdict, reason })
}

/// Whether `marker` occurs in `lowered` (already lowercased).
///
/// ASCII markers only match whole words, so "accepted" does not fire inside
/// "unaccepted". Other markers (CJK, emoji) match as substrings.
fn has_marker(lowered: &str, marker: &str) -> bool {
    let marker = marker.to_lowercase();
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
    if marker.is_empty() {
        return false;
    }
    if !marker.is_ascii() || !(is_word(marker.chars().next()) && is_word(marker.chars().last())) {
        return lowered.contains(&marker);
    }
    match Regex::new(&format!(r"\b{}\b", regex::escape(&marker))) {
        Ok(re) => re.is_match(lowered),
        Err(_) => lowered.contains(&marker),
    }
}

fn any_marker(lowered: &str, markers: &[String]) -> bool {
    markers.iter().any(|marker| has_marker(lowered, marker))
}

/// Scan free text for markers. Rejection wins over acceptance.
pub fn scan_markers(reply: &str, markers: &VerdictMarkers) -> Option<Verdict> {
    let lowered = reply.to_lowercase();
    if any_marker(&lowered, &markers.rejected) {
        return Some(Verdict::Rejected);
    }
    if any_marker(&lowered, &markers.accepted) {
        return Some(Verdict::Accepted);
    }
    None
}

/// First reply line that states a reason or carries a rejection marker.
pub fn extract_reason(reply: &str, markers: &VerdictMarkers) -> Option<String> {
    reply
        .lines()
        .map(str::trim)
        .find(|line| {
            let lowered = line.to_lowercase();
            REASON_LABELS.iter().any(|label| lowered.contains(label))
                || any_marker(&lowered, &markers.rejected)
        })
        .map(str::to_string)
}

/// Rejection record body used when the judge did not write one.
pub fn default_rejection_record(task_name: &str, reason: Option<&str>) -> String {
    let reason = reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("The reviewer rejected this report without stating a specific reason.");
    format!(
        "# Rejected: {task_name}\n\n\
         ## Reason\n\n{reason}\n\n\
         ## Direction\n\n\
         - Re-read the original task and check every requirement against the result.\n\
         - Verify the change with tests or a reproducible check before reporting again.\n\
         - Say explicitly in the next report what changed and how it was verified.\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_verdict_with_reason() {
        let reply = "Looked at the diff.\n\nVERDICT: rejected\nREASON: tests were not run\n";
        let parsed = parse_explicit_verdict(reply).expect("verdict");
        assert_eq!(parsed.verdict, Verdict::Rejected);
        assert_eq!(parsed.reason.as_deref(), Some("tests were not run"));
    }

    #[test]
    fn explicit_verdict_tolerates_markdown_emphasis() {
        let reply = "**Verdict:** Accepted";
        let parsed = parse_explicit_verdict(reply).expect("verdict");
        assert_eq!(parsed.verdict, Verdict::Accepted);
        assert_eq!(parsed.reason, None);
    }

    #[test]
    fn verdict_must_start_a_line() {
        assert_eq!(parse_explicit_verdict("my verdict: accepted"), None);
    }

    #[test]
    fn rejection_markers_win_over_acceptance() {
        let markers = VerdictMarkers::default();
        assert_eq!(
            scan_markers("The work is not complete; partially accepted.", &markers),
            Some(Verdict::Rejected)
        );
        assert_eq!(
            scan_markers("[判定: ✅ 已完成]", &markers),
            Some(Verdict::Accepted)
        );
        assert_eq!(scan_markers("[判定: ❌ 未完成]", &markers), Some(Verdict::Rejected));
        assert_eq!(scan_markers("I looked around.", &markers), None);
    }

    #[test]
    fn negated_acceptance_is_a_rejection() {
        let markers = VerdictMarkers::default();
        assert_eq!(
            scan_markers("The work is not accepted: tests are missing.", &markers),
            Some(Verdict::Rejected)
        );
        assert_eq!(scan_markers("Report rejected.", &markers), Some(Verdict::Rejected));
        assert_eq!(scan_markers("This stays unaccepted for now.", &markers), None);
        assert_eq!(
            scan_markers("Everything checks out, accepted.", &markers),
            Some(Verdict::Accepted)
        );
    }

    #[test]
    fn word_markers_do_not_match_inside_words() {
        let lowered = "the change was preaccepted by ci";
        assert!(!has_marker(lowered, "accepted"));
        assert!(has_marker("accepted.", "Accepted"));
        assert!(has_marker("[判定: ✅ 已完成]", "[判定: ✅"));
        assert!(has_marker("任务未完成。", "未完成"));
    }

    #[test]
    fn reason_comes_from_first_marked_line() {
        let markers = VerdictMarkers::default();
        let reply = "Summary line\n原因: 缺少测试\nThe work is incomplete.";
        assert_eq!(extract_reason(reply, &markers).as_deref(), Some("原因: 缺少测试"));

        let reply = "Checked.\nThe migration is incomplete: no rollback.\n";
        assert_eq!(
            extract_reason(reply, &markers).as_deref(),
            Some("The migration is incomplete: no rollback.")
        );
        assert_eq!(extract_reason("all good", &markers), None);
    }

    #[test]
    fn default_record_includes_reason_and_direction() {
        let text = default_rejection_record("fix-login", Some("no tests"));
        assert!(text.contains("# Rejected: fix-login"));
        assert!(text.contains("no tests"));
        assert!(text.contains("## Direction"));

        let text = default_rejection_record("fix-login", None);
        assert!(text.contains("without stating a specific reason"));
    }
}
