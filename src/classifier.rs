//! Guess which review system, if any, a Mercurial changeset went through.

use std::fmt;
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::bmo::{
    Attachment, BugTracker, HistoryEntry, ATTACHMENT_TYPE_GITHUB, ATTACHMENT_TYPE_MOZREVIEW,
    ATTACHMENT_TYPE_PHABRICATOR,
};
use crate::commitparser::parse_bugs;
use crate::error::TelemetryError;
use crate::hgmo::Changeset;

/// Serialized values are what the telemetry ping carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReviewSystem {
    #[serde(rename = "phabricator")]
    Phabricator,
    #[serde(rename = "mozreview")]
    MozReview,
    #[serde(rename = "bmo")]
    Bmo,
    #[serde(rename = "unknown")]
    Unknown,
    #[serde(rename = "not_applicable")]
    NotApplicable,
}

impl ReviewSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewSystem::Phabricator => "phabricator",
            ReviewSystem::MozReview => "mozreview",
            ReviewSystem::Bmo => "bmo",
            ReviewSystem::Unknown => "unknown",
            ReviewSystem::NotApplicable => "not_applicable",
        }
    }
}

impl fmt::Display for ReviewSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("static regex is valid"))
        }
    };
}

// "Differential Revision: https://phabricator.services.mozilla.com/D861"
static_regex!(phabricator_commit_re, r"Differential Revision: ([\w:/.]*)(D[0-9]{3,})");
// "Backed out 4 changesets (bug 1448077) for xpcshell failures at..."
static_regex!(backout_re, r"(?i)^back(?:ed|ing)? out ");
static_regex!(no_bug_re, r"(?i)\bno bug\b");
static_regex!(wpt_sync_author_re, r"wptsync@mozilla\.(?:com|org)");
static_regex!(wpt_uplift_summary_re, r"\[wpt PR \d+\].*\ba=testonly\b");
static_regex!(uplift_re, r"\ba=\S+");

/// The first line of a commit description.
pub fn split_summary(description: &str) -> &str {
    description.lines().next().unwrap_or("")
}

pub fn has_phab_markers(description: &str) -> bool {
    phabricator_commit_re().is_match(description)
}

pub fn has_backout_markers(summary: &str) -> bool {
    backout_re().is_match(summary)
}

pub fn has_merge_markers(changeset: &Changeset) -> bool {
    changeset.is_merge()
}

pub fn has_no_bug_marker(summary: &str) -> bool {
    no_bug_re().is_match(summary)
}

/// Is this a web-platform-tests sync commit landed by the sync bot?
pub fn has_wpt_uplift_markers(author: &str, summary: &str) -> bool {
    wpt_sync_author_re().is_match(author) || wpt_uplift_summary_re().is_match(summary)
}

/// Does the summary carry an approval (`a=...`) marker?
pub fn has_uplift_markers(summary: &str) -> bool {
    uplift_re().is_match(summary)
}

pub fn is_patch(attachment: &Attachment) -> bool {
    attachment.is_patch == 1
        || [
            ATTACHMENT_TYPE_MOZREVIEW,
            ATTACHMENT_TYPE_GITHUB,
            ATTACHMENT_TYPE_PHABRICATOR,
        ]
        .contains(&attachment.content_type.as_str())
}

/// Attachments that could still stand for a review: not obsolete, patch-like,
/// and not a retired MozReview request.
pub fn collect_review_attachments(attachments: &[Attachment]) -> Vec<Attachment> {
    attachments
        .iter()
        .filter(|a| a.is_obsolete == 0)
        .filter(|a| a.content_type != ATTACHMENT_TYPE_MOZREVIEW)
        .filter(|a| is_patch(a))
        .cloned()
        .collect()
}

pub fn has_mozreview_markers(attachments: &[Attachment]) -> bool {
    attachments
        .iter()
        .filter(|a| is_patch(a))
        .any(|a| a.content_type == ATTACHMENT_TYPE_MOZREVIEW)
}

fn has_phabricator_attachments(attachments: &[Attachment]) -> bool {
    attachments
        .iter()
        .any(|a| a.content_type == ATTACHMENT_TYPE_PHABRICATOR)
}

/// A raw patch plus at least one `review+` flag anywhere in the bug history.
///
/// review? and review+ changes are not balanced against each other.
pub fn has_bmo_patch_review_markers(attachments: &[Attachment], history: &[HistoryEntry]) -> bool {
    if !attachments.iter().any(|a| a.is_patch == 1) {
        return false;
    }

    history
        .iter()
        .flat_map(|entry| entry.changes.iter())
        .filter(|change| change.field_name == "flagtypes.name")
        .any(|change| change.added.split(',').any(|flag| flag.trim() == "review+"))
}

/// Look for review system markers and guess which review system was used.
pub async fn determine_review_system(
    changeset: &Changeset,
    bugs: &dyn BugTracker,
) -> Result<ReviewSystem> {
    let node = &changeset.node;
    let summary = split_summary(&changeset.desc);

    if has_backout_markers(summary) || has_merge_markers(changeset) {
        info!("no review system for changeset {}: changeset is a back-out or merge commit", node);
        return Ok(ReviewSystem::NotApplicable);
    }

    if has_phab_markers(&changeset.desc) {
        return Ok(ReviewSystem::Phabricator);
    }

    if has_wpt_uplift_markers(&changeset.user, summary) || has_uplift_markers(summary) {
        info!("no review system for changeset {}: changeset is a sync or uplift commit", node);
        return Ok(ReviewSystem::NotApplicable);
    }

    if has_no_bug_marker(summary) {
        info!("could not determine review system for changeset {}: changeset is marked 'no bug'", node);
        return Ok(ReviewSystem::Unknown);
    }

    // Bugs referenced at the end of the summary may still pick the wrong ID,
    // e.g. "[wpt PR 10812] blah blah (bug 1111111) r=foo".
    let Some(bug_id) = parse_bugs(summary).first().copied() else {
        info!(
            "could not determine review system for changeset {}: unable to find a bug id in the changeset summary",
            node
        );
        return Ok(ReviewSystem::Unknown);
    };

    let fetched = match bugs.fetch_attachments(bug_id).await {
        Ok(attachments) => bugs.fetch_bug_history(bug_id).await.map(|h| (attachments, h)),
        Err(e) => Err(e),
    };
    let (attachments, history) = match fetched {
        Ok(fetched) => fetched,
        Err(e) => match e.downcast_ref::<TelemetryError>() {
            Some(err) if err.is_http() => {
                info!(
                    "could not determine review system for changeset {} with bug {}: {}",
                    node, bug_id, err
                );
                return Ok(ReviewSystem::Unknown);
            }
            _ => return Err(e),
        },
    };

    if has_phabricator_attachments(&collect_review_attachments(&attachments)) {
        return Ok(ReviewSystem::Phabricator);
    }

    if has_bmo_patch_review_markers(&attachments, &history) {
        return Ok(ReviewSystem::Bmo);
    }

    if has_mozreview_markers(&attachments) {
        return Ok(ReviewSystem::MozReview);
    }

    info!(
        "could not determine review system for changeset {} with bug {}: the changeset is missing all known review system markers",
        node, bug_id
    );
    Ok(ReviewSystem::Unknown)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bmo::FieldChange;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    /// Canned Bugzilla answers for a single bug.
    #[derive(Default)]
    pub(crate) struct FakeBugzilla {
        pub attachments: Vec<Attachment>,
        pub history: Vec<HistoryEntry>,
        pub status: Option<u16>,
    }

    #[async_trait]
    impl BugTracker for FakeBugzilla {
        async fn fetch_attachments(&self, _bug_id: u64) -> Result<Vec<Attachment>> {
            if let Some(status) = self.status {
                return Err(TelemetryError::Http { url: "bmo".into(), status }.into());
            }
            Ok(self.attachments.clone())
        }

        async fn fetch_bug_history(&self, _bug_id: u64) -> Result<Vec<HistoryEntry>> {
            Ok(self.history.clone())
        }
    }

    fn attachment(content_type: &str, is_patch: u8, is_obsolete: u8) -> Attachment {
        Attachment {
            id: 1,
            content_type: content_type.to_string(),
            is_patch,
            is_obsolete,
            summary: String::new(),
        }
    }

    fn mozreview() -> Attachment {
        attachment(ATTACHMENT_TYPE_MOZREVIEW, 0, 0)
    }

    fn phabricator() -> Attachment {
        attachment(ATTACHMENT_TYPE_PHABRICATOR, 0, 0)
    }

    fn raw_patch() -> Attachment {
        attachment("text/plain", 1, 0)
    }

    fn review_granted() -> Vec<HistoryEntry> {
        vec![HistoryEntry {
            changes: vec![FieldChange {
                field_name: "flagtypes.name".to_string(),
                added: "review+".to_string(),
                removed: "review?(jteh@mozilla.com)".to_string(),
            }],
        }]
    }

    pub(crate) fn revision(desc: &str) -> Changeset {
        Changeset {
            node: "445d1a7b050419f0ea266b0c191001d788f7850d".to_string(),
            desc: desc.to_string(),
            user: "Test User <author@mozilla.com>".to_string(),
            parents: vec!["83f4bc25eec8e4ff1b340d8a33e10baf62aa36d1".to_string()],
            pushdate: Some((1537966541.0, 0)),
            landingsystem: None,
        }
    }

    const BUG_SUMMARY: &str =
        "Bug 1463962 - crash near null in [@ mozilla::a11y::DocAccessible::BindToDocument], r=jamie";

    #[test]
    fn nobug_marker() {
        for (input, expected) in [
            ("no bug - foo", true),
            ("bar baz - No bug, blah", true),
            ("bar baz - NO BUG", true),
            ("Bug 1234 - blah blah", false),
            ("Bug 1234 - No blah for bug", false),
        ] {
            assert_eq!(has_no_bug_marker(input), expected, "{}", input);
        }
    }

    #[test]
    fn summary_is_the_first_line() {
        assert_eq!(split_summary("foo"), "foo");
        assert_eq!(split_summary("foo\nbar\nbaz"), "foo");
        assert_eq!(split_summary(""), "");
    }

    #[test]
    fn wpt_uplift_markers_in_summary() {
        for (input, expected) in [
            ("Bug 123 - [wpt PR 123] foo bar a=testonly", true),
            ("Bug 123 - [wpt PR 123] foo bar a=testonly extra", true),
            ("Bug 123 - [wpt PR 123]", false),
            ("Bug 123 - foo bar a=testonly", false),
        ] {
            assert_eq!(has_wpt_uplift_markers("", input), expected, "{}", input);
        }
    }

    #[test]
    fn wpt_uplift_markers_for_sync_bot_author() {
        assert!(has_wpt_uplift_markers("moz-wptsync-bot <wptsync@mozilla.com>", "summary"));
        assert!(!has_wpt_uplift_markers("someone <anon@mozilla.com>", "summary"));
    }

    #[test]
    fn uplift_markers() {
        for (input, expected) in [
            ("Bug 123 - foo bar a=testonly", true),
            ("Bug 123 - foo bar a=testonly extra", true),
            ("Bug 123 - foo bar a=multiple,somethings r=me", true),
            ("Bug 123 - foo bar a=merge", true),
            ("Bug 123 - r=testonly", false),
        ] {
            assert_eq!(has_uplift_markers(input), expected, "{}", input);
        }
    }

    #[test]
    fn backout_markers() {
        assert!(has_backout_markers("Backed out 4 changesets (bug 1448077) for xpcshell failures"));
        assert!(has_backout_markers("Back out changeset abc"));
        assert!(has_backout_markers("backing out bug 1 for bustage"));
        assert!(!has_backout_markers("Bug 1 - back out the frobnicator in favor of X"));
    }

    #[test]
    fn phab_markers_need_a_revision_id() {
        assert!(has_phab_markers(
            "Bug 1 - foo\n\nDifferential Revision: https://phabricator.services.mozilla.com/D861"
        ));
        assert!(!has_phab_markers("Differential Revision: https://phabricator.services.mozilla.com/D86"));
    }

    #[test]
    fn obsolete_attachments_are_filtered_out() {
        let mut obsolete = mozreview();
        obsolete.is_obsolete = 1;
        let active = phabricator();

        assert_eq!(collect_review_attachments(&[obsolete, active.clone()]), vec![active]);
    }

    #[test]
    fn mozreview_attachments_are_filtered_out() {
        assert_eq!(collect_review_attachments(&[mozreview(), phabricator()]), vec![phabricator()]);
    }

    #[test]
    fn patch_attachments_are_kept() {
        assert_eq!(
            collect_review_attachments(&[phabricator(), raw_patch()]),
            vec![phabricator(), raw_patch()]
        );
    }

    #[test]
    fn review_flag_requires_a_raw_patch() {
        assert!(has_bmo_patch_review_markers(&[raw_patch()], &review_granted()));
        assert!(!has_bmo_patch_review_markers(&[phabricator()], &review_granted()));
        assert!(!has_bmo_patch_review_markers(&[raw_patch()], &[]));
    }

    #[tokio::test]
    async fn phabricator_is_preferred_if_present() {
        let bugs = FakeBugzilla {
            attachments: vec![phabricator(), raw_patch()],
            ..Default::default()
        };
        let system = determine_review_system(&revision(BUG_SUMMARY), &bugs).await.unwrap();
        assert_eq!(system, ReviewSystem::Phabricator);
    }

    #[tokio::test]
    async fn plain_old_patch_is_preferred_if_mozreview_present() {
        let bugs = FakeBugzilla {
            attachments: vec![mozreview(), raw_patch()],
            history: review_granted(),
            ..Default::default()
        };
        let system = determine_review_system(&revision(BUG_SUMMARY), &bugs).await.unwrap();
        assert_eq!(system, ReviewSystem::Bmo);
    }

    #[tokio::test]
    async fn mozreview_only_bug() {
        let bugs = FakeBugzilla {
            attachments: vec![mozreview()],
            ..Default::default()
        };
        let system = determine_review_system(&revision(BUG_SUMMARY), &bugs).await.unwrap();
        assert_eq!(system, ReviewSystem::MozReview);
    }

    #[tokio::test]
    async fn commit_message_markers_short_circuit_bugzilla() {
        let bugs = FakeBugzilla {
            status: Some(500),
            ..Default::default()
        };

        let backout = revision("Backed out changeset 445d1a7b0504 (bug 1463962) for bustage");
        assert_eq!(determine_review_system(&backout, &bugs).await.unwrap(), ReviewSystem::NotApplicable);

        let mut merge = revision("merge autoland to mozilla-central. a=merge");
        merge.parents.push("ffff".to_string());
        assert_eq!(determine_review_system(&merge, &bugs).await.unwrap(), ReviewSystem::NotApplicable);

        let phab = revision(
            "Bug 1 - foo r=bar\n\nDifferential Revision: https://phabricator.services.mozilla.com/D5506",
        );
        assert_eq!(determine_review_system(&phab, &bugs).await.unwrap(), ReviewSystem::Phabricator);

        let nobug = revision("No bug - update taskcluster docs");
        assert_eq!(determine_review_system(&nobug, &bugs).await.unwrap(), ReviewSystem::Unknown);

        let bugless = revision("Update the README");
        assert_eq!(determine_review_system(&bugless, &bugs).await.unwrap(), ReviewSystem::Unknown);
    }

    #[tokio::test]
    async fn bugzilla_http_errors_mean_unknown() {
        let bugs = FakeBugzilla {
            status: Some(401),
            ..Default::default()
        };
        let system = determine_review_system(&revision(BUG_SUMMARY), &bugs).await.unwrap();
        assert_eq!(system, ReviewSystem::Unknown);
    }

    #[test]
    fn serializes_with_telemetry_names() {
        assert_eq!(serde_json::to_string(&ReviewSystem::NotApplicable).unwrap(), "\"not_applicable\"");
        assert_eq!(serde_json::to_string(&ReviewSystem::MozReview).unwrap(), "\"mozreview\"");
        assert_eq!(ReviewSystem::Bmo.to_string(), "bmo");
    }
}
