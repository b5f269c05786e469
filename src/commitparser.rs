//! Bug number extraction from commit messages.

use std::sync::OnceLock;

use regex::Regex;

/// Bug numbers at or above this are not Bugzilla IDs.
const MAX_BUG_ID: u64 = 100_000_000;

fn bug_re() -> &'static Regex {
    static BUG_RE: OnceLock<Regex> = OnceLock::new();
    BUG_RE.get_or_init(|| {
        Regex::new(
            r"(?ix)
            (?:\bbug|\bb=)\s*\#?(\d+)\b   # bug 123, bug #123, b=123
            | (?:^|[^\w])\#?(\d{5,})\b    # standalone 5+ digit number
            | ^(\d+)\b                    # number at the very start
            ",
        )
        .expect("bug regex is valid")
    })
}

/// Bug numbers referenced in `text`, in order of first appearance.
pub fn parse_bugs(text: &str) -> Vec<u64> {
    let mut bugs = Vec::new();
    for caps in bug_re().captures_iter(text) {
        let number = caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .and_then(|m| m.as_str().parse::<u64>().ok());
        if let Some(bug) = number {
            if bug < MAX_BUG_ID && !bugs.contains(&bug) {
                bugs.push(bug);
            }
        }
    }
    bugs
}
