use serde::Serialize;

/// Lines added and removed by a patch, and how many files it touches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Diffstat {
    #[serde(rename = "changedFiles")]
    pub files_changed: u32,
    pub additions: u32,
    pub deletions: u32,
}

/// Parse `@@ -a,b +c,d @@` into the old and new line counts.
fn hunk_lengths(header: &str) -> Option<(u32, u32)> {
    let mut parts = header.strip_prefix("@@ ")?.split_whitespace();
    let old = parts.next()?.strip_prefix('-')?;
    let new = parts.next()?.strip_prefix('+')?;
    Some((range_length(old)?, range_length(new)?))
}

fn range_length(range: &str) -> Option<u32> {
    match range.split_once(',') {
        Some((_, len)) => len.parse().ok(),
        None => range.parse::<u32>().ok().map(|_| 1),
    }
}

/// Compute the diffstat of a git-style patch.
pub fn diffstat(patch: &str) -> Diffstat {
    let mut stat = Diffstat::default();
    // Lines still expected in the current hunk, old side then new side.
    let mut remaining = (0u32, 0u32);

    for line in patch.lines() {
        if remaining.0 > 0 || remaining.1 > 0 {
            match line.as_bytes().first() {
                Some(b'+') => {
                    stat.additions += 1;
                    remaining.1 = remaining.1.saturating_sub(1);
                }
                Some(b'-') => {
                    stat.deletions += 1;
                    remaining.0 = remaining.0.saturating_sub(1);
                }
                Some(b'\\') => {}
                _ => {
                    remaining.0 = remaining.0.saturating_sub(1);
                    remaining.1 = remaining.1.saturating_sub(1);
                }
            }
            continue;
        }

        if line.starts_with("diff --git ") {
            stat.files_changed += 1;
        } else if line.starts_with("@@ ") {
            if let Some(lengths) = hunk_lengths(line) {
                remaining = lengths;
            }
        }
    }

    stat
}
