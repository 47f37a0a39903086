//! Final citation assembly.
//!
//! The engine returns drafts with raw `{cite:N}` markers. The adapter
//! rewrites in-range markers to `[N]`, strips out-of-range markers, and
//! computes each section's `cited_paper_ids` from the rewritten text.

use std::collections::BTreeSet;

use litreview_core::schema::{Draft, Paper};
use litreview_core::verify::cite_pattern;
use regex::Regex;

fn bracket_pattern() -> &'static Regex {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("valid bracket regex"))
}

/// Rewrite `{cite:N}` to `[N]` for N in `[1..approved.len()]`, drop the
/// rest, and fill `cited_paper_ids` in ascending index order.
pub fn finalize_citations(draft: &mut Draft, approved: &[Paper]) {
    let max_index = approved.len();

    for section in &mut draft.sections {
        let rewritten = cite_pattern()
            .replace_all(&section.content, |caps: &regex::Captures<'_>| {
                let idx: usize = caps[1].parse().unwrap_or(0);
                if (1..=max_index).contains(&idx) {
                    format!("[{idx}]")
                } else {
                    tracing::warn!(
                        index = idx,
                        valid_range = %format!("1-{max_index}"),
                        "Citation index out of range, removing"
                    );
                    String::new()
                }
            })
            .into_owned();
        section.content = rewritten;

        let cited: BTreeSet<usize> = bracket_pattern()
            .captures_iter(&section.content)
            .filter_map(|caps| caps[1].parse::<usize>().ok())
            .filter(|idx| (1..=max_index).contains(idx))
            .collect();
        section.cited_paper_ids = cited
            .into_iter()
            .map(|idx| approved[idx - 1].paper_id.clone())
            .collect();
    }
}
