//! Citation pruner.
//!
//! After synthesis, strips any trailing citation line whose `[N]` marker
//! does not also appear in the answer body, and strips UI-facing
//! `(confidence: XX.X%)` fragments embedded in citation lines. Prose is
//! left byte-for-byte unchanged.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static CITATION_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d+)\]\s+doc:(\S+)\s+p(\d+)-(\d+)").expect("citation line regex is valid")
});
static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("marker regex is valid"));
static CONFIDENCE_FRAGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*\(confidence:\s*[\d.]+%\)").expect("confidence fragment regex is valid")
});

fn is_citation_line(line: &str) -> bool {
    CITATION_LINE_RE.is_match(line.trim_start())
}

fn marker_number(line: &str) -> Option<&str> {
    CITATION_LINE_RE
        .captures(line.trim_start())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn markers_in(text: &str) -> HashSet<String> {
    MARKER_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Remove citation lines whose marker is unused in the body, and strip
/// inline confidence fragments from the citation lines that survive. Prose
/// lines pass through unchanged.
pub fn prune(answer: &str) -> String {
    let lines: Vec<&str> = answer.lines().collect();

    let body_markers: HashSet<String> = lines
        .iter()
        .filter(|l| !is_citation_line(l))
        .flat_map(|l| markers_in(l))
        .collect();

    let mut out = Vec::with_capacity(lines.len());
    for line in lines {
        if is_citation_line(line) {
            let Some(n) = marker_number(line) else {
                continue;
            };
            if body_markers.contains(n) {
                let cleaned = CONFIDENCE_FRAGMENT_RE.replace_all(line, "");
                out.push(cleaned.into_owned());
            }
            // else: drop the line entirely (marker unused in body)
        } else {
            out.push(line.to_string());
        }
    }

    out.join("\n")
}

/// Strip every citation line and inline `[N]` marker, leaving only prose.
/// Used to assert that pruning never alters the prose itself == strip_citations(prune(A))`).
pub fn strip_citations(answer: &str) -> String {
    let without_lines: Vec<&str> = answer
        .lines()
        .filter(|l| !is_citation_line(l))
        .collect();
    let joined = without_lines.join("\n");
    MARKER_RE.replace_all(&joined, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_citation_line_with_unused_marker() {
        let answer = "The result is [1] and [3].\n\
                       [1] doc:abc p1-2\n\
                       [2] doc:def p3-4\n\
                       [3] doc:ghi p5-6";
        let pruned = prune(answer);
        assert!(pruned.contains("[1] doc:abc"));
        assert!(!pruned.contains("[2] doc:def"));
        assert!(pruned.contains("[3] doc:ghi"));
    }

    #[test]
    fn strips_inline_confidence_fragment_from_citation_line() {
        let answer = "See [1].\n[1] doc:abc p1-2 (confidence: 87.5%)";
        let pruned = prune(answer);
        assert!(!pruned.contains("confidence"));
        assert!(pruned.contains("[1] doc:abc p1-2"));
    }

    #[test]
    fn prose_is_preserved_verbatim() {
        let answer = "Figure 3 shows a quadratic curve [1].\n[1] doc:abc p1-2";
        let pruned = prune(answer);
        assert!(pruned.starts_with("Figure 3 shows a quadratic curve [1]."));
    }

    #[test]
    fn strip_citations_is_invariant_across_pruning() {
        let answer = "Answer text [1] and [2].\n\
                       [1] doc:abc p1-2\n\
                       [2] doc:def p3-4";
        let pruned = prune(answer);
        assert_eq!(strip_citations(answer), strip_citations(&pruned));
    }

    #[test]
    fn no_citations_leaves_answer_unchanged() {
        let answer = "I don't know.";
        assert_eq!(prune(answer), answer);
    }
}
