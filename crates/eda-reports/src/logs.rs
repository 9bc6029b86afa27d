//! Excerpts of long tool logs for the agent.

/// Lines returned by [`tail`] when no count is given by the caller.
pub const DEFAULT_TAIL_LINES: usize = 20;

/// Lines longer than this are clipped.
pub const MAX_LINE_CHARS: usize = 500;

const ERROR_MARKERS: &[&str] = &["ERROR", "FATAL", "Error:", "Fatal:", "Exception:", "Traceback"];

const CONTEXT_LINES: usize = 2;

fn clip(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.chars().count() > MAX_LINE_CHARS {
        let mut clipped: String = trimmed.chars().take(MAX_LINE_CHARS).collect();
        clipped.push('…');
        clipped
    } else {
        trimmed.to_string()
    }
}

/// The last `n` non-empty lines of `text`, with long lines clipped.
pub fn tail(text: &str, n: usize) -> String {
    let lines: Vec<String> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(clip)
        .collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Error lines of `text` with two lines of context on each side.
///
/// Gaps between separate error regions are marked with `  ...`. When no
/// error marker is present the result is [`tail`] of the text.
pub fn extract_error_details(text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }
    let lines: Vec<&str> = text.lines().collect();
    let hits: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| ERROR_MARKERS.iter().any(|m| line.contains(m)))
        .map(|(i, _)| i)
        .collect();
    if hits.is_empty() {
        return tail(text, DEFAULT_TAIL_LINES);
    }

    let mut keep = vec![false; lines.len()];
    for &hit in &hits {
        let lo = hit.saturating_sub(CONTEXT_LINES);
        let hi = (hit + CONTEXT_LINES).min(lines.len() - 1);
        keep[lo..=hi].iter_mut().for_each(|k| *k = true);
    }

    let mut out = Vec::new();
    let mut previous: Option<usize> = None;
    for (i, line) in lines.iter().enumerate().filter(|(i, _)| keep[*i]) {
        if previous.is_some_and(|p| i > p + 1) {
            out.push("  ...".to_string());
        }
        out.push(clip_end(line));
        previous = Some(i);
    }
    out.join("\n")
}

fn clip_end(line: &str) -> String {
    let line = line.trim_end();
    if line.chars().count() > MAX_LINE_CHARS {
        let mut clipped: String = line.chars().take(MAX_LINE_CHARS).collect();
        clipped.push('…');
        clipped
    } else {
        line.to_string()
    }
}
