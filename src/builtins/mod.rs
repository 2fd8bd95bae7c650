// src/builtins/mod.rs
//
// Node behaviours that do real work (I/O, DOM queries, timing). Control-flow
// nodes live in the executor; everything here reports back a `Step`.

pub mod anti_crawl;
pub mod extract;
pub mod network;
pub mod video;

/// What the dispatcher should do after a node handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Carry on into every successor.
    Continue,
    /// The path ends here; the failure has already been logged.
    Halt,
}

/// Truncates to at most `max` characters, for log lines.
pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("ab", 3), "ab");
        assert_eq!(truncate_chars("中文字符", 2), "中文");
    }
}
