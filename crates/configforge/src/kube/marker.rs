//! Records which stored config is currently active.

use std::sync::LazyLock;

use regex::Regex;

pub const MARKER_PREFIX: &str = "# ConfigForge-ActiveConfig:";

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*#[ \t]*ConfigForge-ActiveConfig:[ \t]*(.+?)[ \t\r]*$").unwrap()
});

/// Strategy for remembering the active stored file across processes.
pub trait ActiveConfigTracker: Send + Sync {
    /// Stored file name recorded in `active_content`, if any.
    fn current(&self, active_content: &str) -> Option<String>;

    /// `content` rewritten to record `name` as active.
    fn stamp(&self, content: &str, name: &str) -> String;
}

/// Keeps the active name as a comment line inside the active file itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommentMarker;

impl CommentMarker {
    pub fn marker_line(name: &str) -> String {
        format!("{} {}", MARKER_PREFIX, name)
    }
}

impl ActiveConfigTracker for CommentMarker {
    fn current(&self, active_content: &str) -> Option<String> {
        MARKER_RE
            .captures(active_content)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|name| !name.is_empty())
    }

    fn stamp(&self, content: &str, name: &str) -> String {
        let mut lines: Vec<&str> = content
            .split('\n')
            .filter(|line| !MARKER_RE.is_match(line))
            .collect();

        let marker = Self::marker_line(name);
        let index = match lines.first() {
            Some(first) if first.trim_start().starts_with('#') => 1,
            _ => 0,
        };
        lines.insert(index, &marker);
        lines.join("\n")
    }
}
