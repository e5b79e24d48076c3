//! Line-level passes applied to rendered configuration before validation.
use std::collections::HashSet;

pub struct Sanitizer {
    bypass_backends: Vec<String>,
}

impl Sanitizer {
    pub fn new(bypass_backends: Vec<String>) -> Self {
        Sanitizer { bypass_backends }
    }

    pub fn sanitize(&self, text: &str) -> String {
        exclude_backends(&dedup_lines(text), &self.bypass_backends)
    }
}

/// Drops repeated lines, keeping the first occurrence. Blank lines only
/// separate sections and are kept.
pub fn dedup_lines(text: &str) -> String {
    let mut seen = HashSet::new();
    let lines = text
        .lines()
        .filter(|line| line.trim().is_empty() || seen.insert(*line));
    join_lines(lines)
}

/// Drops the routing lines and `backend` sections whose backend name contains
/// one of the given entries. Conditions and comments are kept, so no
/// remaining `use_backend` loses the ACLs it refers to.
pub fn exclude_backends(text: &str, backends: &[String]) -> String {
    let excluded = |id: &str| backends.iter().any(|b| id.contains(b.as_str()));
    let mut in_excluded_section = false;

    let lines = text.lines().filter(|line| {
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            return true;
        }

        // An unindented line opens a new section.
        if trimmed.len() == line.len() {
            in_excluded_section = trimmed
                .strip_prefix("backend ")
                .is_some_and(|id| excluded(id.trim()));
            return !in_excluded_section;
        }
        if in_excluded_section {
            return false;
        }

        match routed_backend(trimmed) {
            Some(id) => !excluded(id),
            None => true,
        }
    });
    join_lines(lines)
}

/// Backend named by a `use_backend` or `default_backend` directive.
fn routed_backend(line: &str) -> Option<&str> {
    line.strip_prefix("use_backend ")
        .or_else(|| line.strip_prefix("default_backend "))
        .and_then(|rest| rest.split_whitespace().next())
}

fn join_lines<'a>(lines: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}
