//! Digest strategies for folded memory entries

use super::MemoryEntry;

/// Marker line standing in for elided digest lines
pub const ELISION: &str = "- ...";

/// Folds evicted memory entries into a rolling digest
///
/// Implementations must return a digest of at most `cap` bytes. The memory
/// re-truncates anything longer, which loses the tail of the digest.
pub trait Summarizer: Send + Sync {
    fn fold(&self, digest: &str, entry: &MemoryEntry, cap: usize) -> String;
}

/// Deterministic summarizer keeping one headline per folded entry
///
/// Each entry becomes `- title: first line`. When the digest outgrows its
/// cap the headlines are condensed to titles, then middle lines are elided
/// so the earliest titles survive the longest.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlineSummarizer;

impl HeadlineSummarizer {
    fn headline(entry: &MemoryEntry) -> String {
        let first = entry
            .content
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("");
        if first.is_empty() {
            format!("- {}", entry.title)
        } else {
            format!("- {}: {}", entry.title, first)
        }
    }

    fn condensed(line: &str) -> String {
        match line.split_once(": ") {
            Some((title, _)) => title.to_string(),
            None => line.to_string(),
        }
    }
}

fn joined_len(lines: &[String]) -> usize {
    lines.iter().map(String::len).sum::<usize>() + lines.len().saturating_sub(1)
}

impl Summarizer for HeadlineSummarizer {
    fn fold(&self, digest: &str, entry: &MemoryEntry, cap: usize) -> String {
        let mut lines: Vec<String> = digest
            .lines()
            .filter(|l| *l != ELISION)
            .map(str::to_string)
            .collect();
        lines.push(Self::headline(entry));

        if joined_len(&lines) > cap {
            lines = lines.iter().map(|l| Self::condensed(l)).collect();
        }
        if joined_len(&lines) <= cap {
            return lines.join("\n");
        }

        // Keep the earliest lines and the newest one, drop from the middle
        let Some(last) = lines.pop() else {
            return String::new();
        };
        let mut head = lines;
        loop {
            let mut candidate = head.clone();
            candidate.push(ELISION.to_string());
            candidate.push(last.clone());
            if joined_len(&candidate) <= cap || head.is_empty() {
                return super::truncate(&candidate.join("\n"), cap);
            }
            head.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::EntryKind;

    fn entry(title: &str, content: &str) -> MemoryEntry {
        MemoryEntry {
            kind: EntryKind::Verbatim,
            title: title.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_headline_uses_first_nonblank_line() {
        let digest = HeadlineSummarizer.fold("", &entry("src/lib.rs", "\n//! Crate root\nmore"), 100);
        assert_eq!(digest, "- src/lib.rs: //! Crate root");
    }

    #[test]
    fn test_condenses_to_titles() {
        let digest = HeadlineSummarizer.fold(
            "- a.rs: first line of a",
            &entry("b.rs", "first line of b"),
            20,
        );
        assert_eq!(digest, "- a.rs\n- b.rs");
    }

    #[test]
    fn test_elides_middle_keeping_earliest() {
        let mut digest = String::new();
        for i in 0..30 {
            digest = HeadlineSummarizer.fold(&digest, &entry(&format!("file{:02}", i), "x"), 60);
            assert!(digest.len() <= 60);
        }
        let lines: Vec<&str> = digest.lines().collect();
        assert_eq!(lines[0], "- file00");
        assert!(lines.contains(&ELISION));
        assert_eq!(*lines.last().unwrap(), "- file29");
    }
}
