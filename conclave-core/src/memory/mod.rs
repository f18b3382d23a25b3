//! Bounded head-summary memory
//!
//! Long-running agents record every tool observation here. The memory keeps
//! recent observations verbatim, folds older ones into a rolling digest and
//! always holds the total below a fixed byte budget:
//!
//! ```text
//! [pinned instructions] [digest of folded entries] [verbatim head ...]
//!   <= budget/4            <= budget/4                each <= entry cap
//! ```

mod summarizer;

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::AgentId;
use crate::config::MemoryConfig;

pub use summarizer::{HeadlineSummarizer, Summarizer, ELISION};

/// Longest title kept on an entry
const MAX_TITLE_BYTES: usize = 160;

const PINNED_TITLE: &str = "instructions";
const DIGEST_TITLE: &str = "digest";

/// Role of an entry in the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Pinned,
    Digest,
    Verbatim,
}

/// One entry of a memory snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub kind: EntryKind,
    pub title: String,
    pub content: String,
}

impl MemoryEntry {
    /// Build an entry whose size is at most `cap`
    fn bounded(kind: EntryKind, title: &str, content: &str, cap: usize) -> Self {
        let title = truncate(title, (cap / 2).min(MAX_TITLE_BYTES));
        let content = truncate(content, cap - title.len());
        Self {
            kind,
            title,
            content,
        }
    }

    /// Bytes this entry counts against the budget
    pub fn size(&self) -> usize {
        self.title.len() + self.content.len()
    }
}

/// Total size of a snapshot
pub fn size_of(entries: &[MemoryEntry]) -> usize {
    entries.iter().map(MemoryEntry::size).sum()
}

/// Cut `text` to at most `max` bytes on a char boundary, marking the cut
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    const MARK: &str = "…";
    let (limit, mark) = if max >= MARK.len() {
        (max - MARK.len(), MARK)
    } else {
        (max, "")
    };
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &text[..end], mark)
}

/// Rolling memory of one agent, bounded by a byte budget
pub struct HeadSummaryMemory {
    owner: AgentId,
    budget: usize,
    pinned_cap: usize,
    digest_cap: usize,
    entry_cap: usize,
    reinforce_every: u32,
    summarizer: Box<dyn Summarizer>,
    pinned: Option<MemoryEntry>,
    digest: Option<MemoryEntry>,
    verbatim: VecDeque<MemoryEntry>,
    since_reinforce: u32,
    folded: usize,
}

impl HeadSummaryMemory {
    pub fn new(owner: AgentId, config: &MemoryConfig) -> Self {
        let budget = config.budget_bytes;
        let pinned_cap = budget / 4;
        let digest_cap = budget / 4;
        let entry_cap = config
            .max_entry_bytes
            .min(budget - pinned_cap - digest_cap);
        Self {
            owner,
            budget,
            pinned_cap,
            digest_cap,
            entry_cap,
            reinforce_every: config.reinforce_every,
            summarizer: Box::new(HeadlineSummarizer),
            pinned: None,
            digest: None,
            verbatim: VecDeque::new(),
            since_reinforce: 0,
            folded: 0,
        }
    }

    /// Replace the digest strategy
    pub fn with_summarizer(mut self, summarizer: impl Summarizer + 'static) -> Self {
        self.summarizer = Box::new(summarizer);
        self
    }

    pub fn owner(&self) -> &AgentId {
        &self.owner
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Number of entries folded into the digest so far
    pub fn folded(&self) -> usize {
        self.folded
    }

    /// Current size of the snapshot in bytes
    pub fn size(&self) -> usize {
        self.pinned.iter().map(MemoryEntry::size).sum::<usize>()
            + self.digest.iter().map(MemoryEntry::size).sum::<usize>()
            + self.verbatim.iter().map(MemoryEntry::size).sum::<usize>()
    }

    /// Append an observation, folding the oldest ones until the budget holds
    pub fn record(&mut self, title: &str, content: &str) {
        let entry = MemoryEntry::bounded(EntryKind::Verbatim, title, content, self.entry_cap);
        self.verbatim.push_back(entry);
        self.since_reinforce = self.since_reinforce.saturating_add(1);

        while self.size() > self.budget {
            let Some(oldest) = self.verbatim.pop_front() else {
                break;
            };
            self.fold(&oldest);
        }
    }

    fn fold(&mut self, entry: &MemoryEntry) {
        let content_cap = self.digest_cap.saturating_sub(DIGEST_TITLE.len());
        let previous = self.digest.as_ref().map(|d| d.content.as_str()).unwrap_or("");
        let folded = self.summarizer.fold(previous, entry, content_cap);
        self.digest = Some(MemoryEntry::bounded(
            EntryKind::Digest,
            DIGEST_TITLE,
            &folded,
            self.digest_cap,
        ));
        self.folded += 1;
        debug!(
            agent = %self.owner,
            title = %entry.title,
            folded = self.folded,
            "Folded memory entry into digest"
        );
    }

    /// Set or refresh the pinned instructions
    pub fn reinforce(&mut self, instructions: &str) {
        self.pinned = Some(MemoryEntry::bounded(
            EntryKind::Pinned,
            PINNED_TITLE,
            instructions,
            self.pinned_cap,
        ));
        self.since_reinforce = 0;
    }

    /// Whether `reinforce_every` records happened since the last reinforce
    pub fn needs_reinforcement(&self) -> bool {
        self.reinforce_every > 0 && self.since_reinforce >= self.reinforce_every
    }

    /// Clear everything, pinned instructions included
    pub fn reset(&mut self) {
        self.pinned = None;
        self.digest = None;
        self.verbatim.clear();
        self.since_reinforce = 0;
        self.folded = 0;
    }

    /// Entries in order: pinned, digest, then verbatim oldest first
    pub fn snapshot(&self) -> Vec<MemoryEntry> {
        self.pinned
            .iter()
            .chain(self.digest.iter())
            .chain(self.verbatim.iter())
            .cloned()
            .collect()
    }

    /// Snapshot as a single text block
    pub fn render(&self) -> String {
        self.snapshot()
            .iter()
            .map(|e| format!("## {}\n{}", e.title, e.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl std::fmt::Debug for HeadSummaryMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadSummaryMemory")
            .field("owner", &self.owner)
            .field("budget", &self.budget)
            .field("size", &self.size())
            .field("verbatim", &self.verbatim.len())
            .field("folded", &self.folded)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(budget: usize) -> HeadSummaryMemory {
        HeadSummaryMemory::new(
            "repo_understanding_agent".into(),
            &MemoryConfig {
                budget_bytes: budget,
                max_entry_bytes: 4096,
                reinforce_every: 10,
            },
        )
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        assert_eq!(truncate("hello", 10), "hello");
        let cut = truncate("ééééé", 6);
        assert!(cut.len() <= 6);
        assert!(cut.ends_with('…'));
        assert_eq!(truncate("abc", 1), "a");
    }

    #[test]
    fn test_fifty_files_fit_ten_kib() {
        let mut memory = memory(10 * 1024);
        memory.reinforce("Summarize the repository.");
        for i in 0..50 {
            let body = format!("# file {}\n{}", i, "x".repeat(2048));
            memory.record(&format!("src/file{:02}.rs", i), &body);
            assert!(size_of(&memory.snapshot()) <= 10 * 1024);
        }

        let snapshot = memory.snapshot();
        assert_eq!(snapshot[0].kind, EntryKind::Pinned);
        assert_eq!(snapshot[1].kind, EntryKind::Digest);
        assert!(snapshot[1].content.contains("src/file00.rs"));
        assert!(memory.folded() > 0);
    }

    #[test]
    fn test_single_huge_entry_is_truncated() {
        let mut memory = memory(1024);
        memory.record("huge", &"y".repeat(1_000_000));
        let snapshot = memory.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(size_of(&snapshot) <= 1024);
        assert!(snapshot[0].content.ends_with('…'));
    }

    #[test]
    fn test_tiny_budget_still_holds() {
        let mut memory = memory(8);
        memory.reinforce("a very long instruction text");
        for i in 0..20 {
            memory.record(&format!("title {}", i), "content content content");
            assert!(memory.size() <= 8);
        }
    }

    #[test]
    fn test_snapshot_is_idempotent() {
        let mut memory = memory(2048);
        memory.record("a", "alpha");
        memory.record("b", "beta");
        assert_eq!(memory.snapshot(), memory.snapshot());
    }

    #[test]
    fn test_pinned_entry_survives_folding() {
        let mut memory = memory(1024);
        memory.reinforce("Stay on task.");
        for i in 0..40 {
            memory.record(&format!("f{}", i), &"z".repeat(200));
        }
        let snapshot = memory.snapshot();
        assert_eq!(snapshot[0].content, "Stay on task.");
        assert!(size_of(&snapshot) <= 1024);
    }

    #[test]
    fn test_reinforcement_cadence() {
        let mut memory = memory(4096);
        memory.reinforce("instructions");
        for i in 0..9 {
            memory.record(&format!("f{}", i), "x");
        }
        assert!(!memory.needs_reinforcement());
        memory.record("f9", "x");
        assert!(memory.needs_reinforcement());
        memory.reinforce("instructions");
        assert!(!memory.needs_reinforcement());
    }

    #[test]
    fn test_reset_clears_pinned() {
        let mut memory = memory(4096);
        memory.reinforce("instructions");
        memory.record("a", "b");
        memory.reset();
        assert!(memory.snapshot().is_empty());
        assert_eq!(memory.size(), 0);
    }

    #[test]
    fn test_render_orders_sections() {
        let mut memory = memory(4096);
        memory.reinforce("Be brief.");
        memory.record("README.md", "# Demo");
        assert_eq!(
            memory.render(),
            "## instructions\nBe brief.\n\n## README.md\n# Demo"
        );
    }
}
