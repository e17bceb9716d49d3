//! Append-only per-party transcripts.
//!
//! Committed lines only ever land here through the router, which guarantees
//! attribution to exactly one party. Nothing is ever rewritten or removed;
//! a language change resets routing state but these logs survive it.

use crate::Party;
use chrono::Local;

/// The two growing conversation logs, one per party.
#[derive(Debug, Clone, Default)]
pub struct TranscriptPair {
    a: Vec<String>,
    b: Vec<String>,
}

impl TranscriptPair {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one committed line to `party`'s log.
    pub fn append(&mut self, party: Party, line: &str) {
        self.side_mut(party).push(line.to_string());
    }

    /// Committed lines for one party, oldest first.
    pub fn lines(&self, party: Party) -> &[String] {
        match party {
            Party::A => &self.a,
            Party::B => &self.b,
        }
    }

    /// One party's log joined with newlines.
    pub fn joined(&self, party: Party) -> String {
        self.lines(party).join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty() && self.b.is_empty()
    }

    /// Plain-text export of both logs with a timestamped header.
    pub fn export(&self, party_a_label: &str, party_b_label: &str) -> String {
        let mut out = format!(
            "Interpreter transcript saved {}\n\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        out.push_str(&format!("== Party A ({party_a_label}) ==\n"));
        out.push_str(&self.joined(Party::A));
        out.push_str("\n\n");
        out.push_str(&format!("== Party B ({party_b_label}) ==\n"));
        out.push_str(&self.joined(Party::B));
        out.push('\n');
        out
    }

    fn side_mut(&mut self, party: Party) -> &mut Vec<String> {
        match party {
            Party::A => &mut self.a,
            Party::B => &mut self.b,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────
