//! Real-time two-party interpreter client.
//!
//! Connects one shared microphone to a realtime interpretation service over
//! WebRTC and reconstructs two clean, party-attributed transcripts from the
//! interleaved event stream the service sends back.
//!
//! ## Design
//! - One HTTP POST carries the SDP offer, its response the answer (no trickle)
//! - Ordered "response" data channel for JSON events in both directions
//! - Tag-locked turn routing (`[[TO_PARTY_A]]` / `[[TO_PARTY_B]]`), with
//!   Unicode script detection and speaker alternation as fallbacks
//! - Commit-on-done transcripts with a sliding duplicate-suppression window
//! - 26-language support, switchable mid-session with a full routing reset
//! - Live partials for both the user's speech and the interpreter's reply
//!
//! ```no_run
//! use tolk::config::Config;
//! use tolk::session::{Interpreter, SessionEvent};
//!
//! # async fn run() -> tolk::error::Result<()> {
//! let config = Config::load()?;
//! let (interpreter, mut events) = Interpreter::new(config);
//! interpreter.start().await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::Turn(update) = event {
//!         println!("{update:?}");
//!     }
//! }
//! interpreter.stop().await;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};

pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod lang;
pub mod peer;
pub mod prompt;
pub mod router;
pub mod session;
pub mod signaling;
pub mod transcript;

// ── Shared party identity ─────────────────────────────────────────

/// The two people sharing the microphone.
///
/// Party A is the desk side (the side that configured the session), Party B
/// the visitor side. Every committed transcript line belongs to exactly one
/// of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    A,
    B,
}

impl Party {
    /// The opposite side of the conversation.
    pub fn other(self) -> Party {
        match self {
            Party::A => Party::B,
            Party::B => Party::A,
        }
    }

    /// Short label for transcripts and status lines.
    pub fn label(self) -> &'static str {
        match self {
            Party::A => "Party A",
            Party::B => "Party B",
        }
    }
}

pub use config::Config;
pub use error::{Error, Result};
pub use lang::LanguageCode;
pub use peer::RemoteAudio;
pub use router::{RouterStats, TurnRouter, TurnUpdate};
pub use session::{Interpreter, InterpreterSession, SessionEvent, SessionState};
pub use transcript::TranscriptPair;
