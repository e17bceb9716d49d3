//! Event demultiplexer and turn router.
//!
//! The interpreter service interleaves partial and final events for user
//! speech and assistant responses on one ordered data channel. This module
//! rebuilds per-response state from that stream and attributes every
//! finished assistant utterance to exactly one party's transcript.
//!
//! ## Per-response lifecycle
//!
//! ```text
//!  (first delta)        (tag seen)              (terminal event)
//!   none ──► pending ──► pending, locked ──► committed / dropped
//!              │
//!              └─ still unresolved at commit time:
//!                 script detection, then last-speaker alternation
//! ```
//!
//! ## Routing rules
//!
//! - An explicit `[[TO_PARTY_A]]` / `[[TO_PARTY_B]]` tag locks the response
//!   to that party. Later tags in the same response are ignored.
//! - `response.audio_transcript.done` is the authoritative commit point. It
//!   removes the response state, so a later `response.done` for the same id
//!   commits nothing.
//! - A normalized copy of every committed line enters the dedup window;
//!   matching lines inside the window are dropped before display.
//! - A language change hard resets every buffer, live line, dedup entry and
//!   the last-speaker guess. Transcripts survive the reset.

use crate::config::Config;
use crate::events::{parse_frame, ServerEvent};
use crate::lang::{detect_script, LanguageCode};
use crate::transcript::TranscriptPair;
use crate::Party;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::LazyLock;

const TAG_PARTY_A: &str = "[[TO_PARTY_A]]";
const TAG_PARTY_B: &str = "[[TO_PARTY_B]]";
const TAG_SUMMARY: &str = "[[SUMMARY]]";

/// Fallback buffer key for frames that carry no id.
const DEFAULT_KEY: &str = "default";

static TAG_STRIP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*\[\[(?:TO_PARTY_A|TO_PARTY_B|SUMMARY)\]\]\s*").unwrap()
});

// ── Configuration ─────────────────────────────────────────────────

/// Tuning for one routing session.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Party A's language (the desk side).
    pub party_a: LanguageCode,
    /// Party B's language (the visitor side).
    pub party_b: LanguageCode,
    /// How long a committed line suppresses identical commits, in ms.
    pub dedup_window_ms: u64,
    /// Drop a pending response with no terminal event after this long, in
    /// ms. 0 disables reaping.
    pub stale_response_timeout_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            party_a: LanguageCode::En,
            party_b: LanguageCode::Ar,
            dedup_window_ms: 7000,
            stale_response_timeout_ms: 30_000,
        }
    }
}

impl From<&Config> for RouterConfig {
    fn from(config: &Config) -> Self {
        Self {
            party_a: config.party_a,
            party_b: config.party_b,
            dedup_window_ms: config.dedup_window_ms,
            stale_response_timeout_ms: config.stale_response_timeout_ms,
        }
    }
}

// ── Updates ───────────────────────────────────────────────────────

/// Observable output of one routing step, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnUpdate {
    /// Live (uncommitted) user speech for display.
    LiveUser { item_id: String, text: String },
    /// The live user line for `item_id` finished and was cleared.
    LiveUserCleared { item_id: String },
    /// Live (uncommitted) assistant text. Only emitted once the response is
    /// locked to a party, so a wrong-party line never shows anywhere.
    LiveAssistant { party: Party, text: String },
    /// The live assistant line for `party` is no longer current.
    LiveAssistantCleared { party: Party },
    /// A finished utterance was committed to `party`'s transcript.
    Committed { party: Party, text: String },
    /// A `[[SUMMARY]]` metadata line. Raw payload, never committed.
    Summary { payload: String },
}

/// Counters for one routing session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    /// Data-channel frames seen, including malformed ones.
    pub frames: u64,
    /// Frames dropped because they were not parseable events.
    pub malformed_frames: u64,
    /// Lines committed to Party A's transcript.
    pub committed_a: u64,
    /// Lines committed to Party B's transcript.
    pub committed_b: u64,
    /// Commits suppressed by the dedup window.
    pub duplicates_suppressed: u64,
    /// Pending responses dropped for never reaching a terminal event.
    pub stale_reaped: u64,
    /// `[[SUMMARY]]` lines surfaced.
    pub summaries: u64,
}

// ── Router ────────────────────────────────────────────────────────

/// Accumulated state for one in-flight assistant response.
#[derive(Debug, Default)]
struct ResponseBuffer {
    /// Text-channel accumulation, minus extracted summary lines.
    text: String,
    /// Spoken-transcript accumulation.
    spoken: String,
    /// Locked routing target, if a tag has been seen.
    target: Option<Party>,
    /// Last frame arrival, for stale reaping.
    last_frame_ms: u64,
}

/// The session's turn router. Single-threaded by design: callers feed it
/// frames in arrival order and forward the returned updates.
pub struct TurnRouter {
    config: RouterConfig,
    buffers: HashMap<String, ResponseBuffer>,
    live_user: HashMap<String, String>,
    /// Normalized committed lines and their commit time, for dedup.
    recent: HashMap<String, u64>,
    last_speaker: Option<Party>,
    transcripts: TranscriptPair,
    stats: RouterStats,
}

impl TurnRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            buffers: HashMap::new(),
            live_user: HashMap::new(),
            recent: HashMap::new(),
            last_speaker: None,
            transcripts: TranscriptPair::new(),
            stats: RouterStats::default(),
        }
    }

    /// Process one raw data-channel frame and return what changed.
    pub fn on_frame(&mut self, raw: &str) -> Vec<TurnUpdate> {
        self.stats.frames += 1;
        let now = now_epoch_ms();
        let mut updates = Vec::new();
        self.reap_stale(now, &mut updates);
        self.prune_recent(now);

        let Some(event) = parse_frame(raw) else {
            self.stats.malformed_frames += 1;
            tracing::trace!(len = raw.len(), "dropping malformed frame");
            return updates;
        };

        match event {
            ServerEvent::UserTranscriptDelta { item_id, delta } => {
                let id = item_id.unwrap_or_else(|| DEFAULT_KEY.to_string());
                if let Some(delta) = delta {
                    let line = self.live_user.entry(id.clone()).or_default();
                    line.push_str(&delta);
                    updates.push(TurnUpdate::LiveUser {
                        item_id: id,
                        text: line.clone(),
                    });
                }
            }

            ServerEvent::UserTranscriptCompleted { item_id, transcript } => {
                let id = item_id.unwrap_or_else(|| DEFAULT_KEY.to_string());
                if let Some(text) = transcript {
                    tracing::debug!(
                        item_id = %id,
                        chars = text.chars().count(),
                        "user utterance finished"
                    );
                }
                self.live_user.remove(&id);
                // Alternation fallback: assume the parties take turns,
                // starting with the desk side.
                self.last_speaker = Some(match self.last_speaker {
                    Some(speaker) => speaker.other(),
                    None => Party::A,
                });
                updates.push(TurnUpdate::LiveUserCleared { item_id: id });
            }

            ServerEvent::TextDelta { response_id, delta } => {
                let key = response_id.unwrap_or_else(|| DEFAULT_KEY.to_string());
                let buffer = self.buffers.entry(key).or_default();
                buffer.last_frame_ms = now;
                if let Some(delta) = delta {
                    buffer.text.push_str(&delta);
                    if buffer.target.is_none() {
                        buffer.target = first_tag_target(&buffer.text);
                    }
                    Self::extract_summaries(buffer, &mut self.stats, &mut updates);
                    if let Some(party) = buffer.target {
                        let live = strip_tags(&buffer.text);
                        if !live.is_empty() {
                            updates.push(TurnUpdate::LiveAssistant { party, text: live });
                        }
                    }
                }
            }

            ServerEvent::AudioTranscriptDelta { response_id, delta } => {
                let key = response_id.unwrap_or_else(|| DEFAULT_KEY.to_string());
                let buffer = self.buffers.entry(key).or_default();
                buffer.last_frame_ms = now;
                if let Some(delta) = delta {
                    buffer.spoken.push_str(&delta);
                    if let Some(party) = buffer.target {
                        let live = strip_tags(&buffer.spoken);
                        if !live.is_empty() {
                            updates.push(TurnUpdate::LiveAssistant { party, text: live });
                        }
                    }
                }
            }

            ServerEvent::AudioTranscriptDone { response_id } => {
                let key = response_id.unwrap_or_else(|| DEFAULT_KEY.to_string());
                // An unknown id means a hard reset already dropped this
                // response; a stale turn must not commit.
                if let Some(buffer) = self.buffers.remove(&key) {
                    let text = strip_tags(&buffer.spoken);
                    self.commit(&text, buffer.target, now, &mut updates);
                }
            }

            ServerEvent::ResponseDone { response_id } => {
                let key = response_id.unwrap_or_else(|| DEFAULT_KEY.to_string());
                // Only reached when no audio transcript committed first:
                // text-only responses still land in a transcript.
                if let Some(buffer) = self.buffers.remove(&key) {
                    let text = strip_tags(&buffer.text);
                    self.commit(&text, buffer.target, now, &mut updates);
                }
            }

            ServerEvent::Unrecognized => {}
        }

        updates
    }

    /// Periodic housekeeping for quiet channels: stale reaping and dedup
    /// pruning also run lazily on every frame, so this only matters when no
    /// frames arrive.
    pub fn tick(&mut self) -> Vec<TurnUpdate> {
        let now = now_epoch_ms();
        let mut updates = Vec::new();
        self.reap_stale(now, &mut updates);
        self.prune_recent(now);
        updates
    }

    /// Drop every in-flight buffer, live line, dedup entry and the
    /// last-speaker guess. Transcripts and stats survive.
    pub fn hard_reset(&mut self) {
        let dropped = self.buffers.len();
        self.buffers.clear();
        self.live_user.clear();
        self.recent.clear();
        self.last_speaker = None;
        if dropped > 0 {
            tracing::debug!(dropped, "routing state reset with responses in flight");
        }
    }

    /// Change the language pair. Always hard resets: a response produced
    /// under the old pair must never commit under the new one.
    pub fn set_languages(&mut self, party_a: LanguageCode, party_b: LanguageCode) {
        self.config.party_a = party_a;
        self.config.party_b = party_b;
        self.hard_reset();
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    pub fn transcripts(&self) -> &TranscriptPair {
        &self.transcripts
    }

    /// One party's transcript joined with newlines.
    pub fn transcript(&self, party: Party) -> String {
        self.transcripts.joined(party)
    }

    /// In-flight responses awaiting a terminal event.
    pub fn pending_responses(&self) -> usize {
        self.buffers.len()
    }

    // ── Internal helpers ──────────────────────────────────────────

    /// Commit one finished utterance, resolving the party if the tag never
    /// arrived. Empty and duplicate lines clear the live display only.
    fn commit(
        &mut self,
        text: &str,
        target: Option<Party>,
        now: u64,
        updates: &mut Vec<TurnUpdate>,
    ) {
        let line = text.trim();
        if line.is_empty() {
            if let Some(party) = target {
                updates.push(TurnUpdate::LiveAssistantCleared { party });
            }
            return;
        }
        let norm = normalize(line);
        if norm.is_empty() {
            if let Some(party) = target {
                updates.push(TurnUpdate::LiveAssistantCleared { party });
            }
            return;
        }
        if self.recent.contains_key(&norm) {
            self.stats.duplicates_suppressed += 1;
            tracing::debug!(chars = line.chars().count(), "duplicate line suppressed");
            if let Some(party) = target {
                updates.push(TurnUpdate::LiveAssistantCleared { party });
            }
            return;
        }

        let party = target
            .or_else(|| self.script_target(line))
            .unwrap_or_else(|| self.fallback_target());

        self.recent.insert(norm, now);
        self.transcripts.append(party, line);
        match party {
            Party::A => self.stats.committed_a += 1,
            Party::B => self.stats.committed_b += 1,
        }
        tracing::debug!(
            party = party.label(),
            tagged = target.is_some(),
            chars = line.chars().count(),
            "utterance committed"
        );
        updates.push(TurnUpdate::LiveAssistantCleared { party });
        updates.push(TurnUpdate::Committed {
            party,
            text: line.to_string(),
        });
    }

    /// Attribute untagged text by writing system. Checks the visitor side
    /// first; never claims Latin text.
    fn script_target(&self, text: &str) -> Option<Party> {
        let script = detect_script(text)?;
        if script.claims(self.config.party_b) {
            Some(Party::B)
        } else if script.claims(self.config.party_a) {
            Some(Party::A)
        } else {
            None
        }
    }

    /// Last resort: the translation goes to whoever did not speak last.
    fn fallback_target(&self) -> Party {
        match self.last_speaker {
            Some(speaker) => speaker.other(),
            None => Party::B,
        }
    }

    /// Pull completed `[[SUMMARY]]` lines out of the text buffer. They are
    /// metadata, surfaced once and never committed.
    fn extract_summaries(
        buffer: &mut ResponseBuffer,
        stats: &mut RouterStats,
        updates: &mut Vec<TurnUpdate>,
    ) {
        if !buffer.text.contains('\n') {
            return;
        }
        let mut kept = String::with_capacity(buffer.text.len());
        let mut tail = String::new();
        for segment in buffer.text.split_inclusive('\n') {
            match segment.strip_suffix('\n') {
                Some(line) => {
                    if let Some(payload) = summary_payload(line) {
                        stats.summaries += 1;
                        updates.push(TurnUpdate::Summary { payload });
                    } else {
                        kept.push_str(segment);
                    }
                }
                // Incomplete last line stays buffered
                None => tail.push_str(segment),
            }
        }
        kept.push_str(&tail);
        buffer.text = kept;
    }

    fn reap_stale(&mut self, now: u64, updates: &mut Vec<TurnUpdate>) {
        if self.config.stale_response_timeout_ms == 0 {
            return;
        }
        let timeout = self.config.stale_response_timeout_ms;
        let stale: Vec<String> = self
            .buffers
            .iter()
            .filter(|(_, buffer)| now.saturating_sub(buffer.last_frame_ms) > timeout)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            if let Some(buffer) = self.buffers.remove(&key) {
                self.stats.stale_reaped += 1;
                tracing::warn!(
                    response_id = %key,
                    age_ms = now.saturating_sub(buffer.last_frame_ms),
                    "dropping stale pending response"
                );
                if let Some(party) = buffer.target {
                    updates.push(TurnUpdate::LiveAssistantCleared { party });
                }
            }
        }
    }

    fn prune_recent(&mut self, now: u64) {
        let window = self.config.dedup_window_ms;
        self.recent
            .retain(|_, committed_at| now.saturating_sub(*committed_at) <= window);
    }
}

/// Position of the earliest routing tag decides the lock.
fn first_tag_target(text: &str) -> Option<Party> {
    match (text.find(TAG_PARTY_A), text.find(TAG_PARTY_B)) {
        (Some(a), Some(b)) => Some(if a <= b { Party::A } else { Party::B }),
        (Some(_), None) => Some(Party::A),
        (None, Some(_)) => Some(Party::B),
        (None, None) => None,
    }
}

/// Remove every routing tag and surrounding whitespace.
fn strip_tags(text: &str) -> String {
    TAG_STRIP_RE.replace_all(text, " ").trim().to_string()
}

fn summary_payload(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix(TAG_SUMMARY)?;
    Some(rest.trim().to_string())
}

/// Dedup key: collapsed whitespace, no trailing sentence punctuation,
/// lowercased. Catches the text/audio double delivery and near-identical
/// echoes that differ only in punctuation.
fn normalize(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(['.', '?', '!', '،', '۔'])
        .trim()
        .to_lowercase()
}

fn now_epoch_ms() -> u64 {
    u64::try_from(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(u64::MAX)
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn router() -> TurnRouter {
        TurnRouter::new(RouterConfig::default())
    }

    fn router_with(config: RouterConfig) -> TurnRouter {
        TurnRouter::new(config)
    }

    fn text_delta(id: &str, delta: &str) -> String {
        json!({"type": "response.text.delta", "response_id": id, "delta": delta}).to_string()
    }

    fn audio_delta(id: &str, delta: &str) -> String {
        json!({"type": "response.audio_transcript.delta", "response_id": id, "delta": delta})
            .to_string()
    }

    fn audio_done(id: &str) -> String {
        json!({"type": "response.audio_transcript.done", "response_id": id}).to_string()
    }

    fn response_done(id: &str) -> String {
        json!({"type": "response.done", "response_id": id}).to_string()
    }

    fn user_delta(id: &str, delta: &str) -> String {
        json!({
            "type": "conversation.item.input_audio_transcription.delta",
            "item_id": id,
            "delta": delta
        })
        .to_string()
    }

    fn user_completed(id: &str, transcript: &str) -> String {
        json!({
            "type": "conversation.item.input_audio_transcription.completed",
            "item_id": id,
            "transcript": transcript
        })
        .to_string()
    }

    fn committed(updates: &[TurnUpdate]) -> Vec<(Party, String)> {
        updates
            .iter()
            .filter_map(|u| match u {
                TurnUpdate::Committed { party, text } => Some((*party, text.clone())),
                _ => None,
            })
            .collect()
    }

    fn summaries(updates: &[TurnUpdate]) -> Vec<String> {
        updates
            .iter()
            .filter_map(|u| match u {
                TurnUpdate::Summary { payload } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    // Tagged turn: text carries the tag, audio carries the speech, the
    // audio done commits once to the tagged party.
    #[test]
    fn tagged_turn_commits_to_tagged_party() {
        let mut r = router();
        assert!(committed(&r.on_frame(&text_delta("resp_1", "[[TO_PARTY_B]] Hola"))).is_empty());
        assert!(committed(&r.on_frame(&audio_delta("resp_1", "Hola"))).is_empty());

        let updates = r.on_frame(&audio_done("resp_1"));
        assert_eq!(committed(&updates), vec![(Party::B, "Hola".to_string())]);
        assert_eq!(r.transcript(Party::B), "Hola");
        assert_eq!(r.transcript(Party::A), "");

        // Late response.done for the same id commits nothing more
        let updates = r.on_frame(&response_done("resp_1"));
        assert!(committed(&updates).is_empty());
        assert_eq!(r.stats().committed_b, 1);
        assert_eq!(r.stats().committed_a, 0);
    }

    #[test]
    fn live_assistant_line_appears_once_locked() {
        let mut r = router();
        let updates = r.on_frame(&text_delta("resp_1", "[[TO_PARTY_B]] Hola, bien"));
        assert!(updates.contains(&TurnUpdate::LiveAssistant {
            party: Party::B,
            text: "Hola, bien".to_string()
        }));
    }

    #[test]
    fn unresolved_line_is_never_displayed() {
        let mut r = router();
        let updates = r.on_frame(&text_delta("resp_1", "no tag yet"));
        assert!(updates
            .iter()
            .all(|u| !matches!(u, TurnUpdate::LiveAssistant { .. })));
    }

    #[test]
    fn live_line_cleared_before_commit() {
        let mut r = router();
        r.on_frame(&text_delta("resp_1", "[[TO_PARTY_A]] Welcome"));
        r.on_frame(&audio_delta("resp_1", "Welcome"));
        let updates = r.on_frame(&audio_done("resp_1"));

        let cleared = updates
            .iter()
            .position(|u| matches!(u, TurnUpdate::LiveAssistantCleared { party: Party::A }));
        let committed_at = updates
            .iter()
            .position(|u| matches!(u, TurnUpdate::Committed { .. }));
        assert!(cleared.is_some());
        assert!(committed_at.is_some());
        assert!(cleared < committed_at);
    }

    #[test]
    fn first_tag_locks_later_tags_ignored() {
        let mut r = router();
        r.on_frame(&text_delta("resp_1", "[[TO_PARTY_A]] One"));
        r.on_frame(&text_delta("resp_1", " [[TO_PARTY_B]] ignored"));
        let updates = r.on_frame(&response_done("resp_1"));
        assert_eq!(
            committed(&updates),
            vec![(Party::A, "One ignored".to_string())]
        );
    }

    #[test]
    fn earliest_tag_in_one_delta_wins() {
        let mut r = router();
        r.on_frame(&text_delta("resp_1", "[[TO_PARTY_B]] x [[TO_PARTY_A]] y"));
        let updates = r.on_frame(&response_done("resp_1"));
        assert_eq!(committed(&updates)[0].0, Party::B);
    }

    #[test]
    fn tag_split_across_deltas_still_locks() {
        let mut r = router();
        r.on_frame(&text_delta("resp_1", "[[TO_PAR"));
        r.on_frame(&text_delta("resp_1", "TY_B]] Merhaba"));
        let updates = r.on_frame(&response_done("resp_1"));
        assert_eq!(
            committed(&updates),
            vec![(Party::B, "Merhaba".to_string())]
        );
    }

    // Text-only responses still commit at response.done.
    #[test]
    fn response_done_commits_text_buffer() {
        let mut r = router();
        r.on_frame(&text_delta("resp_1", "[[TO_PARTY_B]] Merhaba, nasılsınız?"));
        let updates = r.on_frame(&response_done("resp_1"));
        assert_eq!(
            committed(&updates),
            vec![(Party::B, "Merhaba, nasılsınız?".to_string())]
        );
    }

    // Duplicate suppression: same normalized content inside the window
    // commits exactly once, across different response ids.
    #[test]
    fn duplicate_line_suppressed_within_window() {
        let mut r = router();
        r.on_frame(&audio_delta("resp_1", "Thank you."));
        let first = r.on_frame(&audio_done("resp_1"));
        r.on_frame(&audio_delta("resp_2", "Thank  you!"));
        let second = r.on_frame(&audio_done("resp_2"));

        assert_eq!(committed(&first).len(), 1);
        assert!(committed(&second).is_empty());
        assert_eq!(r.stats().duplicates_suppressed, 1);
        assert_eq!(r.transcripts().lines(Party::B).len(), 1);
    }

    #[test]
    fn duplicate_allowed_after_window_expires() {
        let mut r = router_with(RouterConfig {
            dedup_window_ms: 50,
            ..RouterConfig::default()
        });
        r.on_frame(&audio_delta("resp_1", "Yes"));
        assert_eq!(committed(&r.on_frame(&audio_done("resp_1"))).len(), 1);

        std::thread::sleep(Duration::from_millis(80));

        r.on_frame(&audio_delta("resp_2", "Yes"));
        assert_eq!(committed(&r.on_frame(&audio_done("resp_2"))).len(), 1);
        assert_eq!(r.stats().duplicates_suppressed, 0);
    }

    // Untagged turn in a non-Latin script routes by writing system.
    #[test]
    fn untagged_arabic_routes_to_arabic_party() {
        let mut r = router(); // En / Ar
        r.on_frame(&audio_delta("resp_1", "شكرا جزيلا"));
        let updates = r.on_frame(&audio_done("resp_1"));
        assert_eq!(
            committed(&updates),
            vec![(Party::B, "شكرا جزيلا".to_string())]
        );
    }

    #[test]
    fn script_checks_visitor_side_first() {
        // Both parties use Arabic script: Urdu desk, Arabic visitor
        let mut r = router_with(RouterConfig {
            party_a: LanguageCode::Ur,
            party_b: LanguageCode::Ar,
            ..RouterConfig::default()
        });
        r.on_frame(&audio_delta("resp_1", "مرحبا"));
        assert_eq!(committed(&r.on_frame(&audio_done("resp_1")))[0].0, Party::B);
    }

    // Latin text cannot be script-routed; alternation decides.
    #[test]
    fn latin_text_falls_back_to_alternation() {
        let mut r = router();
        // First finished user utterance is assumed to be Party A
        r.on_frame(&user_completed("item_1", "hello"));
        r.on_frame(&audio_delta("resp_1", "Thank you"));
        assert_eq!(
            committed(&r.on_frame(&audio_done("resp_1"))),
            vec![(Party::B, "Thank you".to_string())]
        );

        // Next utterance alternates to Party B, so the translation goes to A
        r.on_frame(&user_completed("item_2", "shukran"));
        r.on_frame(&audio_delta("resp_2", "You are welcome"));
        assert_eq!(
            committed(&r.on_frame(&audio_done("resp_2"))),
            vec![(Party::A, "You are welcome".to_string())]
        );
    }

    #[test]
    fn no_history_defaults_to_visitor_side() {
        let mut r = router();
        r.on_frame(&audio_delta("resp_1", "Good morning"));
        assert_eq!(committed(&r.on_frame(&audio_done("resp_1")))[0].0, Party::B);
    }

    // Language change mid-response: the pending buffer is dropped and the
    // late terminal event commits nothing.
    #[test]
    fn language_change_drops_inflight_responses() {
        let mut r = router();
        r.on_frame(&text_delta("resp_9", "[[TO_PARTY_B]] Guten Tag"));
        assert_eq!(r.pending_responses(), 1);

        r.set_languages(LanguageCode::En, LanguageCode::Tr);
        assert_eq!(r.pending_responses(), 0);

        let updates = r.on_frame(&audio_done("resp_9"));
        assert!(committed(&updates).is_empty());
        assert!(r.transcripts().is_empty());
    }

    #[test]
    fn hard_reset_clears_dedup_but_keeps_transcripts() {
        let mut r = router();
        r.on_frame(&audio_delta("resp_1", "Hola"));
        r.on_frame(&audio_done("resp_1"));
        assert_eq!(r.transcripts().lines(Party::B).len(), 1);

        r.set_languages(LanguageCode::En, LanguageCode::Es);

        // Same content commits again: dedup state was cleared
        r.on_frame(&audio_delta("resp_2", "Hola"));
        let updates = r.on_frame(&audio_done("resp_2"));
        assert_eq!(committed(&updates).len(), 1);
        assert_eq!(r.transcripts().lines(Party::B).len(), 2);
    }

    #[test]
    fn hard_reset_clears_last_speaker() {
        let mut r = router();
        r.on_frame(&user_completed("item_1", "hi")); // last speaker: A
        r.hard_reset();
        // Back to the no-history default
        r.on_frame(&audio_delta("resp_1", "Hello"));
        assert_eq!(committed(&r.on_frame(&audio_done("resp_1")))[0].0, Party::B);
    }

    // User live lines are keyed by item and cleared exactly on their own
    // completed event.
    #[test]
    fn user_lines_accumulate_and_clear_per_item() {
        let mut r = router();
        let updates = r.on_frame(&user_delta("item_1", "hel"));
        assert!(updates.contains(&TurnUpdate::LiveUser {
            item_id: "item_1".to_string(),
            text: "hel".to_string()
        }));

        r.on_frame(&user_delta("item_2", "good "));
        let updates = r.on_frame(&user_delta("item_1", "lo"));
        assert!(updates.contains(&TurnUpdate::LiveUser {
            item_id: "item_1".to_string(),
            text: "hello".to_string()
        }));

        let updates = r.on_frame(&user_completed("item_1", "hello"));
        assert!(updates.contains(&TurnUpdate::LiveUserCleared {
            item_id: "item_1".to_string()
        }));

        // item_2 was untouched by item_1's completion
        let updates = r.on_frame(&user_delta("item_2", "morning"));
        assert!(updates.contains(&TurnUpdate::LiveUser {
            item_id: "item_2".to_string(),
            text: "good morning".to_string()
        }));
    }

    // Summary lines are metadata: surfaced once, never committed.
    #[test]
    fn summary_line_surfaced_not_committed() {
        let mut r = router();
        let updates = r.on_frame(&text_delta(
            "resp_1",
            "[[TO_PARTY_A]] He has an appointment\n[[SUMMARY]] {\"name\":\"Omar\"}\n",
        ));
        assert_eq!(summaries(&updates), vec!["{\"name\":\"Omar\"}".to_string()]);
        assert_eq!(r.stats().summaries, 1);

        let updates = r.on_frame(&response_done("resp_1"));
        assert_eq!(
            committed(&updates),
            vec![(Party::A, "He has an appointment".to_string())]
        );
    }

    #[test]
    fn summary_tag_split_across_deltas() {
        let mut r = router();
        r.on_frame(&text_delta("resp_1", "[[SUMM"));
        let updates = r.on_frame(&text_delta("resp_1", "ARY]] {\"urgency\":\"low\"}\n"));
        assert_eq!(summaries(&updates), vec!["{\"urgency\":\"low\"}".to_string()]);
    }

    #[test]
    fn summary_only_response_commits_nothing() {
        let mut r = router();
        r.on_frame(&text_delta("resp_1", "[[SUMMARY]] {\"notes\":\"follow-up\"}\n"));
        let updates = r.on_frame(&response_done("resp_1"));
        assert!(committed(&updates).is_empty());
        assert!(r.transcripts().is_empty());
    }

    // Pending responses with no terminal event get reaped.
    #[test]
    fn stale_pending_response_reaped() {
        let mut r = router_with(RouterConfig {
            stale_response_timeout_ms: 40,
            ..RouterConfig::default()
        });
        r.on_frame(&text_delta("resp_1", "[[TO_PARTY_B]] never finished"));
        assert_eq!(r.pending_responses(), 1);

        std::thread::sleep(Duration::from_millis(60));
        let updates = r.tick();
        assert!(updates.contains(&TurnUpdate::LiveAssistantCleared { party: Party::B }));
        assert_eq!(r.pending_responses(), 0);
        assert_eq!(r.stats().stale_reaped, 1);

        // A terminal event arriving after the reap commits nothing
        assert!(committed(&r.on_frame(&audio_done("resp_1"))).is_empty());
    }

    #[test]
    fn zero_timeout_disables_reaping() {
        let mut r = router_with(RouterConfig {
            stale_response_timeout_ms: 0,
            ..RouterConfig::default()
        });
        r.on_frame(&text_delta("resp_1", "slow"));
        std::thread::sleep(Duration::from_millis(30));
        r.tick();
        assert_eq!(r.pending_responses(), 1);
    }

    #[test]
    fn frames_without_ids_share_the_default_buffer() {
        let mut r = router();
        r.on_frame(&json!({"type": "response.audio_transcript.delta", "delta": "hola"}).to_string());
        let updates = r.on_frame(&json!({"type": "response.audio_transcript.done"}).to_string());
        assert_eq!(committed(&updates).len(), 1);
    }

    #[test]
    fn malformed_frames_counted_and_dropped() {
        let mut r = router();
        assert!(r.on_frame("not json at all").is_empty());
        assert!(r.on_frame("{\"no_type\":1}").is_empty());
        assert_eq!(r.stats().frames, 2);
        assert_eq!(r.stats().malformed_frames, 2);
        assert_eq!(r.pending_responses(), 0);
    }

    #[test]
    fn unknown_event_types_are_ignored() {
        let mut r = router();
        let updates =
            r.on_frame(&json!({"type": "rate_limits.updated", "rate_limits": []}).to_string());
        assert!(updates.is_empty());
        assert_eq!(r.stats().malformed_frames, 0);
    }

    #[test]
    fn empty_and_punctuation_only_commits_dropped() {
        let mut r = router();
        // No deltas at all
        assert!(committed(&r.on_frame(&audio_done("resp_1"))).is_empty());
        // Punctuation only
        r.on_frame(&audio_delta("resp_2", "..."));
        assert!(committed(&r.on_frame(&audio_done("resp_2"))).is_empty());
        assert!(r.transcripts().is_empty());
    }

    #[test]
    fn terminal_for_unknown_id_is_a_noop() {
        let mut r = router();
        assert!(r.on_frame(&audio_done("ghost")).is_empty());
        assert!(r.on_frame(&response_done("ghost")).is_empty());
    }

    #[test]
    fn commits_preserve_arrival_order() {
        let mut r = router();
        for (i, line) in ["First line", "Second line", "Third line"].iter().enumerate() {
            let id = format!("resp_{i}");
            r.on_frame(&text_delta(&id, &format!("[[TO_PARTY_B]] {line}")));
            r.on_frame(&response_done(&id));
        }
        assert_eq!(
            r.transcript(Party::B),
            "First line\nSecond line\nThird line"
        );
    }

    #[test]
    fn normalize_collapses_space_case_and_trailing_punctuation() {
        assert_eq!(normalize("  Thank   you.  "), "thank you");
        assert_eq!(normalize("Thank you!?"), "thank you");
        assert_eq!(normalize("شكرا۔"), "شكرا");
        assert_eq!(normalize("..."), "");
    }

    #[test]
    fn strip_tags_removes_all_tag_forms() {
        assert_eq!(strip_tags("[[TO_PARTY_A]] hi"), "hi");
        assert_eq!(strip_tags("[[TO_PARTY_B]] hola [[SUMMARY]] x"), "hola x");
        assert_eq!(strip_tags("plain"), "plain");
    }

    #[test]
    fn stats_track_the_session() {
        let mut r = router();
        r.on_frame(&text_delta("resp_1", "[[TO_PARTY_B]] Hola"));
        r.on_frame(&response_done("resp_1"));
        r.on_frame("garbage");
        let stats = r.stats();
        assert_eq!(stats.frames, 3);
        assert_eq!(stats.malformed_frames, 1);
        assert_eq!(stats.committed_b, 1);
        assert_eq!(stats.committed_a, 0);
    }
}
