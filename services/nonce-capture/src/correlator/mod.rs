//! Passive key-material correlator
//!
//! Rebuilds authentication rounds from sniffed traffic:
//! 1. Reader sends AUTH (0x60/0x61 + block) → key slot identity
//! 2. Tag answers with the 4-byte plaintext nonce `nt`
//! 3. Reader answers with 8 bytes `nr ‖ ar`
//!
//! Rounds for the same card and key slot accumulate into one session until it
//! holds two. A session with a single round stays partial until it is evicted
//! to make room for newer ones. Exported sessions are not retained.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use crate::demux::{CardContext, FrameSink};
use crate::frame::RfFrame;
use crate::handoff::KeyRecoveryRecord;
use crate::mifare::{auth, parse_nr_ar, parse_nt, AuthCommand, KeySlotIdentity};
use crate::session::{CaptureSession, NonceMaterial, SessionState};

/// Default bound on partial sessions and on completed sessions awaiting export
pub const DEFAULT_MAX_SESSIONS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SessionKey {
    cuid: u32,
    identity: KeySlotIdentity,
}

/// Progress through the current authentication exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    AwaitNt(SessionKey),
    AwaitNrAr(SessionKey, u32),
}

/// A session holding its first round
#[derive(Debug)]
struct PartialEntry {
    session: CaptureSession,
    /// Round sequence number of the last update, for eviction
    last_round: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelatorStats {
    pub auth_commands: u64,
    pub rounds_completed: u64,
    pub malformed_frames: u64,
    pub sessions_exported: u64,
    pub sessions_evicted: u64,
}

pub struct Correlator {
    partial: HashMap<SessionKey, PartialEntry>,
    completed: VecDeque<CaptureSession>,
    max_sessions: usize,
    pending: Option<Pending>,
    handoff: Option<Sender<KeyRecoveryRecord>>,
    stats: CorrelatorStats,
}

impl Correlator {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_SESSIONS)
    }

    /// Keep at most `max_sessions` partial and `max_sessions` unexported complete sessions
    pub fn with_capacity(max_sessions: usize) -> Self {
        let max_sessions = max_sessions.max(1);
        Self {
            partial: HashMap::with_capacity(max_sessions),
            completed: VecDeque::new(),
            max_sessions,
            pending: None,
            handoff: None,
            stats: CorrelatorStats::default(),
        }
    }

    /// Export completed sessions immediately through `tx`
    pub fn with_handoff(mut self, tx: Sender<KeyRecoveryRecord>) -> Self {
        self.handoff = Some(tx);
        self
    }

    /// Sessions still held: completed ones awaiting export (oldest first), then partial ones
    pub fn sessions(&self) -> Vec<&CaptureSession> {
        self.completed
            .iter()
            .chain(self.partial.values().map(|entry| &entry.session))
            .collect()
    }

    pub fn stats(&self) -> CorrelatorStats {
        self.stats
    }

    /// Export every fully collected session and return their records
    pub fn take_completed(&mut self) -> Vec<KeyRecoveryRecord> {
        let records: Vec<_> = self
            .completed
            .drain(..)
            .filter_map(|mut session| session.export())
            .collect();
        self.stats.sessions_exported += records.len() as u64;
        records
    }

    pub fn summary_stats(&self) -> SessionSummary {
        SessionSummary {
            partial: self.partial.len(),
            complete: self.completed.len(),
            exported: self.stats.sessions_exported,
            auth_commands: self.stats.auth_commands,
            malformed_frames: self.stats.malformed_frames,
        }
    }

    fn on_reader_frame(&mut self, frame: &RfFrame, card: &CardContext) {
        let payload = frame.payload();

        if let Some(Pending::AwaitNrAr(key, nt)) = self.pending {
            if let Ok((nr, ar)) = parse_nr_ar(payload) {
                self.pending = None;
                self.complete_round(key, NonceMaterial::new(nt, nr, ar));
                return;
            }
        }

        let is_auth_opcode = matches!(payload.first(), Some(&auth::CMD_AUTH_A) | Some(&auth::CMD_AUTH_B));
        if is_auth_opcode {
            // Ultralight/NTAG reuse 0x60 for GET_VERSION
            if payload[0] == auth::CMD_AUTH_A && card.capability.family().uses_get_version() {
                return;
            }

            match AuthCommand::parse(payload, frame.crc_dropped()) {
                Ok(cmd) => {
                    if let Some(abandoned) = self.pending.take() {
                        debug!("New AUTH abandons pending exchange {:?}", abandoned);
                    }
                    self.stats.auth_commands += 1;
                    let key = SessionKey {
                        cuid: card.cuid(),
                        identity: cmd.identity(),
                    };
                    debug!("AUTH block {} → {} (cuid {:08x})", cmd.block, key.identity, key.cuid);
                    self.pending = Some(Pending::AwaitNt(key));
                    return;
                }
                Err(e) => debug!("Ignoring AUTH-like frame {}: {}", frame, e),
            }
        }

        if let Some(abandoned) = self.pending.take() {
            self.stats.malformed_frames += 1;
            debug!("Unexpected reader frame {} abandons {:?}", frame, abandoned);
        }
    }

    fn on_tag_frame(&mut self, frame: &RfFrame) {
        let Some(Pending::AwaitNt(key)) = self.pending else {
            return;
        };

        match parse_nt(frame.payload()) {
            Ok(nt) => self.pending = Some(Pending::AwaitNrAr(key, nt)),
            Err(e) => {
                self.stats.malformed_frames += 1;
                self.pending = None;
                debug!("Expected tag nonce, got {}: {}", frame, e);
            }
        }
    }

    fn complete_round(&mut self, key: SessionKey, material: NonceMaterial) {
        self.stats.rounds_completed += 1;

        let Some(mut entry) = self.partial.remove(&key) else {
            self.start_session(key, material);
            return;
        };

        match entry.session.record_round(material) {
            Ok(SessionState::FullyCollected) => {
                info!("Nonce pair collected for {} (cuid {:08x})", key.identity, key.cuid);
                self.finish_session(entry.session);
            }
            Ok(state) => warn!("Session for {} left in {:?}", key.identity, state),
            Err(e) => warn!("Round for {} not recorded: {}", key.identity, e),
        }
    }

    fn start_session(&mut self, key: SessionKey, material: NonceMaterial) {
        if self.partial.len() >= self.max_sessions {
            self.evict_oldest_partial();
        }

        let mut session = CaptureSession::new(key.cuid, key.identity);
        if let Err(e) = session.record_round(material) {
            warn!("Round for {} not recorded: {}", key.identity, e);
            return;
        }
        debug!("Round 0 collected for {}: {}", key.identity, material);
        self.partial.insert(
            key,
            PartialEntry {
                session,
                last_round: self.stats.rounds_completed,
            },
        );
    }

    fn finish_session(&mut self, mut session: CaptureSession) {
        if let Some(tx) = &self.handoff {
            if let Some(record) = session.export() {
                self.stats.sessions_exported += 1;
                if tx.send(record).is_err() {
                    warn!("Hand-off receiver gone, record for {} lost", session.identity());
                }
            }
            return;
        }

        if self.completed.len() >= self.max_sessions {
            if let Some(dropped) = self.completed.pop_front() {
                self.stats.sessions_evicted += 1;
                warn!("Completed session for {} dropped before export", dropped.identity());
            }
        }
        self.completed.push_back(session);
    }

    fn evict_oldest_partial(&mut self) {
        let oldest = self
            .partial
            .iter()
            .min_by_key(|(_, entry)| entry.last_round)
            .map(|(key, _)| *key);

        if let Some(key) = oldest {
            self.partial.remove(&key);
            self.stats.sessions_evicted += 1;
            debug!("Evicted partial session for {} (cuid {:08x})", key.identity, key.cuid);
        }
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink for Correlator {
    fn name(&self) -> &str {
        "Correlator"
    }

    fn handle(&mut self, frame: &RfFrame, card: &CardContext) {
        if frame.is_from_reader() {
            self.on_reader_frame(frame, card);
        } else {
            self.on_tag_frame(frame);
        }
    }

    fn summary(&self) -> Option<String> {
        Some(self.summary_stats().to_string())
    }
}

/// Session table summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub partial: usize,
    pub complete: usize,
    pub exported: u64,
    pub auth_commands: u64,
    pub malformed_frames: u64,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sessions: {} partial, {} complete, {} exported | AUTH seen: {} | Malformed: {}",
            self.partial, self.complete, self.exported, self.auth_commands, self.malformed_frames
        )
    }
}
