use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::card::{self, CardCapability, CardSignature};
use crate::frame::RfFrame;
use crate::mifare::{nonce_from_counter, parse_nr_ar, AuthCommand, KeySlotIdentity};
use crate::rf::{EmulationIdentity, RfError, RfTransceiver, TxBits};
use crate::session::{CaptureSession, NonceMaterial};

use super::state::ControllerState;
use super::{ControllerConfig, ControllerError, CycleCounter};

/// Two-round nonce capture against a live reader
pub struct NonceCaptureController<R: RfTransceiver, C: CycleCounter> {
    rf: R,
    counter: C,
    identity: EmulationIdentity,
    capability: &'static CardCapability,
    config: ControllerConfig,
    stop: Arc<AtomicBool>,
    state: ControllerState,
    emulating: bool,
    session: Option<CaptureSession>,
}

impl<R: RfTransceiver, C: CycleCounter> NonceCaptureController<R, C> {
    /// Fails unless the identity's ATQA/SAK resolve to a crypto1 capable card
    pub fn new(
        rf: R,
        counter: C,
        identity: EmulationIdentity,
        config: ControllerConfig,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, ControllerError> {
        let capability = card::lookup(&CardSignature {
            version: None,
            atqa: identity.atqa,
            sak: identity.sak,
        });
        if !capability.supports_crypto1() {
            return Err(ControllerError::UnsupportedCard(capability.card_type));
        }

        info!(
            "Nonce capture configured: {} ({:?}, {} blocks)",
            identity,
            capability.family(),
            capability.total_pages
        );

        Ok(Self {
            rf,
            counter,
            identity,
            capability,
            config,
            stop,
            state: ControllerState::Idle,
            emulating: false,
            session: None,
        })
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn capability(&self) -> &'static CardCapability {
        self.capability
    }

    /// Session being filled by the current attempt, or the finished one once Complete
    pub fn session(&self) -> Option<&CaptureSession> {
        match &self.state {
            ControllerState::Complete(session) => Some(session),
            _ => self.session.as_ref(),
        }
    }

    pub fn transceiver(&self) -> &R {
        &self.rf
    }

    /// Advance by one transition. On error the attempt is over: emulation
    /// is stopped, its session discarded and the controller is back in Idle.
    pub fn step(&mut self) -> Result<&ControllerState, ControllerError> {
        let current = std::mem::replace(&mut self.state, ControllerState::Idle);
        let label = current.to_string();

        match self.advance(current) {
            Ok(next) => {
                if next.to_string() != label {
                    debug!("Controller {} -> {}", label, next);
                }
                self.state = next;
                Ok(&self.state)
            }
            Err(e) => Err(self.abort(&label, e)),
        }
    }

    /// Run until the current attempt completes and return its session.
    /// Called in Complete, it starts a fresh attempt.
    pub fn run(&mut self) -> Result<CaptureSession, ControllerError> {
        loop {
            if let ControllerState::Complete(session) = self.step()? {
                return Ok(session.clone());
            }
        }
    }

    fn advance(&mut self, state: ControllerState) -> Result<ControllerState, ControllerError> {
        match state {
            ControllerState::Idle | ControllerState::Complete(_) => {
                self.session = None;
                Ok(ControllerState::EmulatingRound { round: 0 })
            }

            ControllerState::EmulatingRound { round } => {
                self.check_stop()?;
                self.rf
                    .begin_session(&self.identity)
                    .map_err(|e| transport_error(e, "Emulating"))?;
                self.emulating = true;
                info!("Emulating {} for round {}", self.identity, round);

                Ok(ControllerState::AwaitAuth {
                    round,
                    deadline: self.deadline(),
                })
            }

            ControllerState::AwaitAuth { round, deadline } => {
                let frame = self.receive(deadline, "AwaitAuth")?;
                if !self.accept_auth(round, &frame) {
                    return Ok(ControllerState::AwaitAuth { round, deadline });
                }

                let nt = nonce_from_counter(self.counter.read());
                Ok(ControllerState::RespondNonce {
                    round,
                    nt,
                    deadline: self.deadline(),
                })
            }

            ControllerState::RespondNonce { round, nt, deadline } => {
                self.check_stop()?;
                let timeout = deadline.saturating_duration_since(Instant::now());
                let reply = match self.rf.tx_rx(&TxBits::from_word(nt), timeout) {
                    Ok(frame) => Some(frame),
                    Err(RfError::Timeout(_)) => None,
                    Err(e) => return Err(ControllerError::Transport(e)),
                };

                Ok(ControllerState::AwaitNrAr {
                    round,
                    nt,
                    reply,
                    deadline,
                })
            }

            ControllerState::AwaitNrAr {
                round,
                nt,
                reply,
                deadline,
            } => {
                let frame = match reply {
                    Some(frame) => frame,
                    None => self.receive(deadline, "AwaitNrAr")?,
                };

                match parse_nr_ar(frame.payload()) {
                    Ok((nr, ar)) => {
                        self.record_round(round, NonceMaterial::new(nt, nr, ar));
                        Ok(ControllerState::StopEmulation { round })
                    }
                    Err(_) => {
                        debug!("Ignoring {} while waiting for nr/ar", frame);
                        Ok(ControllerState::AwaitNrAr {
                            round,
                            nt,
                            reply: None,
                            deadline,
                        })
                    }
                }
            }

            ControllerState::StopEmulation { round } => {
                self.end_emulation();
                if round == 0 {
                    return Ok(ControllerState::EmulatingRound { round: 1 });
                }

                match self.session.take() {
                    Some(session) => {
                        if let Some(record) = session.to_record() {
                            info!("Nonce capture complete: {}", record);
                        }
                        Ok(ControllerState::Complete(session))
                    }
                    None => {
                        warn!("Round 1 finished without a session, restarting");
                        Ok(ControllerState::Idle)
                    }
                }
            }
        }
    }

    /// Round 0 accepts any AUTH and fixes the key slot; round 1 wants the same slot.
    fn accept_auth(&mut self, round: u8, frame: &RfFrame) -> bool {
        let Ok(auth) = AuthCommand::parse(frame.payload(), frame.crc_dropped()) else {
            debug!("Ignoring {} while waiting for AUTH", frame);
            return false;
        };
        let slot: KeySlotIdentity = auth.identity();

        match &self.session {
            Some(session) if round == 1 && session.identity() != slot => {
                debug!("Ignoring AUTH for {} while capturing {}", slot, session.identity());
                false
            }
            Some(_) if round == 1 => true,
            _ => {
                info!("Reader authenticating to {}", slot);
                self.session = Some(CaptureSession::new(self.identity.cuid(), slot));
                true
            }
        }
    }

    fn record_round(&mut self, round: u8, material: NonceMaterial) {
        info!("Round {} captured: {}", round, material);
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.record_round(material) {
                warn!("Round {} not recorded: {}", round, e);
            }
        }
    }

    /// Blocking receive bounded by `deadline`, honouring the stop flag
    fn receive(&mut self, deadline: Instant, waiting_in: &'static str) -> Result<RfFrame, ControllerError> {
        self.check_stop()?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ControllerError::TransportTimeout(waiting_in));
        }

        self.rf
            .listen_rx(remaining)
            .map_err(|e| transport_error(e, waiting_in))
    }

    fn check_stop(&self) -> Result<(), ControllerError> {
        if self.stop.load(Ordering::SeqCst) {
            return Err(ControllerError::Cancelled);
        }
        Ok(())
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.config.round_timeout
    }

    fn end_emulation(&mut self) {
        if self.emulating {
            self.rf.end_session();
            self.emulating = false;
        }
    }

    fn abort(&mut self, during: &str, error: ControllerError) -> ControllerError {
        warn!("Nonce capture aborted in {}: {}", during, error);
        self.end_emulation();
        self.session = None;
        self.state = ControllerState::Idle;
        error
    }
}

fn transport_error(error: RfError, waiting_in: &'static str) -> ControllerError {
    match error {
        RfError::Timeout(_) => ControllerError::TransportTimeout(waiting_in),
        other => ControllerError::Transport(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::CardType;
    use crate::mifare::KeyType;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedRf {
        script: VecDeque<Result<RfFrame, RfError>>,
        transmitted: Vec<TxBits>,
        sessions_begun: usize,
        sessions_ended: usize,
        active: bool,
        begin_error: Option<RfError>,
    }

    impl ScriptedRf {
        fn with_script(frames: Vec<Result<RfFrame, RfError>>) -> Self {
            Self {
                script: frames.into(),
                ..Default::default()
            }
        }
    }

    impl RfTransceiver for ScriptedRf {
        fn begin_session(&mut self, _identity: &EmulationIdentity) -> Result<(), RfError> {
            if self.active {
                return Err(RfError::Busy);
            }
            if let Some(e) = self.begin_error.take() {
                return Err(e);
            }
            self.active = true;
            self.sessions_begun += 1;
            Ok(())
        }

        fn listen_rx(&mut self, timeout: Duration) -> Result<RfFrame, RfError> {
            if !self.active {
                return Err(RfError::NoSession);
            }
            self.script.pop_front().unwrap_or(Err(RfError::Timeout(timeout)))
        }

        fn tx_rx(&mut self, tx: &TxBits, timeout: Duration) -> Result<RfFrame, RfError> {
            self.transmitted.push(tx.clone());
            self.listen_rx(timeout)
        }

        fn end_session(&mut self) {
            self.active = false;
            self.sessions_ended += 1;
        }
    }

    struct FixedCounter(u32);

    impl CycleCounter for FixedCounter {
        fn read(&self) -> u32 {
            self.0
        }
    }

    /// Advances by a fixed step on every read
    struct SteppingCounter(Cell<u32>);

    impl CycleCounter for SteppingCounter {
        fn read(&self) -> u32 {
            let value = self.0.get();
            self.0.set(value.wrapping_add(0x1111));
            value
        }
    }

    fn classic_identity() -> EmulationIdentity {
        EmulationIdentity::new(&[0x01, 0x02, 0x03, 0x04], [0x04, 0x00], 0x08, CardType::MifareClassic1k).unwrap()
    }

    fn config() -> ControllerConfig {
        ControllerConfig {
            round_timeout: Duration::from_millis(200),
        }
    }

    fn controller<C: CycleCounter>(
        rf: ScriptedRf,
        counter: C,
    ) -> NonceCaptureController<ScriptedRf, C> {
        NonceCaptureController::new(rf, counter, classic_identity(), config(), Arc::new(AtomicBool::new(false)))
            .unwrap()
    }

    fn auth(opcode: u8, block: u8) -> Result<RfFrame, RfError> {
        Ok(RfFrame::reader(&[opcode, block, 0xaa, 0xbb]))
    }

    fn nr_ar(nr: u32, ar: u32) -> Result<RfFrame, RfError> {
        let mut bytes = nr.to_be_bytes().to_vec();
        bytes.extend_from_slice(&ar.to_be_bytes());
        Ok(RfFrame::reader(&bytes))
    }

    #[test]
    fn test_await_auth_timeout_aborts() {
        let mut ctl = controller(ScriptedRf::default(), FixedCounter(1));

        let err = ctl.run().unwrap_err();
        assert!(matches!(err, ControllerError::TransportTimeout("AwaitAuth")));
        assert!(err.is_session_abort());
        assert_eq!(ctl.state(), &ControllerState::Idle);
        assert!(ctl.session().is_none());
        assert_eq!(ctl.transceiver().sessions_begun, 1);
        assert_eq!(ctl.transceiver().sessions_ended, 1);
    }

    #[test]
    fn test_golden_nonce_transmitted() {
        let rf = ScriptedRf::with_script(vec![auth(0x60, 0x05)]);
        let mut ctl = controller(rf, FixedCounter(0x0102_0304));

        ctl.step().unwrap(); // Idle -> EmulatingRound0
        ctl.step().unwrap(); // -> AwaitAuthRound0
        let state = ctl.step().unwrap().clone();
        assert!(matches!(state, ControllerState::RespondNonce { round: 0, nt: 0xa3bd_92d0, .. }));

        ctl.step().unwrap();
        let tx = &ctl.transceiver().transmitted[0];
        assert_eq!(tx.data, vec![0xa3, 0xbd, 0x92, 0xd0]);
        assert_eq!(tx.bit_count, 32);
    }

    #[test]
    fn test_full_two_round_capture() {
        let rf = ScriptedRf::with_script(vec![
            auth(0x60, 0x05),
            nr_ar(0x1122_3344, 0x5566_7788),
            auth(0x60, 0x05),
            nr_ar(0x99aa_bbcc, 0xddee_ff00),
        ]);
        let mut ctl = controller(rf, SteppingCounter(Cell::new(0x0102_0304)));

        let session = ctl.run().unwrap();
        assert!(matches!(ctl.state(), ControllerState::Complete(_)));
        assert_eq!(session.cuid(), 0x0102_0304);
        assert_eq!(session.identity(), KeySlotIdentity::new(1, KeyType::A).unwrap());

        let r0 = session.round0().unwrap();
        let r1 = session.round1().unwrap();
        assert_eq!(r0, NonceMaterial::new(0xa3bd_92d0, 0x1122_3344, 0x5566_7788));
        assert_eq!((r1.nr, r1.ar), (0x99aa_bbcc, 0xddee_ff00));
        assert_ne!(r0.nt, r1.nt);
        assert_eq!(r1.nt, nonce_from_counter(0x0102_1415));

        let rf = ctl.transceiver();
        assert_eq!(rf.sessions_begun, 2);
        assert_eq!(rf.sessions_ended, 2);
        assert_eq!(rf.transmitted.len(), 2);

        let record = session.to_record().unwrap();
        assert_eq!(record.sector, 1);
        assert_eq!(record.key_type, 0);
    }

    #[test]
    fn test_cancellation_stops_emulation() {
        let stop = Arc::new(AtomicBool::new(false));
        let rf = ScriptedRf::with_script(vec![auth(0x61, 0x08), nr_ar(1, 2)]);
        let mut ctl =
            NonceCaptureController::new(rf, FixedCounter(7), classic_identity(), config(), stop.clone()).unwrap();

        // Through round 0 and into AwaitAuthRound1
        while ctl.state().to_string() != "AwaitAuthRound1" {
            ctl.step().unwrap();
        }
        assert!(ctl.session().is_some());

        stop.store(true, Ordering::SeqCst);
        let err = ctl.step().unwrap_err();
        assert!(matches!(err, ControllerError::Cancelled));
        assert!(ctl.session().is_none());
        assert_eq!(ctl.state(), &ControllerState::Idle);
        assert_eq!(ctl.transceiver().sessions_ended, 2);
        assert!(!ctl.transceiver().active);
    }

    #[test]
    fn test_non_auth_frames_ignored() {
        let rf = ScriptedRf::with_script(vec![
            Ok(RfFrame::reader(&[0x50, 0x00, 0x57, 0xcd])), // HLTA
            Ok(RfFrame::reader(&[0x30, 0x04, 0x26, 0xee])), // READ
            auth(0x60, 0x05),
            nr_ar(1, 2),
            auth(0x61, 0x05), // other key slot, ignored in round 1
            auth(0x60, 0x05),
            nr_ar(3, 4),
        ]);
        let mut ctl = controller(rf, SteppingCounter(Cell::new(42)));

        ctl.step().unwrap();
        ctl.step().unwrap();
        let waiting = ctl.state().clone();
        let after_hlta = ctl.step().unwrap().clone();
        assert_eq!(after_hlta, waiting, "deadline must not be reset");

        let session = ctl.run().unwrap();
        assert_eq!(session.identity().key_type, KeyType::A);
        assert_eq!(session.round1().map(|r| (r.nr, r.ar)), Some((3, 4)));
    }

    #[test]
    fn test_short_reply_keeps_waiting_for_nr_ar() {
        let rf = ScriptedRf::with_script(vec![
            auth(0x60, 0x00),
            Ok(RfFrame::reader(&[0x26])),
            nr_ar(5, 6),
            auth(0x60, 0x00),
            nr_ar(7, 8),
        ]);
        let mut ctl = controller(rf, SteppingCounter(Cell::new(1)));

        let session = ctl.run().unwrap();
        assert_eq!(session.round0().map(|r| (r.nr, r.ar)), Some((5, 6)));
    }

    #[test]
    fn test_nr_ar_timeout_discards_partial_session() {
        let rf = ScriptedRf::with_script(vec![auth(0x60, 0x05), nr_ar(1, 2), auth(0x60, 0x05)]);
        let mut ctl = controller(rf, SteppingCounter(Cell::new(1)));

        let err = ctl.run().unwrap_err();
        assert!(matches!(err, ControllerError::TransportTimeout("AwaitNrAr")));
        assert!(ctl.session().is_none());
        assert_eq!(ctl.transceiver().sessions_ended, 2);
    }

    #[test]
    fn test_transport_error_aborts() {
        let rf = ScriptedRf::with_script(vec![Err(RfError::Device("field lost".into()))]);
        let mut ctl = controller(rf, FixedCounter(1));

        let err = ctl.run().unwrap_err();
        assert!(matches!(err, ControllerError::Transport(RfError::Device(_))));
        assert_eq!(ctl.state(), &ControllerState::Idle);
    }

    #[test]
    fn test_unsupported_card_rejected() {
        let ultralight =
            EmulationIdentity::new(&[0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66], [0x44, 0x00], 0x00, CardType::MifareUltralight)
                .unwrap();
        let result = NonceCaptureController::new(
            ScriptedRf::default(),
            FixedCounter(0),
            ultralight,
            config(),
            Arc::new(AtomicBool::new(false)),
        );
        assert!(matches!(result, Err(ControllerError::UnsupportedCard(CardType::MifareUltralight))));
    }

    #[test]
    fn test_step_to_complete_then_run_starts_fresh_attempt() {
        let rf = ScriptedRf::with_script(vec![
            auth(0x60, 0x05),
            nr_ar(1, 2),
            auth(0x60, 0x05),
            nr_ar(3, 4),
            auth(0x61, 0x09),
            nr_ar(5, 6),
            auth(0x61, 0x09),
            nr_ar(7, 8),
        ]);
        let mut ctl = controller(rf, SteppingCounter(Cell::new(1)));

        while !matches!(ctl.step().unwrap(), ControllerState::Complete(_)) {}
        let first = ctl.session().cloned().unwrap();
        assert_eq!(first.round1().map(|r| (r.nr, r.ar)), Some((3, 4)));
        assert_eq!(ctl.transceiver().sessions_begun, 2);

        let second = ctl.run().unwrap();
        assert_eq!(second.identity(), KeySlotIdentity::new(2, KeyType::B).unwrap());
        assert_eq!(second.round0().map(|r| (r.nr, r.ar)), Some((5, 6)));
        assert_eq!(second.round1().map(|r| (r.nr, r.ar)), Some((7, 8)));
        assert_eq!(ctl.transceiver().sessions_begun, 4);
        assert_eq!(ctl.transceiver().sessions_ended, 4);
        assert_eq!(ctl.session(), Some(&second));
    }

    #[test]
    fn test_stop_checked_before_second_emulation() {
        let stop = Arc::new(AtomicBool::new(false));
        let rf = ScriptedRf::with_script(vec![auth(0x60, 0x05), nr_ar(1, 2)]);
        let mut ctl =
            NonceCaptureController::new(rf, FixedCounter(7), classic_identity(), config(), stop.clone()).unwrap();

        while ctl.state() != &(ControllerState::EmulatingRound { round: 1 }) {
            ctl.step().unwrap();
        }
        stop.store(true, Ordering::SeqCst);

        assert!(matches!(ctl.step(), Err(ControllerError::Cancelled)));
        assert_eq!(ctl.transceiver().sessions_begun, 1);
        assert_eq!(ctl.transceiver().sessions_ended, 1);
        assert!(ctl.session().is_none());
    }

    #[test]
    fn test_stop_checked_before_nonce_transmission() {
        let stop = Arc::new(AtomicBool::new(false));
        let rf = ScriptedRf::with_script(vec![auth(0x60, 0x05)]);
        let mut ctl =
            NonceCaptureController::new(rf, FixedCounter(7), classic_identity(), config(), stop.clone()).unwrap();

        while !matches!(ctl.state(), ControllerState::RespondNonce { .. }) {
            ctl.step().unwrap();
        }
        stop.store(true, Ordering::SeqCst);

        assert!(matches!(ctl.step(), Err(ControllerError::Cancelled)));
        assert!(ctl.transceiver().transmitted.is_empty());
        assert!(!ctl.transceiver().active);
    }

    #[test]
    fn test_begin_session_timeout_is_transport_timeout() {
        let rf = ScriptedRf {
            begin_error: Some(RfError::Timeout(Duration::from_millis(50))),
            ..Default::default()
        };
        let mut ctl = controller(rf, FixedCounter(1));

        let err = ctl.run().unwrap_err();
        assert!(matches!(err, ControllerError::TransportTimeout("Emulating")));
        assert_eq!(ctl.state(), &ControllerState::Idle);
        // Emulation never started, so there is nothing to end
        assert_eq!(ctl.transceiver().sessions_ended, 0);
    }
}
