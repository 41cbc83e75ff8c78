//! Trial runner: orchestrates starting and stopping trials across the three
//! station links and tracks run state, cursor position, and elapsed time.
//!
//! All mutable core state (link status, cursor, run flag, the shared
//! transform) is owned here and exposed to collaborators only through
//! accessors and read-only snapshots. Everything runs on the single
//! cooperative thread; the host loop drives [`TrialRunner::pump`].

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::{LinkEndpoints, RigCtx};
use crate::link::goggle::{start_code, stop_code};
use crate::link::{
    Connection, DisplayDecode, DisplayLink, GoggleLink, LinkError, LinkEvent, PollingConnection,
    TrackerDecode, TrackerLink,
};
use crate::sequence::{SequenceError, TrialSequencer, SENTINEL};
use crate::ticker::Ticker;

/// Spatial transform of the tracked head, row-major 4x4.
///
/// The tracker's pose stream updates only the translation column; rotation
/// is left untouched. Collaborators receive copies, never a live reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    m: [[f64; 4]; 4],
}

impl Default for Transform {
    fn default() -> Self {
        let mut m = [[0.0; 4]; 4];
        for (i, row) in m.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self { m }
    }
}

impl Transform {
    pub fn matrix(&self) -> &[[f64; 4]; 4] {
        &self.m
    }

    pub fn translation(&self) -> [f64; 3] {
        [self.m[0][3], self.m[1][3], self.m[2][3]]
    }

    pub fn set_translation(&mut self, p: &[f64]) {
        for i in 0..3 {
            self.m[i][3] = p[i];
        }
    }

    pub fn set_rotation(&mut self, r: &[[f64; 3]; 3]) {
        for i in 0..3 {
            for j in 0..3 {
                self.m[i][j] = r[i][j];
            }
        }
    }
}

/// Trial run state. While `Running`, new start requests are rejected and
/// only a stop request (operator or asynchronous completion) is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
}

/// Read-only view of the runner's trial state, for UI collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSnapshot {
    pub state: RunState,
    pub prev_trial: String,
    pub cur_trial: String,
    pub target_trial: Option<String>,
    pub elapsed: Duration,
}

/// Change-notification sink, consumed optionally by a UI collaborator.
pub trait RunnerObserver {
    fn state_changed(&mut self, _snapshot: &RunnerSnapshot) {}
    fn pose_updated(&mut self, _transform: &Transform) {}
}

/// Orchestrates the display, tracker, and goggle links through the trial
/// state machine.
#[derive(Default)]
pub struct TrialRunner {
    ctx: RigCtx,
    sequencer: TrialSequencer,

    display: Option<DisplayLink>,
    tracker: Option<TrackerLink>,
    goggle: Option<GoggleLink>,

    state: RunState,
    target_trial: Option<String>,
    transform: Transform,

    elapsed_ticker: Option<Ticker>,
    started_at: Option<Instant>,
    elapsed: Duration,

    observer: Option<Box<dyn RunnerObserver>>,
}

impl TrialRunner {
    pub fn new(ctx: RigCtx) -> Self {
        Self {
            ctx,
            ..Default::default()
        }
    }

    pub fn ctx(&self) -> &RigCtx {
        &self.ctx
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn running_a_trial(&self) -> bool {
        self.state == RunState::Running
    }

    pub fn prev_trial(&self) -> &str {
        self.sequencer.prev_trial()
    }

    pub fn cur_trial(&self) -> &str {
        self.sequencer.cur_trial()
    }

    pub fn sequence(&self) -> &[String] {
        self.sequencer.sequence()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Copy of the current head transform.
    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn set_observer(&mut self, observer: Box<dyn RunnerObserver>) {
        self.observer = Some(observer);
    }

    pub fn set_target_trial(&mut self, target: Option<String>) {
        self.target_trial = target;
    }

    pub fn snapshot(&self) -> RunnerSnapshot {
        RunnerSnapshot {
            state: self.state,
            prev_trial: self.prev_trial().to_owned(),
            cur_trial: self.cur_trial().to_owned(),
            target_trial: self.target_trial.clone(),
            elapsed: self.elapsed,
        }
    }

    // ------------------------------------------------------------------
    // Link lifecycle
    // ------------------------------------------------------------------

    /// Establish the display link and begin polling for its asynchronous
    /// trial notifications. No-op while a display link is active.
    pub fn connect_display(&mut self, ep: LinkEndpoints, now: Instant) -> Result<(), LinkError> {
        if self.display.is_some() {
            return Ok(());
        }
        let chan = Connection::new(ep.recv, ep.send, self.ctx.display_timeout);
        let poll = ep.poll.ok_or(LinkError::NotOpen)?;
        let mut conn = PollingConnection::new(chan, poll, self.ctx.poll_interval);
        conn.open()?;
        conn.start_polling(now);
        self.display = Some(DisplayLink::new(conn));
        info!("display link established");
        Ok(())
    }

    /// Establish the tracker link. Pose polling starts with visualization.
    /// No-op while a tracker link is active.
    pub fn connect_tracker(&mut self, ep: LinkEndpoints) -> Result<(), LinkError> {
        if self.tracker.is_some() {
            return Ok(());
        }
        let chan = Connection::new(ep.recv, ep.send, self.ctx.tracker_timeout);
        let poll = ep.poll.ok_or(LinkError::NotOpen)?;
        let mut conn = PollingConnection::new(chan, poll, self.ctx.poll_interval);
        conn.open()?;
        self.tracker = Some(TrackerLink::new(conn));
        info!("tracker link established");
        Ok(())
    }

    /// Establish the goggle link. No-op while a goggle link is active.
    pub fn connect_goggle(&mut self, ep: LinkEndpoints) -> Result<(), LinkError> {
        if self.goggle.is_some() {
            return Ok(());
        }
        let mut chan = Connection::new(ep.recv, ep.send, self.ctx.goggle_timeout);
        chan.open()?;
        self.goggle = Some(GoggleLink::new(chan));
        info!("goggle link established");
        Ok(())
    }

    /// Tear down all links and quiesce polling. Idempotent.
    pub fn disconnect_all(&mut self) {
        if let Some(mut link) = self.display.take() {
            link.chan.close();
        }
        if let Some(mut link) = self.tracker.take() {
            link.chan.close();
        }
        if let Some(mut link) = self.goggle.take() {
            link.chan.close();
        }
        self.state = RunState::Idle;
        self.elapsed_ticker = None;
    }

    // ------------------------------------------------------------------
    // Sequence operations
    // ------------------------------------------------------------------

    /// Validate and install an operator-submitted sequence for the current
    /// experiment. See [`TrialSequencer::apply_sequence`].
    pub fn apply_sequence(
        &mut self,
        text: &str,
        confirm_overwrite: bool,
    ) -> Result<&[String], SequenceError> {
        self.sequencer
            .apply_sequence(text, &self.ctx.experiment_timestamp, confirm_overwrite)
    }

    // ------------------------------------------------------------------
    // Visualization
    // ------------------------------------------------------------------

    /// Start pose streaming and the polling loop that consumes it.
    pub fn start_visualization(&mut self, now: Instant) -> Result<(), LinkError> {
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.send_start_visualization()?;
            tracker.chan.start_polling(now);
        }
        Ok(())
    }

    /// Stop pose streaming; the poll loop quiesces after one idle tick.
    pub fn stop_visualization(&mut self) -> Result<(), LinkError> {
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.send_stop_visualization()?;
            tracker.chan.stop_polling();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Trial state machine
    // ------------------------------------------------------------------

    /// Run the trial before the cursor. Decrements the cursor first; no-op
    /// if a trial is running or there is no previous trial.
    pub fn run_previous_trial(&mut self, now: Instant) -> Result<(), LinkError> {
        if self.state == RunState::Running || self.prev_trial() == SENTINEL {
            return Ok(());
        }
        self.sequencer.retreat();
        self.start_current(now)
    }

    /// Run the trial at the cursor. No-op if a trial is running or the
    /// cursor is past the end.
    pub fn run_current_trial(&mut self, now: Instant) -> Result<(), LinkError> {
        if self.state == RunState::Running || self.cur_trial() == SENTINEL {
            return Ok(());
        }
        self.start_current(now)
    }

    /// Seek to the selected target trial and run it. No-op if a trial is
    /// running, no target is set, or the target is not in the sequence.
    pub fn run_target_trial(&mut self, now: Instant) -> Result<(), LinkError> {
        if self.state == RunState::Running {
            return Ok(());
        }
        let target = match self.target_trial.clone() {
            Some(t) if t != SENTINEL => t,
            _ => return Ok(()),
        };
        if !self.sequencer.seek(&target) {
            return Ok(());
        }
        self.start_current(now)
    }

    /// Operator stop: halt the running trial on all three stations.
    /// No-op when idle.
    pub fn stop_current_trial(&mut self) -> Result<(), LinkError> {
        if self.state != RunState::Running {
            return Ok(());
        }
        let trial = self.cur_trial().to_owned();

        if let Some(display) = self.display.as_mut() {
            display.send_trial_stop()?;
        }
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.send_stop_trial()?;
        }
        if let Some(goggle) = self.goggle.as_mut() {
            goggle.send_code(stop_code(&trial))?;
        }

        self.state = RunState::Idle;
        info!(%trial, "trial stopped by operator");
        self.notify_state();
        Ok(())
    }

    /// Send the start commands for the trial at the cursor and enter
    /// `Running`. The flag flips only after every established link has
    /// accepted its command; an unset link is skipped.
    fn start_current(&mut self, now: Instant) -> Result<(), LinkError> {
        let trial = self.cur_trial().to_owned();
        debug_assert_ne!(trial, SENTINEL);

        if let Some(goggle) = self.goggle.as_mut() {
            goggle.send_code(start_code(&trial))?;
        }
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.send_start_trial(&self.ctx.experiment_timestamp, &self.ctx.subject, &trial)?;
        }
        if let Some(display) = self.display.as_mut() {
            display.send_trial_start(&trial)?;
        }

        self.state = RunState::Running;
        self.started_at = Some(now);
        self.elapsed = Duration::ZERO;
        let mut ticker = Ticker::new(self.ctx.elapsed_interval);
        ticker.start(now);
        self.elapsed_ticker = Some(ticker);

        info!(%trial, "trial started");
        self.notify_state();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cooperative scheduling
    // ------------------------------------------------------------------

    /// One pass of the host loop: pump both polling links, apply whatever
    /// events they produced, and update the elapsed readout. Never blocks.
    pub fn pump(&mut self, now: Instant) {
        let display_event = self
            .display
            .as_mut()
            .and_then(|link| link.chan.pump(now, &DisplayDecode));
        if let Some(event) = display_event {
            self.apply_event(event);
        }

        let tracker_event = self
            .tracker
            .as_mut()
            .and_then(|link| link.chan.pump(now, &TrackerDecode));
        if let Some(event) = tracker_event {
            self.apply_event(event);
        }

        // Elapsed readout self-loop; stops re-arming once the flag is Idle
        if let Some(ticker) = self.elapsed_ticker.as_mut() {
            if ticker.fire(now) {
                if self.state == RunState::Running {
                    if let Some(started) = self.started_at {
                        self.elapsed = now.saturating_duration_since(started);
                    }
                    self.notify_state();
                } else {
                    ticker.stop();
                }
            }
        }
    }

    /// Apply one link event. Events from different links may interleave
    /// arbitrarily, so each is handled independently and idempotently.
    pub fn apply_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::TrialComplete => {
                if self.state != RunState::Running {
                    return;
                }
                // Stop code keyed by the trial that just completed,
                // before the cursor moves
                let trial = self.cur_trial().to_owned();
                if let Some(goggle) = self.goggle.as_mut() {
                    if let Err(e) = goggle.send_code(stop_code(&trial)) {
                        warn!("goggle stop after trial completion failed: {e}");
                    }
                }
                self.state = RunState::Idle;
                self.sequencer.advance();
                info!(%trial, "trial completed by display station");
                self.notify_state();
            }
            // Operator stop already handled on the synchronous path
            LinkEvent::TrialStopAck => {}
            LinkEvent::Pose(fields) => {
                if fields.len() < 3 {
                    return;
                }
                self.transform.set_translation(&fields[..3]);
                if let Some(obs) = self.observer.as_mut() {
                    obs.pose_updated(&self.transform);
                }
            }
        }
    }

    fn notify_state(&mut self) {
        let snapshot = self.snapshot();
        if let Some(obs) = self.observer.as_mut() {
            obs.state_changed(&snapshot);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn runner_with_sequence(trials: &[&str]) -> TrialRunner {
        let mut runner = TrialRunner::new(RigCtx {
            subject: "S01".to_owned(),
            ..Default::default()
        });
        runner
            .sequencer
            .set_sequence(trials.iter().map(|t| t.to_string()).collect());
        runner
    }

    #[derive(Default)]
    struct RecordingObserver {
        states: Rc<RefCell<Vec<RunState>>>,
        poses: Rc<RefCell<Vec<[f64; 3]>>>,
    }

    impl RunnerObserver for RecordingObserver {
        fn state_changed(&mut self, snapshot: &RunnerSnapshot) {
            self.states.borrow_mut().push(snapshot.state);
        }
        fn pose_updated(&mut self, transform: &Transform) {
            self.poses.borrow_mut().push(transform.translation());
        }
    }

    #[test]
    fn test_run_current_then_complete_advances() {
        // The §8-style focused scenario: two-trial sequence, run current,
        // then the display reports completion. Links are unset, so command
        // issuance is a no-op while the state machine still moves.
        let mut runner = runner_with_sequence(&["VPB-hfixed", "VPB-hfree"]);
        let states = Rc::new(RefCell::new(Vec::new()));
        runner.set_observer(Box::new(RecordingObserver {
            states: states.clone(),
            ..Default::default()
        }));

        assert_eq!(runner.prev_trial(), SENTINEL);
        assert_eq!(runner.cur_trial(), "VPB-hfixed");
        assert!(!runner.running_a_trial());

        runner.run_current_trial(Instant::now()).unwrap();
        assert!(runner.running_a_trial());

        runner.apply_event(LinkEvent::TrialComplete);
        assert!(!runner.running_a_trial());
        assert_eq!(runner.prev_trial(), "VPB-hfixed");
        assert_eq!(runner.cur_trial(), "VPB-hfree");

        assert_eq!(
            states.borrow().as_slice(),
            &[RunState::Running, RunState::Idle]
        );
    }

    #[test]
    fn test_start_rejected_while_running() {
        let mut runner = runner_with_sequence(&["VPC-L", "VPC-R"]);
        let now = Instant::now();
        runner.run_current_trial(now).unwrap();
        assert_eq!(runner.cur_trial(), "VPC-L");

        // All start requests are no-ops while running
        runner.run_current_trial(now).unwrap();
        runner.run_previous_trial(now).unwrap();
        runner.set_target_trial(Some("VPC-R".to_owned()));
        runner.run_target_trial(now).unwrap();
        assert_eq!(runner.cur_trial(), "VPC-L");
        assert!(runner.running_a_trial());
    }

    #[test]
    fn test_run_previous_decrements_first() {
        let mut runner = runner_with_sequence(&["VPC-L", "VPC-R"]);
        runner.apply_event(LinkEvent::Pose(vec![0.0, 0.0, 0.0])); // no-op for cursor
        runner.sequencer.advance();
        assert_eq!(runner.cur_trial(), "VPC-R");

        runner.run_previous_trial(Instant::now()).unwrap();
        assert_eq!(runner.cur_trial(), "VPC-L");
        assert!(runner.running_a_trial());
    }

    #[test]
    fn test_sentinel_requests_are_noops() {
        let mut runner = runner_with_sequence(&["VPC-L"]);

        // No previous trial at the start
        runner.run_previous_trial(Instant::now()).unwrap();
        assert!(!runner.running_a_trial());

        // No current trial past the end
        runner.sequencer.advance();
        assert_eq!(runner.cur_trial(), SENTINEL);
        runner.run_current_trial(Instant::now()).unwrap();
        assert!(!runner.running_a_trial());

        // Target absent from the sequence
        runner.set_target_trial(Some("VPM-6-U".to_owned()));
        runner.run_target_trial(Instant::now()).unwrap();
        assert!(!runner.running_a_trial());

        // Empty-sequence runner
        let mut empty = TrialRunner::default();
        empty.run_current_trial(Instant::now()).unwrap();
        assert!(!empty.running_a_trial());
    }

    #[test]
    fn test_run_target_seeks() {
        let mut runner = runner_with_sequence(&["VPC-L", "VPC-R", "VPC-U"]);
        runner.set_target_trial(Some("VPC-U".to_owned()));
        runner.run_target_trial(Instant::now()).unwrap();
        assert_eq!(runner.cur_trial(), "VPC-U");
        assert_eq!(runner.prev_trial(), "VPC-R");
        assert!(runner.running_a_trial());
    }

    #[test]
    fn test_operator_stop_keeps_cursor() {
        let mut runner = runner_with_sequence(&["VPC-L", "VPC-R"]);
        runner.run_current_trial(Instant::now()).unwrap();
        runner.stop_current_trial().unwrap();
        assert!(!runner.running_a_trial());
        // Operator stop does not advance; completion does
        assert_eq!(runner.cur_trial(), "VPC-L");

        // A late stop ack changes nothing
        runner.apply_event(LinkEvent::TrialStopAck);
        assert_eq!(runner.cur_trial(), "VPC-L");

        // A stray completion while idle is ignored
        runner.apply_event(LinkEvent::TrialComplete);
        assert_eq!(runner.cur_trial(), "VPC-L");
    }

    #[test]
    fn test_pose_updates_translation_only() {
        let mut runner = runner_with_sequence(&[]);
        let poses = Rc::new(RefCell::new(Vec::new()));
        runner.set_observer(Box::new(RecordingObserver {
            poses: poses.clone(),
            ..Default::default()
        }));

        runner.apply_event(LinkEvent::Pose(vec![1.0, 2.0, 3.0, 9.0, 9.0]));
        let t = runner.transform();
        assert_eq!(t.translation(), [1.0, 2.0, 3.0]);
        // Rotation block untouched
        assert_eq!(t.matrix()[0][0], 1.0);
        assert_eq!(t.matrix()[1][0], 0.0);
        assert_eq!(poses.borrow().as_slice(), &[[1.0, 2.0, 3.0]]);
    }

    #[test]
    fn test_elapsed_ticker_rearms_while_running() {
        let mut runner = runner_with_sequence(&["VPC-L"]);
        let t0 = Instant::now();
        runner.run_current_trial(t0).unwrap();

        let step = runner.ctx().elapsed_interval;
        runner.pump(t0 + step);
        assert_eq!(runner.elapsed(), step);
        runner.pump(t0 + step * 2);
        assert_eq!(runner.elapsed(), step * 2);

        // After stopping, the readout stops re-arming and holds its value
        runner.stop_current_trial().unwrap();
        runner.pump(t0 + step * 3);
        runner.pump(t0 + step * 4);
        assert_eq!(runner.elapsed(), step * 2);
    }

    #[test]
    fn test_transform_helpers() {
        let mut t = Transform::default();
        assert_eq!(t.translation(), [0.0, 0.0, 0.0]);
        t.set_rotation(&[[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]]);
        t.set_translation(&[5.0, 6.0, 7.0]);
        assert_eq!(t.translation(), [5.0, 6.0, 7.0]);
        assert_eq!(t.matrix()[0][1], -1.0);
        assert_eq!(t.matrix()[3][3], 1.0);
    }
}
