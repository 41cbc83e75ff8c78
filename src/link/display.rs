//! Visual-display station link.
//!
//! Outbound commands are JSON objects; the station reports trial completion
//! asynchronously on the polling path with `commandtype == "trialStop"`.

use crate::wire::{DisplayCommand, Message};

use super::polling::{LinkDecode, PollingConnection};
use super::{LinkError, LinkEvent};

pub const CMD_TRIAL: &str = "trialcommand";
pub const CMD_TRIAL_STOP: &str = "trialstopcommand";
pub const CMD_TEST: &str = "test";
pub const CMD_TRIAL_STOPPED: &str = "trialStop";

/// Link to the visual-display station.
pub struct DisplayLink {
    pub chan: PollingConnection,
}

impl DisplayLink {
    pub fn new(chan: PollingConnection) -> Self {
        Self { chan }
    }

    /// Tell the display to start rendering a trial.
    pub fn send_trial_start(&mut self, trial: &str) -> Result<(), LinkError> {
        self.send(DisplayCommand::new(CMD_TRIAL, trial))
    }

    /// Tell the display to stop the running trial.
    pub fn send_trial_stop(&mut self) -> Result<(), LinkError> {
        self.send(DisplayCommand::new(CMD_TRIAL_STOP, ""))
    }

    /// Connectivity check.
    pub fn send_test(&mut self) -> Result<(), LinkError> {
        self.send(DisplayCommand::new(CMD_TEST, ""))
    }

    fn send(&mut self, cmd: DisplayCommand) -> Result<(), LinkError> {
        self.chan.chan.send_and_await(&Message::Json(cmd))?;
        Ok(())
    }
}

/// Decoder for the display's asynchronous notifications.
pub struct DisplayDecode;

impl LinkDecode for DisplayDecode {
    fn decode(&self, datagram: &[u8]) -> Option<LinkEvent> {
        match Message::decode(datagram)? {
            Message::Json(cmd) if cmd.commandtype == CMD_TRIAL_STOPPED => {
                match cmd.commandcontent.as_str() {
                    // The display finished the trial on its own; the runner
                    // advances the cursor and flips the run flag.
                    "trialcomplete" => Some(LinkEvent::TrialComplete),
                    // Operator-initiated stop was already handled on the
                    // synchronous path; nothing left to change.
                    "trialstop" => Some(LinkEvent::TrialStopAck),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}
