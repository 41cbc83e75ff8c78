//! Motion-tracking station link.
//!
//! Outbound commands are fixed 16-character words (padded with `x`), with
//! parameters appended underscore-separated. The station streams pose
//! records back on the polling path.

use crate::wire::Message;

use super::polling::{LinkDecode, PollingConnection};
use super::{LinkError, LinkEvent};

pub const CMD_START_TRIAL: &str = "start_trialxxxxx";
pub const CMD_STOP_TRIAL: &str = "stop_trialxxxxxx";
pub const CMD_START_VIS: &str = "start_visualizat";
pub const CMD_STOP_VIS: &str = "stop_visualizati";

/// Link to the motion-tracking station.
pub struct TrackerLink {
    pub chan: PollingConnection,
}

impl TrackerLink {
    pub fn new(chan: PollingConnection) -> Self {
        Self { chan }
    }

    /// Start recording a trial on the tracker.
    pub fn send_start_trial(
        &mut self,
        experiment_timestamp: &str,
        subject: &str,
        trial: &str,
    ) -> Result<(), LinkError> {
        let cmd = format!("{CMD_START_TRIAL}_{experiment_timestamp}_{subject}_{trial}");
        self.send(cmd)
    }

    pub fn send_stop_trial(&mut self) -> Result<(), LinkError> {
        self.send(CMD_STOP_TRIAL.to_owned())
    }

    /// Ask the tracker to begin streaming pose telemetry.
    pub fn send_start_visualization(&mut self) -> Result<(), LinkError> {
        self.send(CMD_START_VIS.to_owned())
    }

    pub fn send_stop_visualization(&mut self) -> Result<(), LinkError> {
        self.send(CMD_STOP_VIS.to_owned())
    }

    fn send(&mut self, cmd: String) -> Result<(), LinkError> {
        self.chan.chan.send_and_await(&Message::Command(cmd))?;
        Ok(())
    }
}

/// Decoder for the tracker's pose stream.
pub struct TrackerDecode;

impl LinkDecode for TrackerDecode {
    fn decode(&self, datagram: &[u8]) -> Option<LinkEvent> {
        match Message::decode(datagram)? {
            // Position only; this message carries no rotation
            Message::Pose(fields) if fields.len() >= 3 => Some(LinkEvent::Pose(fields)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_command_words_are_sixteen_chars() {
        for cmd in [CMD_START_TRIAL, CMD_STOP_TRIAL, CMD_START_VIS, CMD_STOP_VIS] {
            assert_eq!(cmd.len(), 16, "{cmd}");
        }
    }

    #[test]
    fn test_decode_pose() {
        let data = b"__msg_pose_10.5_-3.25_7_0_0_0";
        match TrackerDecode.decode(data) {
            Some(LinkEvent::Pose(fields)) => {
                assert_eq!(&fields[..3], &[10.5, -3.25, 7.0]);
            }
            other => panic!("Expected pose, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_drops_short_or_foreign() {
        // Fewer than three fields cannot carry a translation
        assert_eq!(TrackerDecode.decode(b"__msg_pose_1_2"), None);
        assert_eq!(TrackerDecode.decode(b"start_visualizat"), None);
        assert_eq!(
            TrackerDecode.decode(br#"{"commandtype": "trialStop", "commandcontent": "x"}"#),
            None
        );
    }
}
