//! Wire codec for the three message shapes used by the rig's UDP links.
//!
//! Every datagram is exactly one message; the only framing beyond the
//! datagram boundary is a short printable end-of-message marker appended
//! before send. Inbound data arrives without the marker.

use serde::{Deserialize, Serialize};

/// End-of-message marker appended to outbound datagrams.
pub const DEFAULT_EOM: &str = ";";

/// Maximum datagram size, including the end-of-message marker.
pub const MAX_DATAGRAM: usize = 2048;

/// Fixed prefix of inbound pose telemetry records.
pub const POSE_PREFIX: &str = "__msg_pose_";

/// Structured command as exchanged with the visual-display station.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DisplayCommand {
    pub commandtype: String,
    pub commandcontent: String,
}

impl DisplayCommand {
    pub fn new(commandtype: &str, commandcontent: &str) -> Self {
        Self {
            commandtype: commandtype.to_owned(),
            commandcontent: commandcontent.to_owned(),
        }
    }
}

/// One wire message, in any of the three shapes the rig uses.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Plain delimited command string
    Command(String),

    /// JSON object with `commandtype`/`commandcontent`
    Json(DisplayCommand),

    /// Pose tuple: underscore-separated floats after a fixed prefix
    Pose(Vec<f64>),
}

impl Message {
    /// Render the message payload, without the end-of-message marker.
    pub fn render(&self) -> String {
        match self {
            Message::Command(s) => s.clone(),
            // DisplayCommand has no non-string fields, so serialization cannot fail
            Message::Json(cmd) => serde_json::to_string(cmd).unwrap_or_default(),
            Message::Pose(fields) => {
                let joined = fields
                    .iter()
                    .map(|f| f.to_string())
                    .collect::<Vec<_>>()
                    .join("_");
                format!("{POSE_PREFIX}{joined}")
            }
        }
    }

    /// Decode one inbound datagram.
    ///
    /// Returns `None` for anything unrecognized; callers on the polling
    /// path drop such datagrams silently.
    pub fn decode(datagram: &[u8]) -> Option<Message> {
        let text = std::str::from_utf8(datagram).ok()?.trim();

        if let Some(rest) = text.strip_prefix(POSE_PREFIX) {
            let fields = rest
                .split('_')
                .map(str::parse::<f64>)
                .collect::<Result<Vec<f64>, _>>()
                .ok()?;
            if fields.is_empty() {
                return None;
            }
            return Some(Message::Pose(fields));
        }

        if text.starts_with('{') {
            let cmd: DisplayCommand = serde_json::from_str(text).ok()?;
            return Some(Message::Json(cmd));
        }

        if text.is_empty() {
            return None;
        }

        Some(Message::Command(text.to_owned()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_decode_pose() {
        let data = b"__msg_pose_1.5_-2.25_300_0_0_0_1";
        match Message::decode(data) {
            Some(Message::Pose(fields)) => {
                assert_eq!(fields.len(), 7);
                assert_eq!(fields[0], 1.5);
                assert_eq!(fields[1], -2.25);
                assert_eq!(fields[2], 300.0);
            }
            other => panic!("Expected pose, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_json() {
        let data = br#"{"commandtype": "trialStop", "commandcontent": "trialcomplete"}"#;
        match Message::decode(data) {
            Some(Message::Json(cmd)) => {
                assert_eq!(cmd.commandtype, "trialStop");
                assert_eq!(cmd.commandcontent, "trialcomplete");
            }
            other => panic!("Expected json, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_plain_command() {
        assert_eq!(
            Message::decode(b"stop_trialxxxxxx"),
            Some(Message::Command("stop_trialxxxxxx".to_owned()))
        );
    }

    #[test]
    fn test_undecodable_is_none() {
        // Malformed pose fields
        assert_eq!(Message::decode(b"__msg_pose_1.0_oops"), None);
        // Truncated json
        assert_eq!(Message::decode(b"{\"commandtype\": "), None);
        // Not UTF-8
        assert_eq!(Message::decode(&[0xff, 0xfe, 0xfd]), None);
        // Empty
        assert_eq!(Message::decode(b"  "), None);
    }

    #[test]
    fn test_render_roundtrip_shapes() {
        let json = Message::Json(DisplayCommand::new("trialcommand", "VPC-L"));
        assert_eq!(Message::decode(json.render().as_bytes()), Some(json));

        let pose = Message::Pose(vec![1.0, 2.0, 3.0]);
        assert_eq!(pose.render(), "__msg_pose_1_2_3");
    }
}
