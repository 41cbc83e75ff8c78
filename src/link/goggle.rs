//! Head-mounted goggle station link.
//!
//! The goggle station understands four single-ASCII-digit commands sent on
//! the blocking path; it has no asynchronous inbound traffic. `'1'`/`'2'`
//! start the head-fixed/head-free variant, `'3'`/`'4'` stop it.

use crate::wire::Message;

use super::{Connection, LinkError};

pub const START_HEAD_FIXED: char = '1';
pub const START_HEAD_FREE: char = '2';
pub const STOP_HEAD_FIXED: char = '3';
pub const STOP_HEAD_FREE: char = '4';

/// Start code for a trial identifier. Head-free trials are the `*-hfree`
/// variant; everything else runs head-fixed.
pub fn start_code(trial: &str) -> char {
    if trial.ends_with("hfree") {
        START_HEAD_FREE
    } else {
        START_HEAD_FIXED
    }
}

/// Stop code keyed the same way as [`start_code`].
pub fn stop_code(trial: &str) -> char {
    if trial.ends_with("hfree") {
        STOP_HEAD_FREE
    } else {
        STOP_HEAD_FIXED
    }
}

/// Link to the goggle station. Blocking path only.
pub struct GoggleLink {
    pub chan: Connection,
}

impl GoggleLink {
    pub fn new(chan: Connection) -> Self {
        Self { chan }
    }

    pub fn send_code(&mut self, code: char) -> Result<(), LinkError> {
        self.chan.send_and_await(&Message::Command(code.to_string()))?;
        Ok(())
    }
}
