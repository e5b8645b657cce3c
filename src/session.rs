//! Interactive device sessions.
//!
//! The FSM driver and the convergence loop only ever talk to a device
//! through [`Session`]. [`ProcessSession`] drives a real transport client;
//! [`ScriptedSession`] replays canned device output.

pub mod buffer;
pub mod process;
pub mod scripted;

pub use buffer::{ExpectBuffer, Match};
pub use process::ProcessSession;
pub use scripted::ScriptedSession;

use crate::error::SessionError;
use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;

/// Prompt of a typical CLI: `hostname#` or `hostname>` at the end of a line.
pub const DEFAULT_PROMPT: &str = r"(?m)[\w\-.:/()]+[#>]\s*$";

#[async_trait]
pub trait Session: Send {
    async fn connect(&mut self) -> Result<(), SessionError>;

    async fn disconnect(&mut self) -> Result<(), SessionError>;

    /// Reconnect. With `force_discovery` every cached fact about the device
    /// (hostname, prompt) is dropped and learned again.
    async fn reconnect(&mut self, force_discovery: bool) -> Result<(), SessionError>;

    fn is_connected(&self) -> bool;

    async fn send_line(&mut self, text: &str) -> Result<(), SessionError>;

    /// Wait until one of `patterns` shows up in the incoming text.
    ///
    /// When several patterns match, the one starting earliest wins and ties
    /// go to the lower index. Text up to the end of the match is consumed.
    async fn expect(&mut self, patterns: &[Regex], timeout: Duration) -> Result<Match, SessionError>;

    fn prompt(&self) -> &Regex;

    /// Send `cmd` and return its output up to the next prompt.
    async fn command(&mut self, cmd: &str, timeout: Duration) -> Result<String, SessionError> {
        self.send_line(cmd).await?;
        let prompt = self.prompt().clone();
        let m = self.expect(std::slice::from_ref(&prompt), timeout).await?;
        Ok(strip_echo(cmd, &m.before))
    }
}

/// Drop the echoed command line and normalise line endings.
pub fn strip_echo(cmd: &str, raw: &str) -> String {
    let text = raw.replace("\r\n", "\n").replace('\r', "");
    let text = text.trim_start_matches('\n');
    let body = match text.split_once('\n') {
        Some((first, rest)) if first.trim_end().ends_with(cmd.trim()) => rest,
        None if text.trim_end().ends_with(cmd.trim()) => "",
        _ => text,
    };
    body.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_echo_removes_command_line() {
        let raw = "show platform\r\nSlot Type\r\n0/0 RSP\r\n";
        assert_eq!(strip_echo("show platform", raw), "Slot Type\n0/0 RSP");
        assert_eq!(strip_echo("show clock", "12:00:00 UTC\n"), "12:00:00 UTC");
        assert_eq!(strip_echo("terminal length 0", "terminal length 0\r\n"), "");
    }

    #[test]
    fn default_prompt_matches_common_forms() {
        let re = Regex::new(DEFAULT_PROMPT).unwrap();
        assert!(re.is_match("output\nPAN-5201-ASR903#"));
        assert!(re.is_match("RP/0/RSP0/CPU0:ios# "));
        assert!(re.is_match("router>"));
        assert!(!re.is_match("Overwrite the previous NVRAM configuration?[confirm]"));
    }
}
