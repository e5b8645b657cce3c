use super::{ExpectBuffer, Match, Session, DEFAULT_PROMPT};
use crate::error::SessionError;
use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a [`ScriptedSession`] saw, shared so it stays readable after the
/// session has been moved into a job.
#[derive(Debug, Default, Clone)]
pub struct ScriptLog {
    pub sent: Vec<String>,
    pub connects: u32,
    pub disconnects: u32,
    /// `force_discovery` flag of every reconnect.
    pub reconnects: Vec<bool>,
    /// Timeout passed to every `expect`.
    pub waits: Vec<Duration>,
}

/// In-memory session replaying canned device output.
///
/// Replies are keyed on the exact (trimmed) line sent. Several replies
/// queued for one line are handed out in order; the last one repeats.
/// `expect` never blocks: if the buffered text holds no match it fails
/// with a timeout right away.
pub struct ScriptedSession {
    hostname: String,
    prompt: Regex,
    replies: HashMap<String, VecDeque<String>>,
    buffer: ExpectBuffer,
    connected: bool,
    log: Arc<Mutex<ScriptLog>>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self {
            hostname: "router".to_string(),
            prompt: Regex::new(DEFAULT_PROMPT).expect("default prompt is valid"),
            replies: HashMap::new(),
            buffer: ExpectBuffer::new(),
            connected: true,
            log: Arc::new(Mutex::new(ScriptLog::default())),
        }
    }

    /// Start disconnected; the first `connect` succeeds.
    pub fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }

    /// Queue raw text to be received after `line` is sent.
    pub fn reply(mut self, line: &str, text: impl Into<String>) -> Self {
        self.replies
            .entry(line.trim().to_string())
            .or_default()
            .push_back(text.into());
        self
    }

    /// Queue `output` followed by the prompt, as a CLI command would print it.
    pub fn respond(self, cmd: &str, output: &str) -> Self {
        let text = format!("{}\r\n{}\r\n{}#", cmd, output, self.hostname);
        self.reply(cmd, text)
    }

    pub fn log(&self) -> Arc<Mutex<ScriptLog>> {
        Arc::clone(&self.log)
    }

    fn note(&self, f: impl FnOnce(&mut ScriptLog)) {
        if let Ok(mut log) = self.log.lock() {
            f(&mut log);
        }
    }
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn connect(&mut self) -> Result<(), SessionError> {
        self.connected = true;
        self.note(|l| l.connects += 1);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        self.connected = false;
        self.buffer.clear();
        self.note(|l| l.disconnects += 1);
        Ok(())
    }

    async fn reconnect(&mut self, force_discovery: bool) -> Result<(), SessionError> {
        self.buffer.clear();
        self.connected = true;
        self.note(|l| l.reconnects.push(force_discovery));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn send_line(&mut self, text: &str) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        self.note(|l| l.sent.push(text.to_string()));
        if let Some(queue) = self.replies.get_mut(text.trim()) {
            let next = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            if let Some(out) = next {
                self.buffer.push(&out);
            }
        }
        Ok(())
    }

    async fn expect(&mut self, patterns: &[Regex], timeout: Duration) -> Result<Match, SessionError> {
        self.note(|l| l.waits.push(timeout));
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        self.buffer.find(patterns).ok_or_else(|| SessionError::Timeout {
            waited: timeout,
            tail: self.buffer.tail(512),
        })
    }

    fn prompt(&self) -> &Regex {
        &self.prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_replies_are_served_in_order_and_last_repeats() {
        let mut s = ScriptedSession::new()
            .respond("show platform", "booting")
            .respond("show platform", "ready");
        let t = Duration::from_secs(1);
        assert_eq!(s.command("show platform", t).await.unwrap(), "booting");
        assert_eq!(s.command("show platform", t).await.unwrap(), "ready");
        assert_eq!(s.command("show platform", t).await.unwrap(), "ready");
        assert_eq!(s.log().lock().unwrap().sent.len(), 3);
    }

    #[tokio::test]
    async fn unanswered_expect_times_out_and_disconnected_send_fails() {
        let mut s = ScriptedSession::new();
        let err = s.command("show version", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout { .. }));

        s.disconnect().await.unwrap();
        assert!(matches!(
            s.send_line("show version").await,
            Err(SessionError::NotConnected)
        ));
        s.reconnect(true).await.unwrap();
        assert_eq!(s.log().lock().unwrap().reconnects, vec![true]);
    }
}
