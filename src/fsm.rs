//! Table-driven dialogue with an interactive device.
//!
//! A run sends one command, then follows the device output through a table
//! of transitions until the terminal state [`FSM_END`] is reached. Each
//! transition names the event pattern it reacts to, the states it is valid
//! from, the state it leads to, an optional action and an optional timeout
//! for the next wait.

use crate::error::{FsmError, SessionError};
use crate::session::Session;
use crate::status::StatusSink;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, warn};

/// Terminal success state.
pub const FSM_END: i32 = -1;

pub type Action = Box<dyn Fn(&mut FsmContext<'_>) -> bool + Send + Sync>;

/// What an action sees when its transition fires.
pub struct FsmContext<'a> {
    pub fsm: &'a str,
    pub state: i32,
    /// Text received before the matched event.
    pub before: &'a str,
    /// The matched event text.
    pub after: &'a str,
    status: &'a dyn StatusSink,
    pending: Vec<String>,
}

impl<'a> FsmContext<'a> {
    /// Queue a line to be written to the device once the action returns.
    pub fn send_line(&mut self, line: impl Into<String>) {
        self.pending.push(line.into());
    }

    pub fn post_status(&self, message: &str) {
        self.status.post_status(message);
    }

    pub fn warning(&self, message: &str) {
        warn!("{}: {}", self.fsm, message);
        self.status.save_job_info(&format!("WARNING: {}", message));
    }
}

pub struct Transition {
    event: Regex,
    from: Vec<i32>,
    next: i32,
    action: Option<Action>,
    timeout: Option<Duration>,
}

impl Transition {
    pub fn new(event: &Regex, from: &[i32], next: i32) -> Self {
        Self {
            event: event.clone(),
            from: from.to_vec(),
            next,
            action: None,
            timeout: None,
        }
    }

    /// Run `action` when the transition fires; returning `false` aborts the run.
    pub fn action<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut FsmContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.action = Some(Box::new(action));
        self
    }

    /// Timeout for the wait that follows this transition.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn fires_on(&self, event: &Regex, state: i32) -> bool {
        self.event.as_str() == event.as_str() && self.from.contains(&state)
    }
}

pub struct Fsm {
    name: String,
    events: Vec<Regex>,
    transitions: Vec<Transition>,
    timeout: Duration,
}

impl Fsm {
    pub fn new(name: impl Into<String>, events: Vec<Regex>, transitions: Vec<Transition>) -> Self {
        Self {
            name: name.into(),
            events,
            transitions,
            timeout: Duration::from_secs(60),
        }
    }

    /// Default wait, used until a transition with its own timeout fires.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run(
        &self,
        session: &mut dyn Session,
        command: &str,
        status: &dyn StatusSink,
    ) -> Result<(), FsmError> {
        let mut state = 0;
        let mut wait = self.timeout;

        debug!("{}: sending '{}'", self.name, command);
        session
            .send_line(command)
            .await
            .map_err(|e| self.session_error(e))?;

        loop {
            let m = match session.expect(&self.events, wait).await {
                Ok(m) => m,
                Err(SessionError::Timeout { tail, .. }) => {
                    return Err(FsmError::Timeout {
                        fsm: self.name.clone(),
                        state,
                        last_output: tail,
                    })
                }
                Err(e) => return Err(self.session_error(e)),
            };
            let event = &self.events[m.index];

            let Some(t) = self.transitions.iter().find(|t| t.fires_on(event, state)) else {
                return Err(FsmError::UnexpectedEvent {
                    fsm: self.name.clone(),
                    event: event.as_str().to_string(),
                    state,
                });
            };
            debug!("{}: '{}' {} -> {}", self.name, event.as_str(), state, t.next);

            if let Some(action) = &t.action {
                let mut cx = FsmContext {
                    fsm: &self.name,
                    state,
                    before: &m.before,
                    after: &m.after,
                    status,
                    pending: Vec::new(),
                };
                let ok = action(&mut cx);
                let pending = std::mem::take(&mut cx.pending);
                for line in pending {
                    session
                        .send_line(&line)
                        .await
                        .map_err(|e| self.session_error(e))?;
                }
                if !ok {
                    return Err(FsmError::ActionFailed {
                        fsm: self.name.clone(),
                        event: event.as_str().to_string(),
                        state,
                    });
                }
            }

            state = t.next;
            if let Some(timeout) = t.timeout {
                wait = timeout;
            }
            if state == FSM_END {
                return Ok(());
            }
        }
    }

    fn session_error(&self, source: SessionError) -> FsmError {
        FsmError::Session {
            fsm: self.name.clone(),
            source,
        }
    }
}

/// Action that dismisses a confirmation prompt with a bare newline.
pub fn send_newline(cx: &mut FsmContext<'_>) -> bool {
    cx.send_line("");
    true
}

/// Action that reports the last line of the matched error text and fails.
pub fn report_error(cx: &mut FsmContext<'_>) -> bool {
    let line = cx.after.trim().lines().last().unwrap_or_default().to_string();
    cx.warning(&line);
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ScriptedSession;
    use crate::status::MemorySink;

    fn re(p: &str) -> Regex {
        Regex::new(p).unwrap()
    }

    fn two_step() -> Fsm {
        let a = re("STEP-A");
        let b = re("STEP-B");
        Fsm::new(
            "two step",
            vec![a.clone(), b.clone()],
            vec![Transition::new(&a, &[0], 1), Transition::new(&b, &[1], FSM_END)],
        )
    }

    #[tokio::test]
    async fn events_in_order_reach_the_end_state() {
        let mut s = ScriptedSession::new().reply("go", "STEP-A\nworking\nSTEP-B\n");
        two_step().run(&mut s, "go", &MemorySink::new()).await.unwrap();
        assert_eq!(s.log().lock().unwrap().sent, vec!["go"]);
    }

    #[tokio::test]
    async fn event_not_valid_from_current_state_is_a_protocol_error() {
        let mut s = ScriptedSession::new().reply("go", "STEP-B\n");
        let err = two_step().run(&mut s, "go", &MemorySink::new()).await.unwrap_err();
        match err {
            FsmError::UnexpectedEvent { event, state, .. } => {
                assert_eq!(event, "STEP-B");
                assert_eq!(state, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_event_times_out_with_last_output() {
        let mut s = ScriptedSession::new().reply("go", "STEP-A\nstill going");
        let err = two_step().run(&mut s, "go", &MemorySink::new()).await.unwrap_err();
        match err {
            FsmError::Timeout { state, last_output, .. } => {
                assert_eq!(state, 1);
                assert!(last_output.contains("still going"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_action_aborts_despite_next_state() {
        let a = re("STEP-A");
        let b = re("STEP-B");
        let fsm = Fsm::new(
            "veto",
            vec![a.clone(), b.clone()],
            vec![
                Transition::new(&a, &[0], 1).action(|_| false),
                Transition::new(&b, &[1], FSM_END),
            ],
        );
        let mut s = ScriptedSession::new().reply("go", "STEP-A\nSTEP-B\n");
        let err = fsm.run(&mut s, "go", &MemorySink::new()).await.unwrap_err();
        assert!(matches!(err, FsmError::ActionFailed { state: 0, .. }));
    }

    #[tokio::test]
    async fn action_writes_reach_the_session() {
        let confirm = re(r"\[confirm\]");
        let ok = re(r"\[OK\]");
        let fsm = Fsm::new(
            "write memory",
            vec![confirm.clone(), ok.clone()],
            vec![
                Transition::new(&confirm, &[0], 1).action(send_newline),
                Transition::new(&ok, &[0, 1], FSM_END),
            ],
        );
        let mut s = ScriptedSession::new()
            .reply("write memory", "Overwrite the previous NVRAM configuration?[confirm]")
            .reply("", "Building configuration...\n[OK]\n");
        fsm.run(&mut s, "write memory", &MemorySink::new()).await.unwrap();
        assert_eq!(s.log().lock().unwrap().sent, vec!["write memory", ""]);
    }

    #[tokio::test]
    async fn self_transitions_and_error_from_any_state() {
        let progress = re(r"Progress: \d+%");
        let done = re("SUCCESS");
        let failed = re("FAILED:.*");
        let fsm = Fsm::new(
            "upgrade",
            vec![progress.clone(), done.clone(), failed.clone()],
            vec![
                Transition::new(&progress, &[0, 1], 1),
                Transition::new(&done, &[1], FSM_END),
                Transition::new(&failed, &[0, 1], FSM_END).action(report_error),
            ],
        );
        let sink = MemorySink::new();

        let mut s = ScriptedSession::new()
            .reply("upgrade", "Progress: 10%\nProgress: 50%\nProgress: 100%\nSUCCESS\n");
        fsm.run(&mut s, "upgrade", &sink).await.unwrap();

        let mut s = ScriptedSession::new().reply("upgrade", "Progress: 10%\nFAILED: no space left\n");
        let err = fsm.run(&mut s, "upgrade", &sink).await.unwrap_err();
        assert!(matches!(err, FsmError::ActionFailed { state: 1, .. }));
        assert_eq!(sink.job_info(), vec!["WARNING: FAILED: no space left"]);
    }

    #[tokio::test]
    async fn transition_timeouts_govern_the_following_waits() {
        let a = re("STEP-A");
        let b = re("STEP-B");
        let c = re("STEP-C");
        let d = re("STEP-D");
        let fsm = Fsm::new(
            "staged",
            vec![a.clone(), b.clone(), c.clone(), d.clone()],
            vec![
                Transition::new(&a, &[0], 1).timeout(Duration::from_secs(30)),
                Transition::new(&b, &[1], 2),
                Transition::new(&c, &[2], 3).timeout(Duration::from_secs(90)),
                Transition::new(&d, &[3], FSM_END),
            ],
        )
        .timeout(Duration::from_secs(5));
        let mut s = ScriptedSession::new().reply("go", "STEP-A\nSTEP-B\nSTEP-C\nSTEP-D\n");

        fsm.run(&mut s, "go", &MemorySink::new()).await.unwrap();

        let secs: Vec<u64> = s.log().lock().unwrap().waits.iter().map(|w| w.as_secs()).collect();
        assert_eq!(secs, [5, 30, 30, 90]);
    }

    #[tokio::test]
    async fn disconnected_session_surfaces_as_session_error() {
        let mut s = ScriptedSession::new().disconnected();
        let err = two_step().run(&mut s, "go", &MemorySink::new()).await.unwrap_err();
        assert!(matches!(
            err,
            FsmError::Session { source: SessionError::NotConnected, .. }
        ));
    }
}
