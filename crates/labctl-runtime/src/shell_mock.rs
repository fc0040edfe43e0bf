//! Test mock for the `shell` helpers.
//!
//! Installs a thread-local handler that intercepts every host command and
//! script, records it, and answers from a list of substring rules.

use std::cell::RefCell;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Output};
use std::sync::{Arc, Mutex};

/// Mock response for a shell command.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i32,
    pub stdout: String,
}

impl MockResponse {
    pub fn ok(stdout: &str) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.to_string(),
        }
    }

    pub fn empty() -> Self {
        Self::ok("")
    }

    pub fn fail(exit_code: i32) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
        }
    }

    pub(crate) fn to_output(&self) -> Output {
        Output {
            // Unix exit code encoding: status = code << 8
            status: ExitStatus::from_raw(self.exit_code << 8),
            stdout: self.stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
        }
    }
}

type MockHandler = Box<dyn Fn(&str) -> MockResponse>;

thread_local! {
    static HANDLER: RefCell<Option<MockHandler>> = const { RefCell::new(None) };
}

/// Guard that clears the mock handler on drop.
pub struct MockGuard;

impl Drop for MockGuard {
    fn drop(&mut self) {
        HANDLER.with(|h| *h.borrow_mut() = None);
    }
}

/// Try to intercept a command via the installed mock handler.
pub(crate) fn intercept(command: &str) -> Option<Output> {
    HANDLER.with(|h| h.borrow().as_ref().map(|f| f(command).to_output()))
}

/// Every command seen by the mock, in order.
pub type CommandLog = Arc<Mutex<Vec<String>>>;

pub fn commands(log: &CommandLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Build a recording mock. Commands matching no rule succeed with no output.
pub fn mock_shell() -> MockShellBuilder {
    MockShellBuilder { rules: Vec::new() }
}

pub struct MockShellBuilder {
    rules: Vec<(String, MockResponse)>,
}

impl MockShellBuilder {
    /// Answer commands containing `pattern` with `response`. First match wins.
    pub fn respond(mut self, pattern: &str, response: MockResponse) -> Self {
        self.rules.push((pattern.to_string(), response));
        self
    }

    /// Install the mock. Returns a guard (clears on drop) and the command log.
    pub fn install(self) -> (MockGuard, CommandLog) {
        let log: CommandLog = Arc::new(Mutex::new(Vec::new()));
        let log_ref = log.clone();
        let rules = self.rules;

        HANDLER.with(|h| {
            *h.borrow_mut() = Some(Box::new(move |command: &str| {
                log_ref.lock().unwrap().push(command.to_string());
                rules
                    .iter()
                    .find(|(pattern, _)| command.contains(pattern.as_str()))
                    .map(|(_, response)| response.clone())
                    .unwrap_or_else(MockResponse::empty)
            }));
        });

        (MockGuard, log)
    }
}
