//! Scripted executor for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::{CommandExecutor, CommandOutput};

struct Rule {
    needle: String,
    responses: VecDeque<CommandOutput>,
}

/// Answers commands from a script keyed by substring match.
///
/// The first rule whose needle occurs in `"program arg1 arg2 ..."` wins.
/// Each rule hands out its responses in order and keeps repeating the last
/// one. Unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
    stdin: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule answering commands containing `needle`.
    pub fn on(self, needle: &str, responses: Vec<CommandOutput>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule { needle: needle.to_string(), responses: responses.into() });
        }
        self
    }

    /// Every command line seen, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of calls containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }

    /// Payloads passed through `run_with_stdin`.
    pub fn stdin_payloads(&self) -> Vec<String> {
        self.stdin.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn answer(&self, line: String) -> CommandOutput {
        let response = self.rules.lock().ok().and_then(|mut rules| {
            let rule = rules.iter_mut().find(|r| line.contains(&r.needle))?;
            if rule.responses.len() > 1 {
                rule.responses.pop_front()
            } else {
                rule.responses.front().cloned()
            }
        });
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(line);
        }
        response.unwrap_or_else(|| CommandOutput::ok(""))
    }
}

impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, program: &str, args: &[&str]) -> CommandOutput {
        self.answer(format!("{program} {}", args.join(" ")))
    }

    async fn run_with_stdin(&self, program: &str, args: &[&str], stdin: &str) -> CommandOutput {
        if let Ok(mut payloads) = self.stdin.lock() {
            payloads.push(stdin.to_string());
        }
        self.answer(format!("{program} {}", args.join(" ")))
    }
}
