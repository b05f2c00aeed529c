//! Shared test doubles for modules that shell out to external commands.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Result;
use crate::exec::{CommandOutput, CommandRunner};

/// A [`CommandRunner`] that records every invocation and returns
/// scripted outputs instead of spawning processes.
///
/// By default every command succeeds with empty output. Individual
/// programs can be given canned stdout, and calls whose arguments
/// contain a given substring can be forced to fail.
#[derive(Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    outputs: Mutex<HashMap<String, String>>,
    matched_outputs: Mutex<Vec<(String, String, String)>>,
    failures: Mutex<Vec<(String, String)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stdout returned for every invocation of `program`.
    pub fn set_output(&self, program: &str, stdout: &str) {
        self.outputs
            .lock()
            .unwrap()
            .insert(program.to_string(), stdout.to_string());
    }

    /// Sets the stdout returned for invocations of `program` whose
    /// arguments contain `arg_fragment`. Takes precedence over
    /// [`set_output`](Self::set_output).
    pub fn set_output_matching(&self, program: &str, arg_fragment: &str, stdout: &str) {
        self.matched_outputs.lock().unwrap().push((
            program.to_string(),
            arg_fragment.to_string(),
            stdout.to_string(),
        ));
    }

    /// Forces invocations of `program` whose arguments contain
    /// `arg_fragment` to exit with code 1.
    pub fn fail_matching(&self, program: &str, arg_fragment: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((program.to_string(), arg_fragment.to_string()));
    }

    /// Clears all forced failures.
    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Number of recorded invocations of `program`.
    pub fn calls_for(&self, program: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(cmd, _)| cmd == program)
            .count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push((
            cmd.to_string(),
            args.iter().map(|a| a.to_string()).collect(),
        ));

        let forced_failure = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .any(|(prog, frag)| prog == cmd && args.iter().any(|a| a.contains(frag.as_str())));
        if forced_failure {
            return Ok(CommandOutput {
                stdout: String::new(),
                stderr: "scripted failure".to_string(),
                code: 1,
            });
        }

        let matched = self
            .matched_outputs
            .lock()
            .unwrap()
            .iter()
            .find(|(prog, frag, _)| {
                prog == cmd && args.iter().any(|a| a.contains(frag.as_str()))
            })
            .map(|(_, _, stdout)| stdout.clone());
        let stdout = matched.unwrap_or_else(|| {
            self.outputs
                .lock()
                .unwrap()
                .get(cmd)
                .cloned()
                .unwrap_or_default()
        });
        Ok(CommandOutput {
            stdout,
            stderr: String::new(),
            code: 0,
        })
    }
}
