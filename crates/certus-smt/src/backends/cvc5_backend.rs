use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};

use thiserror::Error;

use crate::backends::smtlib_printer::{parse_real_value, sort_to_smtlib, to_smtlib};
use crate::solver::{Model, ModelValue, SatResult, SmtSolver};
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

#[derive(Debug, Error)]
pub enum Cvc5Error {
    #[error("cvc5 I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cvc5 not found: {0}")]
    NotFound(String),
    #[error("cvc5 error: {0}")]
    SolverError(String),
    #[error("Unsupported by the cvc5 backend: {0}")]
    Unsupported(String),
}

/// SMT-LIB logic the process is started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cvc5Logic {
    /// Quantifier-free nonlinear real arithmetic.
    Nra,
    /// Everything, including the transcendental extension.
    All,
}

impl Cvc5Logic {
    fn as_str(self) -> &'static str {
        match self {
            Cvc5Logic::Nra => "QF_NRA",
            Cvc5Logic::All => "ALL",
        }
    }
}

pub struct Cvc5Solver {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr: BufReader<ChildStderr>,
    logic: Cvc5Logic,
    vars: HashMap<String, SmtSort>,
}

impl Cvc5Solver {
    pub fn new() -> Result<Self, Cvc5Error> {
        Self::with_options("cvc5", None, Cvc5Logic::Nra)
    }

    pub fn with_timeout_secs(timeout_secs: u64, logic: Cvc5Logic) -> Result<Self, Cvc5Error> {
        if timeout_secs == 0 {
            return Self::with_options("cvc5", None, logic);
        }
        let timeout_ms = timeout_secs.saturating_mul(1000);
        Self::with_options("cvc5", Some(timeout_ms), logic)
    }

    pub fn with_options(
        cmd: &str,
        timeout_ms: Option<u64>,
        logic: Cvc5Logic,
    ) -> Result<Self, Cvc5Error> {
        let mut args = vec![
            "--lang".to_string(),
            "smt2".to_string(),
            "--incremental".to_string(),
            "--produce-models".to_string(),
        ];
        if let Some(ms) = timeout_ms {
            args.push(format!("--tlimit-per={ms}"));
        }

        let mut child = Command::new(cmd)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Cvc5Error::NotFound(format!("{cmd}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Cvc5Error::SolverError("failed to capture cvc5 stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Cvc5Error::SolverError("failed to capture cvc5 stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Cvc5Error::SolverError("failed to capture cvc5 stderr".into()))?;

        let mut solver = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            stderr: BufReader::new(stderr),
            logic,
            vars: HashMap::new(),
        };

        solver.send_command_no_response(&format!("(set-logic {})", logic.as_str()))?;
        Ok(solver)
    }

    fn send_command(&mut self, cmd: &str) -> Result<String, Cvc5Error> {
        writeln!(self.stdin, "{cmd}")?;
        self.stdin.flush()?;

        // Read one line of response
        let mut response = String::new();
        self.stdout.read_line(&mut response)?;
        if response.is_empty() {
            let mut stderr = String::new();
            let _ = self.stderr.read_line(&mut stderr);
            return Err(Cvc5Error::SolverError(format!(
                "No response from cvc5 for command `{cmd}`. stderr: {}",
                stderr.trim()
            )));
        }
        Ok(response.trim_end().to_string())
    }

    fn send_command_no_response(&mut self, cmd: &str) -> Result<(), Cvc5Error> {
        writeln!(self.stdin, "{cmd}")?;
        self.stdin.flush()?;
        Ok(())
    }

    fn parse_check(response: &str) -> Result<SatResult, Cvc5Error> {
        match response {
            "sat" => Ok(SatResult::Sat),
            "unsat" => Ok(SatResult::Unsat),
            "unknown" => Ok(SatResult::Unknown("cvc5 returned unknown".into())),
            other => Err(Cvc5Error::SolverError(other.to_string())),
        }
    }
}

impl Drop for Cvc5Solver {
    fn drop(&mut self) {
        let _ = writeln!(self.stdin, "(exit)");
        let _ = self.stdin.flush();
        let _ = self.child.wait();
    }
}

impl SmtSolver for Cvc5Solver {
    type Error = Cvc5Error;

    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), Cvc5Error> {
        let sort_str = sort_to_smtlib(sort);
        self.send_command_no_response(&format!("(declare-const {name} {sort_str})"))?;
        self.vars.insert(name.to_string(), sort.clone());
        Ok(())
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), Cvc5Error> {
        if term.any(&|t| matches!(t, SmtTerm::Log(_))) {
            return Err(Cvc5Error::Unsupported("log".into()));
        }
        if self.logic == Cvc5Logic::Nra && term.is_transcendental() {
            return Err(Cvc5Error::Unsupported(
                "transcendental functions need the ALL logic".into(),
            ));
        }
        let smt_str = to_smtlib(term);
        self.send_command_no_response(&format!("(assert {smt_str})"))?;
        Ok(())
    }

    fn push(&mut self) -> Result<(), Cvc5Error> {
        self.send_command_no_response("(push 1)")?;
        Ok(())
    }

    fn pop(&mut self) -> Result<(), Cvc5Error> {
        self.send_command_no_response("(pop 1)")?;
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, Cvc5Error> {
        let response = self.send_command("(check-sat)")?;
        Self::parse_check(&response)
    }

    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Cvc5Error> {
        let result = self.check_sat()?;
        if result != SatResult::Sat {
            return Ok((result, None));
        }

        let mut values = HashMap::new();
        for &(name, sort) in var_names {
            if !self.vars.contains_key(name) {
                continue;
            }
            let response = self.send_command(&format!("(get-value ({name}))"))?;
            // Response format: ((name value))
            if let Some(val) = parse_cvc5_value(&response, sort) {
                values.insert(name.to_string(), val);
            }
        }

        Ok((SatResult::Sat, Some(Model { values })))
    }

    fn reset(&mut self) -> Result<(), Cvc5Error> {
        self.send_command_no_response("(reset)")?;
        let logic = self.logic.as_str();
        self.send_command_no_response(&format!("(set-logic {logic})"))?;
        self.vars.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cvc5"
    }
}

fn parse_cvc5_value(response: &str, sort: &SmtSort) -> Option<ModelValue> {
    // ((name value)) → name value
    let pair = response
        .trim()
        .strip_prefix('(')?
        .strip_suffix(')')?
        .trim()
        .strip_prefix('(')?
        .strip_suffix(')')?;
    let (_, value) = pair.trim().split_once(char::is_whitespace)?;
    let value = value.trim();

    match sort {
        SmtSort::Real => parse_real_value(value).map(ModelValue::Real),
        SmtSort::Bool => match value {
            "true" => Some(ModelValue::Bool(true)),
            "false" => Some(ModelValue::Bool(false)),
            _ => None,
        },
    }
}
