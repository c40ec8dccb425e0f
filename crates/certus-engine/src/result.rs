use std::fmt;

use certus_ir::{DomainRole, Expr};
use indexmap::IndexMap;
use serde::Serialize;

use crate::learner::{Candidate, FunctionFamily};
use crate::translator::{Mismatch, SymbolicCandidate};
use crate::verifier::Counterexample;

/// Terminal status of one synthesis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CegisStatus {
    /// Every condition was discharged; the candidate is a certificate.
    Success,
    /// The decision procedure failed twice on the same candidate, or the
    /// candidate's exact form disagreed with the trained one.
    VerificationFailed,
    /// No certificate found within the run's budget. Not a proof of absence.
    Exhausted,
}

impl fmt::Display for CegisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CegisStatus::Success => write!(f, "success"),
            CegisStatus::VerificationFailed => write!(f, "verification_failed"),
            CegisStatus::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Verified,
    IterationBudget,
    Deadline,
    LearnerDiverged,
    SolverInconclusive,
    /// Translation changed the candidate's value on a sample.
    RepresentationMismatch,
}

impl TerminationReason {
    pub fn status(self) -> CegisStatus {
        match self {
            TerminationReason::Verified => CegisStatus::Success,
            TerminationReason::SolverInconclusive
            | TerminationReason::RepresentationMismatch => CegisStatus::VerificationFailed,
            TerminationReason::IterationBudget
            | TerminationReason::Deadline
            | TerminationReason::LearnerDiverged => CegisStatus::Exhausted,
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Verified => write!(f, "all conditions verified"),
            TerminationReason::IterationBudget => write!(f, "iteration budget exhausted"),
            TerminationReason::Deadline => write!(f, "wall-clock deadline reached"),
            TerminationReason::LearnerDiverged => write!(f, "learner diverged"),
            TerminationReason::SolverInconclusive => {
                write!(f, "decision procedure inconclusive after relaxed retry")
            }
            TerminationReason::RepresentationMismatch => {
                write!(f, "exact candidate disagrees with the trained one")
            }
        }
    }
}

/// Last candidate in both forms.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateReport {
    pub family: FunctionFamily,
    pub parameters: Vec<f64>,
    /// `None` when the run stopped before translating this candidate.
    pub value: Option<Expr>,
    pub derivative: Option<Expr>,
    pub loss: f64,
    pub converged: bool,
}

impl CandidateReport {
    pub fn new(candidate: &Candidate, symbolic: Option<&SymbolicCandidate>) -> Self {
        Self {
            family: candidate.family().clone(),
            parameters: candidate.params().to_vec(),
            value: symbolic.map(|s| s.value.clone()),
            derivative: symbolic.map(|s| s.derivative.clone()),
            loss: candidate.loss,
            converged: candidate.converged,
        }
    }
}

/// Everything an outer harness needs to record or plot a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CegisResult {
    pub status: CegisStatus,
    pub reason: TerminationReason,
    /// Learner/verifier cycles started.
    pub iterations: usize,
    pub candidate: Option<CandidateReport>,
    /// Every counterexample in the order it was found.
    pub counterexamples: Vec<Counterexample>,
    pub sample_counts: IndexMap<DomainRole, usize>,
    pub elapsed_secs: f64,
    /// Set when the run ended on a translation disagreement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mismatch: Option<Mismatch>,
}

impl CegisResult {
    pub fn is_success(&self) -> bool {
        self.status == CegisStatus::Success
    }
}

impl fmt::Display for CegisResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RESULT: {} ({})", self.status.to_string().to_uppercase(), self.reason)?;
        writeln!(
            f,
            "Iterations: {}, elapsed: {:.3}s",
            self.iterations, self.elapsed_secs
        )?;
        if let Some(candidate) = &self.candidate {
            match &candidate.value {
                Some(value) => writeln!(f, "Candidate: {value}")?,
                None => writeln!(f, "Candidate: {} parameters (untranslated)", candidate.parameters.len())?,
            }
            if let Some(derivative) = &candidate.derivative {
                writeln!(f, "Derivative: {derivative}")?;
            }
            let note = if candidate.converged { "" } else { " (not converged)" };
            writeln!(f, "Training loss: {:.6}{note}", candidate.loss)?;
        }
        let counts: Vec<String> = self
            .sample_counts
            .iter()
            .map(|(role, n)| format!("{role}={n}"))
            .collect();
        if let Some(m) = &self.mismatch {
            writeln!(
                f,
                "Mismatch at {:?}: numeric {} vs exact {}",
                m.point, m.numeric, m.symbolic
            )?;
        }
        writeln!(f, "Samples: {}", counts.join(", "))?;
        write!(f, "Counterexamples: {}", self.counterexamples.len())?;
        if self.status != CegisStatus::Success && self.candidate.is_some() {
            write!(f, "\nThe last candidate is not a certificate.")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_map_to_statuses() {
        assert_eq!(TerminationReason::Verified.status(), CegisStatus::Success);
        for reason in [
            TerminationReason::SolverInconclusive,
            TerminationReason::RepresentationMismatch,
        ] {
            assert_eq!(reason.status(), CegisStatus::VerificationFailed);
        }
        for reason in [
            TerminationReason::IterationBudget,
            TerminationReason::Deadline,
            TerminationReason::LearnerDiverged,
        ] {
            assert_eq!(reason.status(), CegisStatus::Exhausted);
        }
    }

    #[test]
    fn result_serialises_with_snake_case_status() {
        let mut sample_counts = IndexMap::new();
        sample_counts.insert(DomainRole::Operating, 3);
        let result = CegisResult {
            status: CegisStatus::VerificationFailed,
            reason: TerminationReason::SolverInconclusive,
            iterations: 2,
            candidate: None,
            counterexamples: Vec::new(),
            sample_counts,
            elapsed_secs: 0.5,
            mismatch: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "verification_failed");
        assert_eq!(json["reason"], "solver_inconclusive");
        assert_eq!(json["iterations"], 2);
        assert!(json.get("mismatch").is_none());
        let text = result.to_string();
        assert!(text.starts_with("RESULT: VERIFICATION_FAILED"));
        assert!(text.contains("Samples: XD=3"));
    }

    #[test]
    fn mismatch_is_reported_with_its_point() {
        let result = CegisResult {
            status: CegisStatus::VerificationFailed,
            reason: TerminationReason::RepresentationMismatch,
            iterations: 1,
            candidate: None,
            counterexamples: Vec::new(),
            sample_counts: IndexMap::new(),
            elapsed_secs: 0.1,
            mismatch: Some(Mismatch {
                point: vec![2.0, -1.0],
                numeric: 1.0,
                symbolic: 1.5,
            }),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["reason"], "representation_mismatch");
        assert_eq!(json["mismatch"]["point"], serde_json::json!([2.0, -1.0]));
        let text = result.to_string();
        assert!(text.contains("Mismatch at [2.0, -1.0]: numeric 1 vs exact 1.5"));
    }

    #[test]
    fn report_carries_symbolic_forms() {
        let candidate = Candidate::new(
            FunctionFamily::Polynomial {
                min_degree: 1,
                max_degree: 1,
            },
            vec![1.0, -1.0],
        );
        let symbolic = SymbolicCandidate {
            value: Expr::var(0).sub(Expr::var(1)),
            derivative: Expr::zero(),
        };
        let report = CandidateReport::new(&candidate, Some(&symbolic));
        assert_eq!(report.parameters, vec![1.0, -1.0]);
        assert_eq!(report.value, Some(symbolic.value.clone()));
        assert!(CandidateReport::new(&candidate, None).value.is_none());
    }
}
