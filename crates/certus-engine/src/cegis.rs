//! The counterexample-guided synthesis loop.
//!
//! Control flow is a small state machine: [`transition`] is a pure function
//! of the current step and the event the step produced, and [`CegisLoop`]
//! only performs the side effects of each step (fitting, translating,
//! verifying, appending counterexamples).

use std::time::Instant;

use certus_ir::{DynamicalModel, Domains};
use rand::SeedableRng;
use rand_pcg::Pcg64;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::certificate::CertificateSpec;
use crate::config::{BackendChoice, CegisConfig, CegisOptions, ConfigurationError};
use crate::learner::{Candidate, Learner, NeuralLearner};
use crate::result::{CandidateReport, CegisResult, TerminationReason};
use crate::samples::SampleSet;
use crate::timeout::{deadline_exceeded, deadline_from_timeout_secs};
use crate::translator::{check_agreement, translate, Mismatch, SymbolicCandidate, TranslateError};
#[cfg(feature = "z3")]
use crate::verifier::Z3Factory;
use crate::verifier::{
    CandidateVerifier, Counterexample, Cvc5Factory, IntervalFactory, SmtVerifier, SolverFactory,
    VerifyOutcome,
};

/// Errors that abort a run instead of ending it with a status.
#[derive(Debug, Error)]
pub enum CegisError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Translate(#[from] TranslateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CegisStep {
    Learn,
    /// `relaxed` is set for the single retry after an inconclusive check.
    Verify { relaxed: bool },
    Finished(TerminationReason),
}

/// What a step reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    Learned,
    LearnerDiverged,
    Verified,
    CounterexamplesFound,
    Inconclusive,
    /// The exact candidate disagreed with the trained one on a sample.
    RepresentationMismatch,
    DeadlineExceeded,
}

/// Next step after `event`. `iteration` is the number of learn steps taken
/// so far; no learn step starts once it reaches `max_iters`.
pub fn transition(
    step: CegisStep,
    event: StepEvent,
    iteration: usize,
    max_iters: usize,
) -> CegisStep {
    use CegisStep::*;
    match (step, event) {
        (Finished(reason), _) => Finished(reason),
        (_, StepEvent::DeadlineExceeded) => Finished(TerminationReason::Deadline),
        (Learn, StepEvent::Learned) => Verify { relaxed: false },
        (Learn, StepEvent::LearnerDiverged) => Finished(TerminationReason::LearnerDiverged),
        (Learn, StepEvent::RepresentationMismatch) => {
            Finished(TerminationReason::RepresentationMismatch)
        }
        (Verify { .. }, StepEvent::Verified) => Finished(TerminationReason::Verified),
        (Verify { .. }, StepEvent::CounterexamplesFound) if iteration >= max_iters => {
            Finished(TerminationReason::IterationBudget)
        }
        (Verify { .. }, StepEvent::CounterexamplesFound) => Learn,
        (Verify { relaxed: false }, StepEvent::Inconclusive) => Verify { relaxed: true },
        (Verify { relaxed: true }, StepEvent::Inconclusive) => {
            Finished(TerminationReason::SolverInconclusive)
        }
        // Events a step cannot produce leave it where it is.
        (step, _) => step,
    }
}

/// One synthesis run over injected learner and verifier.
pub struct CegisLoop<'a, L: Learner, V: CandidateVerifier> {
    learner: L,
    verifier: V,
    spec: &'a CertificateSpec,
    model: &'a DynamicalModel,
    max_iters: usize,
    deadline: Option<Instant>,
}

impl<'a, L: Learner, V: CandidateVerifier> CegisLoop<'a, L, V> {
    pub fn new(
        learner: L,
        verifier: V,
        spec: &'a CertificateSpec,
        model: &'a DynamicalModel,
        max_iters: usize,
    ) -> Self {
        Self {
            learner,
            verifier,
            spec,
            model,
            max_iters,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    /// Run to a terminal step. The sample set only grows.
    pub fn run(&mut self, mut samples: SampleSet) -> Result<CegisResult, CegisError> {
        let started = Instant::now();
        let mut step = CegisStep::Learn;
        let mut iteration = 0;
        let mut candidate: Option<Candidate> = None;
        let mut symbolic: Option<SymbolicCandidate> = None;
        let mut history: Vec<Counterexample> = Vec::new();
        let mut mismatch: Option<Mismatch> = None;

        let reason = loop {
            let event = match step {
                CegisStep::Finished(reason) => break reason,
                _ if deadline_exceeded(self.deadline) => {
                    warn!(iteration, "deadline reached");
                    StepEvent::DeadlineExceeded
                }
                CegisStep::Learn => {
                    iteration += 1;
                    match self
                        .learner
                        .fit(&samples, self.spec, self.model, candidate.as_ref())
                    {
                        Ok(next) => {
                            if !next.converged {
                                warn!(
                                    iteration,
                                    loss = next.loss,
                                    "learner did not converge, verifying best candidate"
                                );
                            }
                            let exact = translate(&next, self.model, self.spec.time_domain())?;
                            let agreement = check_agreement(&next, &exact, &samples);
                            debug!(iteration, candidate = %exact.value, "candidate translated");
                            candidate = Some(next);
                            symbolic = Some(exact);
                            match agreement {
                                Ok(()) => StepEvent::Learned,
                                Err(found) => {
                                    warn!(
                                        iteration,
                                        point = ?found.point,
                                        numeric = found.numeric,
                                        symbolic = found.symbolic,
                                        "exact candidate disagrees with the trained one"
                                    );
                                    mismatch = Some(found);
                                    StepEvent::RepresentationMismatch
                                }
                            }
                        }
                        Err(err) => {
                            warn!(iteration, error = %err, "learner diverged");
                            StepEvent::LearnerDiverged
                        }
                    }
                }
                CegisStep::Verify { relaxed } => {
                    let Some(exact) = symbolic.as_ref() else {
                        // Verify is only entered after a Learned event.
                        step = CegisStep::Learn;
                        continue;
                    };
                    match self.verifier.verify(exact, relaxed) {
                        VerifyOutcome::Verified => {
                            info!(iteration, "candidate verified");
                            StepEvent::Verified
                        }
                        VerifyOutcome::Counterexamples(found) => {
                            let mut added = 0;
                            for mut cex in found {
                                cex.iteration = iteration;
                                if samples.insert(cex.role, cex.point.clone()) {
                                    added += 1;
                                }
                                history.push(cex);
                            }
                            info!(
                                iteration,
                                added,
                                samples = samples.total(),
                                "counterexamples found"
                            );
                            StepEvent::CounterexamplesFound
                        }
                        VerifyOutcome::Inconclusive { condition, reason } => {
                            warn!(iteration, condition, %reason, relaxed, "verification inconclusive");
                            StepEvent::Inconclusive
                        }
                    }
                }
            };
            step = transition(step, event, iteration, self.max_iters);
        };

        let report = candidate
            .as_ref()
            .map(|c| CandidateReport::new(c, symbolic.as_ref()));
        let result = CegisResult {
            status: reason.status(),
            reason,
            iterations: iteration,
            candidate: report,
            counterexamples: history,
            sample_counts: samples.counts(),
            elapsed_secs: started.elapsed().as_secs_f64(),
            mismatch,
        };
        info!(
            status = %result.status,
            reason = ?result.reason,
            iterations = result.iterations,
            "synthesis finished"
        );
        Ok(result)
    }
}

fn run_with<F: SolverFactory>(
    factory: F,
    model: &DynamicalModel,
    domains: &Domains,
    spec: &CertificateSpec,
    options: &CegisOptions,
    samples: SampleSet,
    deadline: Option<Instant>,
) -> Result<CegisResult, CegisError> {
    let verifier = SmtVerifier::new(factory, spec, domains, options).with_deadline(deadline);
    CegisLoop::new(NeuralLearner::new(options), verifier, spec, model, options.max_iters)
        .with_deadline(deadline)
        .run(samples)
}

/// Search for a certificate of `model` over `domains`.
///
/// Setup problems and untranslatable families are errors; every other
/// outcome, including failure to find a certificate, is a [`CegisResult`].
pub fn solve(
    model: &DynamicalModel,
    domains: &Domains,
    config: &CegisConfig,
) -> Result<CegisResult, CegisError> {
    let options = config.options();
    if model.n_vars() != options.n_vars {
        return Err(ConfigurationError::ModelArity {
            expected: options.n_vars,
            found: model.n_vars(),
        }
        .into());
    }
    let spec = CertificateSpec::for_domains(options, domains)?;
    domains
        .check_dimension(options.n_vars)
        .map_err(ConfigurationError::from)?;

    let deadline = deadline_from_timeout_secs(options.timeout_secs);
    let mut rng = Pcg64::seed_from_u64(options.seed);
    let samples = SampleSet::sample(
        domains,
        spec.required_roles(),
        options.batch_size,
        &mut rng,
        options.dedup_tolerance,
    )?;
    info!(
        model = model.name(),
        certificate = %spec.kind(),
        backend = %options.backend,
        seed = options.seed,
        samples = samples.total(),
        "starting synthesis"
    );

    match options.backend {
        BackendChoice::Interval => {
            run_with(IntervalFactory, model, domains, &spec, options, samples, deadline)
        }
        #[cfg(feature = "z3")]
        BackendChoice::Z3 => run_with(Z3Factory, model, domains, &spec, options, samples, deadline),
        #[cfg(not(feature = "z3"))]
        BackendChoice::Z3 => Err(ConfigurationError::InvalidOption {
            option: "backend",
            reason: "this build has no Z3 support".into(),
        }
        .into()),
        BackendChoice::Cvc5 => {
            run_with(Cvc5Factory, model, domains, &spec, options, samples, deadline)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::{FunctionFamily, LearnerError};
    use certus_ir::{DomainRole, Expr};

    const ALL_EVENTS: [StepEvent; 7] = [
        StepEvent::Learned,
        StepEvent::LearnerDiverged,
        StepEvent::Verified,
        StepEvent::CounterexamplesFound,
        StepEvent::Inconclusive,
        StepEvent::RepresentationMismatch,
        StepEvent::DeadlineExceeded,
    ];

    #[test]
    fn transition_table() {
        use CegisStep::*;
        let strict = Verify { relaxed: false };
        let relaxed = Verify { relaxed: true };
        assert_eq!(transition(Learn, StepEvent::Learned, 1, 5), strict);
        assert_eq!(
            transition(Learn, StepEvent::LearnerDiverged, 1, 5),
            Finished(TerminationReason::LearnerDiverged)
        );
        assert_eq!(
            transition(strict, StepEvent::Verified, 1, 5),
            Finished(TerminationReason::Verified)
        );
        assert_eq!(transition(relaxed, StepEvent::Verified, 1, 5), Finished(TerminationReason::Verified));
        assert_eq!(transition(strict, StepEvent::CounterexamplesFound, 4, 5), Learn);
        assert_eq!(
            transition(strict, StepEvent::CounterexamplesFound, 5, 5),
            Finished(TerminationReason::IterationBudget)
        );
        assert_eq!(
            transition(Learn, StepEvent::RepresentationMismatch, 1, 5),
            Finished(TerminationReason::RepresentationMismatch)
        );
        assert_eq!(transition(strict, StepEvent::Inconclusive, 1, 5), relaxed);
        assert_eq!(transition(relaxed, StepEvent::CounterexamplesFound, 1, 5), Learn);
        assert_eq!(
            transition(relaxed, StepEvent::Inconclusive, 1, 5),
            Finished(TerminationReason::SolverInconclusive)
        );
    }

    #[test]
    fn deadline_finishes_any_running_step() {
        for step in [
            CegisStep::Learn,
            CegisStep::Verify { relaxed: false },
            CegisStep::Verify { relaxed: true },
        ] {
            assert_eq!(
                transition(step, StepEvent::DeadlineExceeded, 1, 5),
                CegisStep::Finished(TerminationReason::Deadline)
            );
        }
    }

    #[test]
    fn finished_is_absorbing() {
        let done = CegisStep::Finished(TerminationReason::IterationBudget);
        for event in ALL_EVENTS {
            assert_eq!(transition(done, event, 1, 5), done);
        }
    }

    /// Returns a fixed candidate (linear unless replaced) and counts its calls.
    struct FixedLearner {
        calls: usize,
        seen: Vec<usize>,
        diverge_at: Option<usize>,
        candidate: Candidate,
    }

    impl FixedLearner {
        fn new() -> Self {
            Self {
                calls: 0,
                seen: Vec::new(),
                diverge_at: None,
                candidate: Candidate::new(
                    FunctionFamily::Polynomial {
                        min_degree: 1,
                        max_degree: 1,
                    },
                    vec![1.0, 0.0],
                ),
            }
        }
    }

    impl Learner for FixedLearner {
        fn fit(
            &mut self,
            samples: &SampleSet,
            _spec: &CertificateSpec,
            _model: &DynamicalModel,
            _previous: Option<&Candidate>,
        ) -> Result<Candidate, LearnerError> {
            self.calls += 1;
            self.seen.push(samples.total());
            if self.diverge_at == Some(self.calls) {
                return Err(LearnerError::Diverged { epoch: 3 });
            }
            Ok(self.candidate.clone())
        }
    }

    /// Replays scripted outcomes, then keeps returning fresh counterexamples.
    struct ScriptedVerifier {
        script: Vec<VerifyOutcome>,
        calls: Vec<bool>,
    }

    impl CandidateVerifier for ScriptedVerifier {
        fn verify(&mut self, _candidate: &SymbolicCandidate, relaxed: bool) -> VerifyOutcome {
            self.calls.push(relaxed);
            if self.calls.len() <= self.script.len() {
                return self.script[self.calls.len() - 1].clone();
            }
            let x = self.calls.len() as f64;
            VerifyOutcome::Counterexamples(vec![Counterexample {
                point: vec![x, -x],
                condition: "decrease",
                role: DomainRole::Operating,
                iteration: 0,
            }])
        }
    }

    fn fixture() -> (CertificateSpec, DynamicalModel, SampleSet) {
        let spec = CertificateSpec::new(&CegisOptions::default());
        let model =
            DynamicalModel::new("decay", vec![Expr::var(0).neg(), Expr::var(1).neg()]).unwrap();
        let mut samples = SampleSet::new(1e-6);
        samples.insert(DomainRole::Operating, vec![0.5, 0.5]);
        (spec, model, samples)
    }

    fn inconclusive() -> VerifyOutcome {
        VerifyOutcome::Inconclusive {
            condition: "decrease",
            reason: "timeout".into(),
        }
    }

    #[test]
    fn budget_bounds_cycles_and_samples_grow() {
        let (spec, model, samples) = fixture();
        let verifier = ScriptedVerifier {
            script: Vec::new(),
            calls: Vec::new(),
        };
        let mut run = CegisLoop::new(FixedLearner::new(), verifier, &spec, &model, 4);
        let result = run.run(samples).unwrap();
        assert_eq!(result.reason, TerminationReason::IterationBudget);
        assert_eq!(result.iterations, 4);
        assert_eq!(run.verifier().calls.len(), 4);
        assert_eq!(run.learner.seen, vec![1, 2, 3, 4]);
        assert_eq!(result.sample_counts[&DomainRole::Operating], 5);
        let stamps: Vec<usize> = result.counterexamples.iter().map(|c| c.iteration).collect();
        assert_eq!(stamps, vec![1, 2, 3, 4]);
    }

    #[test]
    fn inconclusive_is_retried_once_relaxed() {
        let (spec, model, samples) = fixture();
        let verifier = ScriptedVerifier {
            script: vec![inconclusive(), VerifyOutcome::Verified],
            calls: Vec::new(),
        };
        let mut run = CegisLoop::new(FixedLearner::new(), verifier, &spec, &model, 10);
        let result = run.run(samples).unwrap();
        assert!(result.is_success());
        assert_eq!(result.iterations, 1);
        assert_eq!(run.verifier().calls, vec![false, true]);
    }

    #[test]
    fn repeated_inconclusive_fails_verification() {
        let (spec, model, samples) = fixture();
        let verifier = ScriptedVerifier {
            script: vec![inconclusive(), inconclusive()],
            calls: Vec::new(),
        };
        let mut run = CegisLoop::new(FixedLearner::new(), verifier, &spec, &model, 10);
        let result = run.run(samples).unwrap();
        assert_eq!(result.reason, TerminationReason::SolverInconclusive);
        assert_eq!(result.status, crate::result::CegisStatus::VerificationFailed);
        assert_eq!(run.verifier().calls.len(), 2);
    }

    #[test]
    fn divergence_ends_the_run_as_exhausted() {
        let (spec, model, samples) = fixture();
        let verifier = ScriptedVerifier {
            script: Vec::new(),
            calls: Vec::new(),
        };
        let mut learner = FixedLearner::new();
        learner.diverge_at = Some(2);
        let mut run = CegisLoop::new(learner, verifier, &spec, &model, 10);
        let result = run.run(samples).unwrap();
        assert_eq!(result.reason, TerminationReason::LearnerDiverged);
        assert_eq!(result.status, crate::result::CegisStatus::Exhausted);
        assert_eq!(result.iterations, 2);
        assert_eq!(run.verifier().calls.len(), 1);
        // The last translated candidate is still reported.
        assert!(result.candidate.is_some_and(|c| c.value.is_some()));
    }

    #[test]
    fn translation_disagreement_ends_with_a_result() {
        let (spec, model, mut samples) = fixture();
        // x0^2 overflows in both forms, so their difference is NaN.
        samples.insert(DomainRole::Operating, vec![1e200, 0.0]);
        let verifier = ScriptedVerifier {
            script: Vec::new(),
            calls: Vec::new(),
        };
        let mut learner = FixedLearner::new();
        learner.candidate = Candidate::new(
            FunctionFamily::Polynomial {
                min_degree: 2,
                max_degree: 2,
            },
            vec![1.0, 0.0, 1.0],
        );
        let mut run = CegisLoop::new(learner, verifier, &spec, &model, 10);
        let result = run.run(samples).unwrap();
        assert_eq!(result.reason, TerminationReason::RepresentationMismatch);
        assert_eq!(result.status, crate::result::CegisStatus::VerificationFailed);
        assert_eq!(result.iterations, 1);
        assert!(run.verifier().calls.is_empty());
        let mismatch = result.mismatch.expect("mismatch recorded");
        assert_eq!(mismatch.point, vec![1e200, 0.0]);
        let candidate = result.candidate.expect("candidate reported");
        assert_eq!(candidate.parameters, vec![1.0, 0.0, 1.0]);
        assert!(candidate.value.is_some());
    }

    #[test]
    fn expired_deadline_stops_before_learning() {
        let (spec, model, samples) = fixture();
        let verifier = ScriptedVerifier {
            script: Vec::new(),
            calls: Vec::new(),
        };
        let past = Instant::now() - std::time::Duration::from_secs(1);
        let mut run =
            CegisLoop::new(FixedLearner::new(), verifier, &spec, &model, 10).with_deadline(Some(past));
        let result = run.run(samples).unwrap();
        assert_eq!(result.reason, TerminationReason::Deadline);
        assert_eq!(result.iterations, 0);
        assert!(result.candidate.is_none());
        assert_eq!(run.learner.calls, 0);
    }

    #[test]
    fn model_arity_is_checked_before_sampling() {
        let config = CegisConfig::new(CegisOptions {
            n_vars: 3,
            ..CegisOptions::default()
        })
        .unwrap();
        let (_, model, _) = fixture();
        let err = solve(&model, &Domains::new(), &config).unwrap_err();
        assert!(matches!(
            err,
            CegisError::Configuration(ConfigurationError::ModelArity {
                expected: 3,
                found: 2
            })
        ));
    }

    #[test]
    fn missing_domain_is_a_configuration_error() {
        let config = CegisConfig::new(CegisOptions::default()).unwrap();
        let (_, model, _) = fixture();
        let err = solve(&model, &Domains::new(), &config).unwrap_err();
        assert!(matches!(
            err,
            CegisError::Configuration(ConfigurationError::MissingDomain {
                role: DomainRole::Operating,
                ..
            })
        ));
    }
}
