//! Formal check of a symbolic candidate against every condition.
//!
//! Each condition becomes one satisfiability query: "some point of the
//! domain breaks the requirement". `Unsat` on every query proves the
//! candidate; a model is a counterexample. Solvers are created fresh per
//! condition through a [`SolverFactory`], so any [`SmtSolver`] works.

use std::time::{Duration, Instant};

use certus_ir::{Domain, DomainRole, Domains, Expr, Predicate};
use certus_smt::backends::cvc5_backend::{Cvc5Logic, Cvc5Solver};
use certus_smt::backends::interval_backend::{IntervalConfig, IntervalSolver};
#[cfg(feature = "z3")]
use certus_smt::backends::z3_backend::Z3Solver;
use certus_smt::encoder::{declare_state, encode_predicate, state_vars};
use certus_smt::solver::{SatResult, SmtSolver};
use certus_smt::sorts::SmtSort;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::Serialize;
use tracing::{debug, warn};

use crate::certificate::{CertificateSpec, Condition};
use crate::config::CegisOptions;
use crate::timeout::{check_timeout, deadline_exceeded};
use crate::translator::SymbolicCandidate;

/// A point where the candidate breaks a condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Counterexample {
    pub point: Vec<f64>,
    pub condition: &'static str,
    pub role: DomainRole,
    /// Loop iteration that produced the point (1-based).
    pub iteration: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    Verified,
    Counterexamples(Vec<Counterexample>),
    /// The decision procedure could not decide this condition.
    Inconclusive {
        condition: &'static str,
        reason: String,
    },
}

/// Anything that can judge a symbolic candidate. The loop only sees this.
pub trait CandidateVerifier {
    /// `relaxed` asks for the looser tolerance used by the single retry
    /// after an inconclusive answer.
    fn verify(&mut self, candidate: &SymbolicCandidate, relaxed: bool) -> VerifyOutcome;
}

/// Limits for one solver check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckSettings {
    pub precision: f64,
    pub timeout: Option<Duration>,
    pub max_boxes: usize,
}

/// Builds a fresh solver for each condition.
pub trait SolverFactory {
    type Solver: SmtSolver;

    fn create(
        &mut self,
        settings: &CheckSettings,
        transcendental: bool,
    ) -> Result<Self::Solver, <Self::Solver as SmtSolver>::Error>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntervalFactory;

impl SolverFactory for IntervalFactory {
    type Solver = IntervalSolver;

    fn create(
        &mut self,
        settings: &CheckSettings,
        _transcendental: bool,
    ) -> Result<IntervalSolver, <IntervalSolver as SmtSolver>::Error> {
        Ok(IntervalSolver::new(IntervalConfig {
            precision: settings.precision,
            max_boxes: settings.max_boxes,
            timeout: settings.timeout,
        }))
    }
}

#[cfg(feature = "z3")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Z3Factory;

#[cfg(feature = "z3")]
impl SolverFactory for Z3Factory {
    type Solver = Z3Solver;

    fn create(
        &mut self,
        settings: &CheckSettings,
        _transcendental: bool,
    ) -> Result<Z3Solver, <Z3Solver as SmtSolver>::Error> {
        let secs = solver_timeout_secs(settings);
        Ok(Z3Solver::with_timeout_secs(secs))
    }
}

/// Spawns a `cvc5` process per condition; transcendental formulas switch
/// the logic to `ALL`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cvc5Factory;

impl SolverFactory for Cvc5Factory {
    type Solver = Cvc5Solver;

    fn create(
        &mut self,
        settings: &CheckSettings,
        transcendental: bool,
    ) -> Result<Cvc5Solver, <Cvc5Solver as SmtSolver>::Error> {
        let logic = if transcendental {
            Cvc5Logic::All
        } else {
            Cvc5Logic::Nra
        };
        let secs = solver_timeout_secs(settings);
        Cvc5Solver::with_timeout_secs(secs, logic)
    }
}

/// Second-granularity limit for process and FFI backends; `0` means none.
fn solver_timeout_secs(settings: &CheckSettings) -> u64 {
    settings
        .timeout
        .map(crate::timeout::whole_secs_rounded_up)
        .unwrap_or(0)
}

/// Verifier knobs, lifted out of [`CegisOptions`].
#[derive(Debug, Clone, PartialEq)]
pub struct VerifierSettings {
    pub precision: f64,
    pub relax_factor: f64,
    pub max_boxes: usize,
    pub solver_timeout_secs: u64,
    pub max_per_condition: usize,
    pub max_per_round: usize,
    pub neighbours: usize,
    pub neighbour_radius: f64,
}

impl From<&CegisOptions> for VerifierSettings {
    fn from(options: &CegisOptions) -> Self {
        Self {
            precision: options.precision,
            relax_factor: options.relax_factor,
            max_boxes: options.max_boxes,
            solver_timeout_secs: options.solver_timeout_secs,
            max_per_condition: options.max_counterexamples_per_condition,
            max_per_round: options.max_counterexamples_per_round,
            neighbours: options.counterexample_neighbours,
            neighbour_radius: options.neighbour_radius,
        }
    }
}

/// `0` stays unlimited.
fn scaled_secs(secs: u64, factor: f64) -> u64 {
    let scaled = (secs as f64 * factor).ceil();
    if scaled >= u64::MAX as f64 {
        u64::MAX
    } else {
        scaled as u64
    }
}

/// Seed offset so neighbour sampling never replays the learner's stream.
const VERIFIER_SEED_SALT: u64 = 0x5851_f42d_4c95_7f2d;

/// Decision-procedure verifier over a fixed [`CertificateSpec`] and domain mapping.
pub struct SmtVerifier<'a, F: SolverFactory> {
    factory: F,
    spec: &'a CertificateSpec,
    domains: &'a Domains,
    n_vars: usize,
    settings: VerifierSettings,
    rng: Pcg64,
    deadline: Option<Instant>,
    checks: usize,
}

impl<'a, F: SolverFactory> SmtVerifier<'a, F> {
    pub fn new(
        factory: F,
        spec: &'a CertificateSpec,
        domains: &'a Domains,
        options: &CegisOptions,
    ) -> Self {
        Self {
            factory,
            spec,
            domains,
            n_vars: options.n_vars,
            settings: VerifierSettings::from(options),
            rng: Pcg64::seed_from_u64(options.seed ^ VERIFIER_SEED_SALT),
            deadline: None,
            checks: 0,
        }
    }

    /// Stop issuing checks once this instant has passed.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Satisfiability checks issued so far.
    pub fn checks(&self) -> usize {
        self.checks
    }

    /// The relaxed retry scales both tolerance and per-check time limit.
    fn check_settings(&self, relaxed: bool) -> CheckSettings {
        let (precision, timeout_secs) = if relaxed {
            (
                self.settings.precision * self.settings.relax_factor,
                scaled_secs(self.settings.solver_timeout_secs, self.settings.relax_factor),
            )
        } else {
            (self.settings.precision, self.settings.solver_timeout_secs)
        };
        CheckSettings {
            precision,
            timeout: check_timeout(timeout_secs, self.deadline),
            max_boxes: self.settings.max_boxes,
        }
    }

    /// Up to `limit` distinct solver models of `formula`, each excluded
    /// from later checks by a small box.
    fn solve_condition(
        &mut self,
        formula: &Predicate,
        settings: &CheckSettings,
        limit: usize,
    ) -> Result<Vec<Vec<f64>>, String> {
        let term = encode_predicate(formula);
        let mut solver = self
            .factory
            .create(settings, term.is_transcendental())
            .map_err(|e| e.to_string())?;
        declare_state(&mut solver, self.n_vars).map_err(|e| e.to_string())?;
        solver.assert(&term).map_err(|e| e.to_string())?;

        let names = state_vars(self.n_vars);
        let real = SmtSort::Real;
        let vars: Vec<(&str, &SmtSort)> = names.iter().map(|n| (n.as_str(), &real)).collect();
        let radius = self.settings.neighbour_radius.max(10.0 * settings.precision);

        let mut points = Vec::new();
        while points.len() < limit {
            if deadline_exceeded(self.deadline) {
                if points.is_empty() {
                    return Err("deadline reached".into());
                }
                break;
            }
            self.checks += 1;
            let (result, model) = solver
                .check_sat_with_model(&vars)
                .map_err(|e| e.to_string())?;
            match result {
                SatResult::Unsat => break,
                SatResult::Unknown(reason) => {
                    if points.is_empty() {
                        return Err(reason);
                    }
                    break;
                }
                SatResult::Sat => {
                    let point = model
                        .and_then(|m| m.point(&names))
                        .ok_or_else(|| format!("{} answered sat without a model", solver.name()))?;
                    let block = encode_predicate(&excluding_box(&point, radius));
                    solver.assert(&block).map_err(|e| e.to_string())?;
                    points.push(point);
                }
            }
        }
        Ok(points)
    }

    /// Random perturbations of `point` that stay in the domain and still
    /// break the condition.
    fn neighbours(
        &mut self,
        condition: &Condition,
        domain: &dyn Domain,
        candidate: &SymbolicCandidate,
        point: &[f64],
        count: usize,
    ) -> Vec<Vec<f64>> {
        let r = self.settings.neighbour_radius;
        if count == 0 || r <= 0.0 {
            return Vec::new();
        }
        let mut found = Vec::new();
        for _ in 0..count.saturating_mul(4) {
            if found.len() >= count {
                break;
            }
            let q: Vec<f64> = point
                .iter()
                .map(|x| x + self.rng.gen_range(-r..=r))
                .collect();
            if domain.contains(&q)
                && condition.is_violated(&q, candidate.value.eval(&q), candidate.derivative.eval(&q))
            {
                found.push(q);
            }
        }
        found
    }
}

/// Points outside the open box of half-width `radius` around `point`.
fn excluding_box(point: &[f64], radius: f64) -> Predicate {
    let mut sides = Vec::with_capacity(2 * point.len());
    for (i, p) in point.iter().enumerate() {
        if let (Some(lo), Some(hi)) = (Expr::from_f64(p - radius), Expr::from_f64(p + radius)) {
            sides.push(Predicate::lt(Expr::var(i), lo));
            sides.push(Predicate::gt(Expr::var(i), hi));
        }
    }
    if sides.is_empty() {
        Predicate::True
    } else {
        Predicate::or(sides)
    }
}

impl<F: SolverFactory> CandidateVerifier for SmtVerifier<'_, F> {
    fn verify(&mut self, candidate: &SymbolicCandidate, relaxed: bool) -> VerifyOutcome {
        let settings = self.check_settings(relaxed);
        let budget = self.settings.max_per_round;
        let mut found: Vec<Counterexample> = Vec::new();
        let spec = self.spec;

        for condition in spec.conditions() {
            if found.len() >= budget {
                debug!(condition = condition.name, "counterexample budget reached");
                break;
            }
            let Some(domain) = self.domains.get(condition.role).cloned() else {
                return VerifyOutcome::Inconclusive {
                    condition: condition.name,
                    reason: format!("no {} domain", condition.role),
                };
            };
            let formula = Predicate::and(vec![
                domain.bounds().predicate(),
                domain.membership(),
                condition.violation(&candidate.value, &candidate.derivative, self.n_vars),
            ]);
            let limit = self.settings.max_per_condition.min(budget - found.len());

            let points = match self.solve_condition(&formula, &settings, limit) {
                Ok(points) => points,
                Err(reason) if found.is_empty() => {
                    warn!(condition = condition.name, %reason, relaxed, "verification inconclusive");
                    return VerifyOutcome::Inconclusive {
                        condition: condition.name,
                        reason,
                    };
                }
                Err(reason) => {
                    // The candidate is already refuted; report what we have.
                    warn!(condition = condition.name, %reason, "check failed after counterexamples");
                    break;
                }
            };
            if points.is_empty() {
                debug!(condition = condition.name, "condition holds");
                continue;
            }
            debug!(condition = condition.name, count = points.len(), "condition violated");

            for point in points {
                let room = budget.saturating_sub(found.len() + 1);
                let extra = self.neighbours(
                    condition,
                    domain.as_ref(),
                    candidate,
                    &point,
                    self.settings.neighbours.min(room),
                );
                for p in std::iter::once(point).chain(extra) {
                    found.push(Counterexample {
                        point: p,
                        condition: condition.name,
                        role: condition.role,
                        iteration: 0,
                    });
                }
                if found.len() >= budget {
                    break;
                }
            }
        }

        if found.is_empty() {
            VerifyOutcome::Verified
        } else {
            VerifyOutcome::Counterexamples(found)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::CertificateKind;
    use crate::learner::{Candidate, FunctionFamily};
    use crate::translator::translate;
    use certus_ir::{DynamicalModel, Rectangle, Sphere, TimeDomain};

    fn lyapunov_options() -> CegisOptions {
        CegisOptions {
            counterexample_neighbours: 0,
            ..CegisOptions::default()
        }
    }

    fn decay() -> DynamicalModel {
        DynamicalModel::new("decay", vec![Expr::var(0).neg(), Expr::var(1).neg()]).unwrap()
    }

    fn operating() -> Domains {
        Domains::new().with(DomainRole::Operating, Sphere::new(vec![0.0, 0.0], 1.0).unwrap())
    }

    fn quadratic(params: Vec<f64>) -> SymbolicCandidate {
        let candidate = Candidate::new(
            FunctionFamily::Polynomial {
                min_degree: 2,
                max_degree: 2,
            },
            params,
        );
        translate(&candidate, &decay(), TimeDomain::Continuous).unwrap()
    }

    #[test]
    fn proper_lyapunov_function_is_verified_twice() {
        let options = lyapunov_options();
        let spec = CertificateSpec::new(&options);
        let domains = operating();
        let mut verifier = SmtVerifier::new(IntervalFactory, &spec, &domains, &options);
        let candidate = quadratic(vec![1.0, 0.0, 1.0]);
        assert_eq!(verifier.verify(&candidate, false), VerifyOutcome::Verified);
        assert_eq!(verifier.verify(&candidate, false), VerifyOutcome::Verified);
        assert_eq!(verifier.checks(), 4);
    }

    #[test]
    fn indefinite_candidate_yields_counterexamples() {
        let options = CegisOptions {
            max_counterexamples_per_condition: 3,
            ..lyapunov_options()
        };
        let spec = CertificateSpec::new(&options);
        let domains = operating();
        let mut verifier = SmtVerifier::new(IntervalFactory, &spec, &domains, &options);
        // x0^2 - x1^2 is negative along the x1 axis.
        let candidate = quadratic(vec![1.0, 0.0, -1.0]);
        let VerifyOutcome::Counterexamples(cexs) = verifier.verify(&candidate, false) else {
            panic!("expected counterexamples");
        };
        assert!(!cexs.is_empty() && cexs.len() <= 6);
        let positive: Vec<_> = cexs.iter().filter(|c| c.condition == "positive").collect();
        assert!(!positive.is_empty());
        for cex in positive {
            assert!(domains.get(DomainRole::Operating).unwrap().contains(&cex.point));
            assert!(candidate.value.eval(&cex.point) <= options.precision);
        }
    }

    #[test]
    fn neighbours_stay_in_domain_and_violate() {
        let options = CegisOptions {
            counterexample_neighbours: 10,
            neighbour_radius: 0.1,
            ..lyapunov_options()
        };
        let spec = CertificateSpec::new(&options);
        let domains = operating();
        let mut verifier = SmtVerifier::new(IntervalFactory, &spec, &domains, &options);
        let candidate = quadratic(vec![-1.0, 0.0, -1.0]);
        let VerifyOutcome::Counterexamples(cexs) = verifier.verify(&candidate, false) else {
            panic!("expected counterexamples");
        };
        assert!(cexs.len() > 1);
        let condition = &spec.conditions()[0];
        for cex in cexs.iter().filter(|c| c.condition == condition.name) {
            assert!(domains.get(DomainRole::Operating).unwrap().contains(&cex.point));
            let v = candidate.value.eval(&cex.point);
            let d = candidate.derivative.eval(&cex.point);
            assert!(condition.is_violated(&cex.point, v, d) || v <= options.precision);
        }
    }

    #[test]
    fn round_budget_caps_counterexamples() {
        let options = CegisOptions {
            max_counterexamples_per_round: 3,
            counterexample_neighbours: 20,
            neighbour_radius: 0.2,
            ..lyapunov_options()
        };
        let spec = CertificateSpec::new(&options);
        let domains = operating();
        let mut verifier = SmtVerifier::new(IntervalFactory, &spec, &domains, &options);
        let VerifyOutcome::Counterexamples(cexs) =
            verifier.verify(&quadratic(vec![-1.0, 0.0, -1.0]), false)
        else {
            panic!("expected counterexamples");
        };
        assert!(cexs.len() <= 3);
    }

    #[test]
    fn boundary_violation_is_reported() {
        // B = x0 - 1 is zero on the left face of the unsafe box, where it
        // must be strictly positive.
        let options = CegisOptions {
            certificate: CertificateKind::Barrier,
            counterexample_neighbours: 0,
            ..CegisOptions::default()
        };
        let spec = CertificateSpec::new(&options);
        let domains = Domains::new()
            .with(DomainRole::Operating, Rectangle::new(vec![-3.0, -3.0], vec![3.0, 3.0]).unwrap())
            .with(DomainRole::Initial, Rectangle::new(vec![-2.0, -1.0], vec![-1.0, 1.0]).unwrap())
            .with(DomainRole::Unsafe, Rectangle::new(vec![1.0, 0.0], vec![2.0, 1.0]).unwrap());
        let candidate = SymbolicCandidate {
            value: Expr::var(0).sub(Expr::one()),
            derivative: Expr::int(-1),
        };
        let mut verifier = SmtVerifier::new(IntervalFactory, &spec, &domains, &options);
        let VerifyOutcome::Counterexamples(cexs) = verifier.verify(&candidate, false) else {
            panic!("boundary point must not be accepted");
        };
        assert_eq!(cexs.len(), 1);
        assert_eq!(cexs[0].condition, "unsafe");
        assert_eq!(cexs[0].role, DomainRole::Unsafe);
        assert!((cexs[0].point[0] - 1.0).abs() <= options.precision);
    }

    #[test]
    fn exhausted_box_budget_is_inconclusive() {
        let options = CegisOptions {
            max_boxes: 1,
            ..lyapunov_options()
        };
        let spec = CertificateSpec::new(&options);
        let domains = operating();
        let mut verifier = SmtVerifier::new(IntervalFactory, &spec, &domains, &options);
        let outcome = verifier.verify(&quadratic(vec![1.0, 0.0, 1.0]), false);
        assert!(
            matches!(outcome, VerifyOutcome::Inconclusive { condition: "positive", .. }),
            "{outcome:?}"
        );
    }

    #[test]
    fn relaxed_check_widens_precision_and_time_limit() {
        let options = lyapunov_options();
        let spec = CertificateSpec::new(&options);
        let domains = operating();
        let verifier = SmtVerifier::new(IntervalFactory, &spec, &domains, &options);
        let strict = verifier.check_settings(false);
        let relaxed = verifier.check_settings(true);
        assert_eq!(relaxed.precision, strict.precision * options.relax_factor);
        assert_eq!(strict.timeout, Some(Duration::from_secs(options.solver_timeout_secs)));
        assert_eq!(relaxed.timeout, Some(Duration::from_secs(600)));
        // Backends that ignore precision still see a weaker query.
        assert_eq!(solver_timeout_secs(&strict), 60);
        assert_eq!(solver_timeout_secs(&relaxed), 600);
        assert_ne!(strict, relaxed);
    }

    #[test]
    fn relaxed_time_limit_respects_unlimited_and_deadline() {
        assert_eq!(scaled_secs(0, 10.0), 0);
        assert_eq!(scaled_secs(3, 1.5), 5);
        assert_eq!(scaled_secs(u64::MAX, 10.0), u64::MAX);
        let options = CegisOptions {
            solver_timeout_secs: 0,
            ..lyapunov_options()
        };
        let spec = CertificateSpec::new(&options);
        let domains = operating();
        let verifier = SmtVerifier::new(IntervalFactory, &spec, &domains, &options);
        assert_eq!(verifier.check_settings(true).timeout, None);
        assert_eq!(solver_timeout_secs(&verifier.check_settings(true)), 0);
        let soon = Instant::now() + Duration::from_secs(2);
        let verifier = SmtVerifier::new(IntervalFactory, &spec, &domains, &lyapunov_options())
            .with_deadline(Some(soon));
        let relaxed = verifier.check_settings(true);
        assert!(relaxed.timeout.is_some_and(|t| t <= Duration::from_secs(2)));
    }

    #[test]
    fn excluding_box_rejects_its_centre() {
        let block = excluding_box(&[0.5, -0.5], 0.1);
        assert!(!block.holds(&[0.5, -0.5]));
        assert!(!block.holds(&[0.55, -0.45]));
        assert!(block.holds(&[0.7, -0.5]));
    }
}
