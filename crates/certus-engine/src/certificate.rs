//! Certificate kinds and the conditions a candidate must satisfy.
//!
//! Every [`Condition`] is usable two ways: numerically at a sample point
//! (for the learner's loss) and symbolically as a violation predicate (for
//! the verifier). Region boundaries are inclusive in both views, so a point
//! exactly on a boundary that breaks the requirement counts as a violation.

use std::fmt;

use certus_ir::{DomainRole, Domains, Expr, Predicate, TimeDomain};
use serde::{Deserialize, Serialize};

use crate::config::{CegisOptions, ConfigurationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateKind {
    /// Stability: `V > 0` and `dV < 0` on the operating region.
    #[default]
    Lyapunov,
    /// Safety: `B <= 0` on initial states, `B > 0` on unsafe states and
    /// `dB < 0` on a belt around the zero level set.
    Barrier,
    /// Safety with the derivative condition required on the whole operating region.
    BarrierAlt,
}

impl CertificateKind {
    pub fn required_roles(self) -> &'static [DomainRole] {
        match self {
            CertificateKind::Lyapunov => &[DomainRole::Operating],
            CertificateKind::Barrier | CertificateKind::BarrierAlt => {
                &[DomainRole::Operating, DomainRole::Initial, DomainRole::Unsafe]
            }
        }
    }
}

impl fmt::Display for CertificateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CertificateKind::Lyapunov => "lyapunov",
            CertificateKind::Barrier => "barrier",
            CertificateKind::BarrierAlt => "barrier_alt",
        })
    }
}

/// What a condition constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    /// The certificate itself.
    Value,
    /// Lie derivative (continuous time) or one-step difference (discrete time).
    Derivative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    /// `> 0`
    Positive,
    /// `<= 0`
    NonPositive,
    /// `< 0`
    Negative,
}

impl Requirement {
    pub fn holds(self, value: f64) -> bool {
        match self {
            Requirement::Positive => value > 0.0,
            Requirement::NonPositive => value <= 0.0,
            Requirement::Negative => value < 0.0,
        }
    }

    /// `subject` breaks the requirement.
    fn violated_by(self, subject: Expr) -> Predicate {
        match self {
            Requirement::Positive => Predicate::le(subject, Expr::zero()),
            Requirement::NonPositive => Predicate::gt(subject, Expr::zero()),
            Requirement::Negative => Predicate::ge(subject, Expr::zero()),
        }
    }
}

/// Part of the domain a condition is required on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Whole,
    /// `|x| >= radius`.
    OutsideBall { radius: f64 },
    /// `-width <= B <= width`. `symmetric` only shapes the learner's mask;
    /// without it training also covers `B > width`.
    Belt { width: f64, symmetric: bool },
}

impl Region {
    /// Exact membership, shared with the verifier's predicate.
    pub fn contains(&self, point: &[f64], value: f64) -> bool {
        match *self {
            Region::Whole => true,
            Region::OutsideBall { radius } => {
                point.iter().map(|x| x * x).sum::<f64>() >= radius * radius
            }
            Region::Belt { width, .. } => value >= -width && value <= width,
        }
    }

    /// Membership used for the learner's loss mask.
    pub fn trains_on(&self, point: &[f64], value: f64) -> bool {
        match *self {
            Region::Belt {
                width,
                symmetric: false,
            } => value >= -width,
            _ => self.contains(point, value),
        }
    }

    fn predicate(&self, value: &Expr, n_vars: usize) -> Predicate {
        match *self {
            Region::Whole => Predicate::True,
            Region::OutsideBall { radius } => match Expr::from_f64(radius * radius) {
                Some(r2) => Predicate::ge(Expr::squared_norm(n_vars), r2),
                None => Predicate::True,
            },
            Region::Belt { width, .. } => {
                let Some(w) = Expr::from_f64(width) else {
                    return Predicate::True;
                };
                Predicate::and(vec![
                    Predicate::ge(value.clone(), w.clone().neg()),
                    Predicate::le(value.clone(), w),
                ])
            }
        }
    }
}

/// How the learner's margin scales with the sample point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginScale {
    Constant,
    /// `margin * |x|^2`, so the requirement vanishes smoothly at the equilibrium.
    SquaredNorm,
}

/// One inequality a candidate must satisfy on one domain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    pub name: &'static str,
    pub role: DomainRole,
    pub subject: Subject,
    pub requirement: Requirement,
    pub region: Region,
    pub scale: MarginScale,
}

impl Condition {
    pub fn subject_of(&self, value: f64, derivative: f64) -> f64 {
        match self.subject {
            Subject::Value => value,
            Subject::Derivative => derivative,
        }
    }

    /// The point is in the part of the domain this condition covers.
    pub fn applies(&self, point: &[f64], value: f64) -> bool {
        self.region.contains(point, value)
    }

    /// The learner penalises the point under this condition.
    pub fn trains_on(&self, point: &[f64], value: f64) -> bool {
        self.region.trains_on(point, value)
    }

    pub fn margin_at(&self, point: &[f64], margin: f64) -> f64 {
        match self.scale {
            MarginScale::Constant => margin,
            MarginScale::SquaredNorm => margin * point.iter().map(|x| x * x).sum::<f64>(),
        }
    }

    /// Hinge residual at a point: zero when the requirement holds with the
    /// margin to spare, positive otherwise.
    pub fn residual(&self, point: &[f64], value: f64, derivative: f64, margin: f64) -> f64 {
        if !self.trains_on(point, value) {
            return 0.0;
        }
        let subject = self.subject_of(value, derivative);
        let m = self.margin_at(point, margin);
        match self.requirement {
            Requirement::Positive => (m - subject).max(0.0),
            Requirement::NonPositive | Requirement::Negative => (subject + m).max(0.0),
        }
    }

    /// Exact check without margin; domain membership is the caller's concern.
    pub fn is_violated(&self, point: &[f64], value: f64, derivative: f64) -> bool {
        self.applies(point, value)
            && !self.requirement.holds(self.subject_of(value, derivative))
    }

    /// Predicate satisfied exactly by the points of the region that break
    /// the requirement.
    pub fn violation(&self, value: &Expr, derivative: &Expr, n_vars: usize) -> Predicate {
        let subject = match self.subject {
            Subject::Value => value.clone(),
            Subject::Derivative => derivative.clone(),
        };
        match self.region.predicate(value, n_vars) {
            Predicate::True => self.requirement.violated_by(subject),
            region => Predicate::and(vec![region, self.requirement.violated_by(subject)]),
        }
    }
}

/// Ordered conditions for one certificate kind. Order is verification order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CertificateSpec {
    kind: CertificateKind,
    time_domain: TimeDomain,
    conditions: Vec<Condition>,
}

impl CertificateSpec {
    pub fn new(options: &CegisOptions) -> Self {
        let conditions = match options.certificate {
            CertificateKind::Lyapunov => {
                let region = Region::OutsideBall {
                    radius: options.inner_radius,
                };
                vec![
                    Condition {
                        name: "positive",
                        role: DomainRole::Operating,
                        subject: Subject::Value,
                        requirement: Requirement::Positive,
                        region,
                        scale: MarginScale::SquaredNorm,
                    },
                    Condition {
                        name: "decrease",
                        role: DomainRole::Operating,
                        subject: Subject::Derivative,
                        requirement: Requirement::Negative,
                        region,
                        scale: MarginScale::SquaredNorm,
                    },
                ]
            }
            CertificateKind::Barrier | CertificateKind::BarrierAlt => {
                let belt = if options.certificate == CertificateKind::Barrier {
                    Region::Belt {
                        width: options.belt_width,
                        symmetric: options.symmetric_belt,
                    }
                } else {
                    Region::Whole
                };
                vec![
                    Condition {
                        name: "initial",
                        role: DomainRole::Initial,
                        subject: Subject::Value,
                        requirement: Requirement::NonPositive,
                        region: Region::Whole,
                        scale: MarginScale::Constant,
                    },
                    Condition {
                        name: "unsafe",
                        role: DomainRole::Unsafe,
                        subject: Subject::Value,
                        requirement: Requirement::Positive,
                        region: Region::Whole,
                        scale: MarginScale::Constant,
                    },
                    Condition {
                        name: "belt",
                        role: DomainRole::Operating,
                        subject: Subject::Derivative,
                        requirement: Requirement::Negative,
                        region: belt,
                        scale: MarginScale::Constant,
                    },
                ]
            }
        };
        Self {
            kind: options.certificate,
            time_domain: options.time_domain,
            conditions,
        }
    }

    /// Build the spec and check that every role it needs has a domain.
    pub fn for_domains(
        options: &CegisOptions,
        domains: &Domains,
    ) -> Result<Self, ConfigurationError> {
        let spec = Self::new(options);
        for &role in spec.kind.required_roles() {
            if !domains.contains_role(role) {
                return Err(ConfigurationError::MissingDomain {
                    kind: spec.kind,
                    role,
                });
            }
        }
        Ok(spec)
    }

    pub fn kind(&self) -> CertificateKind {
        self.kind
    }

    pub fn time_domain(&self) -> TimeDomain {
        self.time_domain
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn required_roles(&self) -> &'static [DomainRole] {
        self.kind.required_roles()
    }

    /// Some condition constrains the derivative.
    pub fn needs_derivative(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.subject == Subject::Derivative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certus_ir::{Rectangle, Sphere};

    fn barrier_options(symmetric: bool) -> CegisOptions {
        CegisOptions {
            certificate: CertificateKind::Barrier,
            symmetric_belt: symmetric,
            belt_width: 0.5,
            ..CegisOptions::default()
        }
    }

    #[test]
    fn lyapunov_has_two_conditions_on_operating_region() {
        let spec = CertificateSpec::new(&CegisOptions::default());
        let names: Vec<_> = spec.conditions().iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["positive", "decrease"]);
        assert!(spec
            .conditions()
            .iter()
            .all(|c| c.role == DomainRole::Operating));
    }

    #[test]
    fn barrier_conditions_follow_role_order() {
        let spec = CertificateSpec::new(&barrier_options(false));
        let roles: Vec<_> = spec.conditions().iter().map(|c| c.role).collect();
        assert_eq!(
            roles,
            vec![DomainRole::Initial, DomainRole::Unsafe, DomainRole::Operating]
        );
    }

    #[test]
    fn missing_role_is_configuration_error() {
        let domains = Domains::new().with(
            DomainRole::Operating,
            Rectangle::new(vec![-1.0, -1.0], vec![1.0, 1.0]).unwrap(),
        );
        let err = CertificateSpec::for_domains(&barrier_options(false), &domains).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::MissingDomain {
                role: DomainRole::Initial,
                ..
            }
        ));
    }

    #[test]
    fn lyapunov_ignores_points_inside_inner_ball() {
        let spec = CertificateSpec::new(&CegisOptions::default());
        let positive = &spec.conditions()[0];
        assert!(!positive.is_violated(&[0.001, 0.0], -1.0, 0.0));
        assert!(positive.is_violated(&[0.5, 0.0], -1.0, 0.0));
        // Exactly on the ball boundary the condition is required.
        assert!(positive.is_violated(&[0.01, 0.0], 0.0, 0.0));
    }

    #[test]
    fn belt_shapes() {
        let asym = CertificateSpec::new(&barrier_options(false));
        let sym = CertificateSpec::new(&barrier_options(true));
        let asym_belt = &asym.conditions()[2];
        let sym_belt = &sym.conditions()[2];
        // Training mask.
        assert!(asym_belt.trains_on(&[0.0, 0.0], 10.0));
        assert!(!sym_belt.trains_on(&[0.0, 0.0], 10.0));
        assert!(sym_belt.trains_on(&[0.0, 0.0], 0.5));
        assert!(!asym_belt.trains_on(&[0.0, 0.0], -0.6));
        // Checked region is |B| <= w either way.
        for belt in [asym_belt, sym_belt] {
            assert!(!belt.applies(&[0.0, 0.0], 10.0));
            assert!(belt.applies(&[0.0, 0.0], 0.5));
            assert!(belt.applies(&[0.0, 0.0], -0.5));
            assert!(!belt.applies(&[0.0, 0.0], -0.6));
        }
        assert!(!asym_belt.is_violated(&[0.0, 0.0], 10.0, 1.0));
        assert!(asym_belt.residual(&[0.0, 0.0], 10.0, 1.0, 0.1) > 0.0);
    }

    #[test]
    fn belt_flag_does_not_change_the_violation_predicate() {
        let value = Expr::var(0);
        let derivative = Expr::one();
        let asym = CertificateSpec::new(&barrier_options(false)).conditions()[2]
            .violation(&value, &derivative, 2);
        let sym = CertificateSpec::new(&barrier_options(true)).conditions()[2]
            .violation(&value, &derivative, 2);
        assert_eq!(asym, sym);
        assert!(asym.holds(&[0.5, 0.0]));
        assert!(!asym.holds(&[3.0, 0.0]));
    }

    #[test]
    fn residual_includes_margin() {
        let spec = CertificateSpec::new(&barrier_options(false));
        let initial = &spec.conditions()[0];
        assert_eq!(initial.residual(&[0.0, 0.0], -1.0, 0.0, 0.1), 0.0);
        assert!((initial.residual(&[0.0, 0.0], -0.05, 0.0, 0.1) - 0.05).abs() < 1e-12);
        let unsafe_cond = &spec.conditions()[1];
        assert!((unsafe_cond.residual(&[0.0, 0.0], 0.0, 0.0, 0.1) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn violation_predicate_agrees_with_numeric_check() {
        for symmetric in [true, false] {
            check_violation_agreement(&CertificateSpec::new(&barrier_options(symmetric)));
        }
    }

    fn check_violation_agreement(spec: &CertificateSpec) {
        let value = Expr::var(0).sub(Expr::var(1));
        let derivative = Expr::var(0).mul(Expr::var(1));
        let region = Sphere::new(vec![0.0, 0.0], 2.0).unwrap();
        let points = [
            [0.0, 0.0],
            [0.3, 0.1],
            [-0.2, 0.25],
            [1.0, -1.0],
            [0.5, 0.0],
            [-0.5, 0.5],
        ];
        for condition in spec.conditions() {
            let predicate = condition.violation(&value, &derivative, 2);
            for p in points {
                let numeric = condition.is_violated(&p, value.eval(&p), derivative.eval(&p));
                assert_eq!(
                    predicate.holds(&p),
                    numeric,
                    "{} at {p:?} (in region: {})",
                    condition.name,
                    certus_ir::Domain::contains(&region, &p)
                );
            }
        }
    }
}
