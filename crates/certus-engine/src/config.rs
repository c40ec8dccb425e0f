//! Run configuration.
//!
//! [`CegisOptions`] is the plain, deserializable option set; it only becomes
//! usable by the loop after [`CegisConfig::new`] has validated it.

use std::fmt;
use std::str::FromStr;

use certus_ir::{DomainError, DomainRole, TimeDomain};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::certificate::CertificateKind;
use crate::learner::FunctionFamily;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("certificate {kind} requires a domain for role {role}")]
    MissingDomain {
        kind: CertificateKind,
        role: DomainRole,
    },
    #[error("model has {found} variables, configuration expects {expected}")]
    ModelArity { expected: usize, found: usize },
    #[error("invalid value for `{option}`: {reason}")]
    InvalidOption { option: &'static str, reason: String },
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("could not parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Which decision procedure discharges the verification conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendChoice {
    /// Interval branch-and-prune (δ-complete, supports transcendental terms).
    #[default]
    Interval,
    /// Z3 nonlinear real arithmetic.
    Z3,
    /// cvc5 as a child process.
    Cvc5,
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendChoice::Interval => "interval",
            BackendChoice::Z3 => "z3",
            BackendChoice::Cvc5 => "cvc5",
        })
    }
}

impl FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "interval" => Ok(BackendChoice::Interval),
            "z3" => Ok(BackendChoice::Z3),
            "cvc5" => Ok(BackendChoice::Cvc5),
            other => Err(format!(
                "unknown backend '{other}' (expected interval, z3 or cvc5)"
            )),
        }
    }
}

/// Every tunable of a synthesis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CegisOptions {
    pub n_vars: usize,
    pub certificate: CertificateKind,
    pub time_domain: TimeDomain,
    pub backend: BackendChoice,
    pub family: FunctionFamily,
    pub max_iters: usize,
    pub seed: u64,
    /// Points drawn from every required domain before the first iteration.
    pub batch_size: usize,
    /// Train the barrier derivative condition on `|B| <= w` only, not `B >= -w`.
    /// The verified belt is `|B| <= w` either way.
    pub symmetric_belt: bool,
    pub belt_width: f64,
    /// Lyapunov conditions are only required outside this ball around the origin.
    pub inner_radius: f64,
    pub learning_rate: f64,
    pub max_epochs: usize,
    pub loss_threshold: f64,
    pub margin: f64,
    /// Interval backend box width below which an undecided box counts as δ-sat.
    pub precision: f64,
    /// Factor applied to `precision` for the single retry after an inconclusive check.
    pub relax_factor: f64,
    pub max_boxes: usize,
    pub max_counterexamples_per_condition: usize,
    pub max_counterexamples_per_round: usize,
    pub counterexample_neighbours: usize,
    pub neighbour_radius: f64,
    pub dedup_tolerance: f64,
    pub solver_timeout_secs: u64,
    /// Wall-clock budget for the whole run; 0 disables it.
    pub timeout_secs: u64,
}

impl Default for CegisOptions {
    fn default() -> Self {
        Self {
            n_vars: 2,
            certificate: CertificateKind::Lyapunov,
            time_domain: TimeDomain::Continuous,
            backend: BackendChoice::Interval,
            family: FunctionFamily::Polynomial {
                min_degree: 2,
                max_degree: 2,
            },
            max_iters: 10,
            seed: 167,
            batch_size: 500,
            symmetric_belt: false,
            belt_width: 0.1,
            inner_radius: 0.01,
            learning_rate: 0.05,
            max_epochs: 500,
            loss_threshold: 0.0,
            margin: 0.1,
            precision: 1e-3,
            relax_factor: 10.0,
            max_boxes: 2_000_000,
            max_counterexamples_per_condition: 1,
            max_counterexamples_per_round: 100,
            counterexample_neighbours: 20,
            neighbour_radius: 0.05,
            dedup_tolerance: 1e-6,
            solver_timeout_secs: 60,
            timeout_secs: 0,
        }
    }
}

impl CegisOptions {
    /// Parse a JSON document; absent fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Validated, immutable configuration passed into [`crate::solve`].
#[derive(Debug, Clone, PartialEq)]
pub struct CegisConfig {
    options: CegisOptions,
}

fn invalid(option: &'static str, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidOption {
        option,
        reason: reason.into(),
    }
}

fn positive(option: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(option, format!("must be a positive number, got {value}")))
    }
}

fn non_negative(option: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(option, format!("must be a non-negative number, got {value}")))
    }
}

fn at_least_one(option: &'static str, value: usize) -> Result<(), ConfigurationError> {
    if value >= 1 {
        Ok(())
    } else {
        Err(invalid(option, "must be at least 1"))
    }
}

impl CegisConfig {
    pub fn new(options: CegisOptions) -> Result<Self, ConfigurationError> {
        at_least_one("n_vars", options.n_vars)?;
        at_least_one("max_iters", options.max_iters)?;
        at_least_one("batch_size", options.batch_size)?;
        at_least_one("max_epochs", options.max_epochs)?;
        at_least_one("max_boxes", options.max_boxes)?;
        at_least_one(
            "max_counterexamples_per_condition",
            options.max_counterexamples_per_condition,
        )?;
        at_least_one(
            "max_counterexamples_per_round",
            options.max_counterexamples_per_round,
        )?;
        positive("belt_width", options.belt_width)?;
        positive("learning_rate", options.learning_rate)?;
        positive("precision", options.precision)?;
        non_negative("loss_threshold", options.loss_threshold)?;
        non_negative("margin", options.margin)?;
        non_negative("neighbour_radius", options.neighbour_radius)?;
        non_negative("dedup_tolerance", options.dedup_tolerance)?;
        non_negative("inner_radius", options.inner_radius)?;
        if !(options.relax_factor.is_finite() && options.relax_factor >= 1.0) {
            return Err(invalid("relax_factor", "must be a finite number >= 1"));
        }
        if options.certificate == CertificateKind::Lyapunov && options.inner_radius <= 0.0 {
            // V(0) = 0 for every candidate without a constant term.
            return Err(invalid(
                "inner_radius",
                "Lyapunov certificates need a positive inner radius",
            ));
        }
        options
            .family
            .validate()
            .map_err(|reason| invalid("family", reason))?;
        if options.backend == BackendChoice::Z3 && !cfg!(feature = "z3") {
            return Err(invalid("backend", "this build has no Z3 support"));
        }
        Ok(Self { options })
    }

    pub fn options(&self) -> &CegisOptions {
        &self.options
    }

    /// Copy with a different seed, for repeated trials.
    pub fn with_seed(&self, seed: u64) -> Self {
        let mut options = self.options.clone();
        options.seed = seed;
        Self { options }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::{Activation, Layer};

    #[test]
    fn defaults_validate() {
        let config = CegisConfig::new(CegisOptions::default()).unwrap();
        assert_eq!(config.options().max_iters, 10);
        assert_eq!(config.options().seed, 167);
        assert_eq!(config.options().backend, BackendChoice::Interval);
    }

    #[test]
    fn zero_iterations_rejected() {
        let options = CegisOptions {
            max_iters: 0,
            ..CegisOptions::default()
        };
        let err = CegisConfig::new(options).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::InvalidOption {
                option: "max_iters",
                ..
            }
        ));
    }

    #[test]
    fn lyapunov_needs_inner_radius() {
        let options = CegisOptions {
            inner_radius: 0.0,
            ..CegisOptions::default()
        };
        assert!(CegisConfig::new(options).is_err());

        let barrier = CegisOptions {
            certificate: CertificateKind::Barrier,
            inner_radius: 0.0,
            ..CegisOptions::default()
        };
        assert!(CegisConfig::new(barrier).is_ok());
    }

    #[test]
    fn nan_rate_rejected() {
        let options = CegisOptions {
            learning_rate: f64::NAN,
            ..CegisOptions::default()
        };
        assert!(CegisConfig::new(options).is_err());
    }

    #[test]
    fn empty_network_rejected() {
        let options = CegisOptions {
            family: FunctionFamily::Network {
                layers: vec![],
                bias: false,
                last_layer_ones: false,
            },
            ..CegisOptions::default()
        };
        let err = CegisConfig::new(options).unwrap_err();
        assert!(err.to_string().contains("family"));
    }

    #[test]
    fn json_overrides_defaults() {
        let options = CegisOptions::from_json(
            r#"{
                "certificate": "barrier",
                "max_iters": 3,
                "family": {
                    "type": "network",
                    "layers": [{ "width": 5, "activation": "sigmoid" }]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(options.certificate, CertificateKind::Barrier);
        assert_eq!(options.max_iters, 3);
        assert_eq!(options.batch_size, 500);
        assert_eq!(
            options.family,
            FunctionFamily::Network {
                layers: vec![Layer {
                    width: 5,
                    activation: Activation::Sigmoid
                }],
                bias: true,
                last_layer_ones: false,
            }
        );
    }

    #[test]
    fn json_rejects_unknown_fields() {
        let err = CegisOptions::from_json(r#"{ "max_iter": 3 }"#).unwrap_err();
        assert!(matches!(err, ConfigurationError::Parse(_)));
    }

    #[test]
    fn backend_names_round_trip() {
        for backend in [BackendChoice::Interval, BackendChoice::Z3, BackendChoice::Cvc5] {
            assert_eq!(backend.to_string().parse::<BackendChoice>(), Ok(backend));
        }
        assert!("dreal".parse::<BackendChoice>().is_err());
    }
}
