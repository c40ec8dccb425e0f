//! Fitting candidate certificates to sample points.
//!
//! The loss is the sum over conditions of the mean hinge residual of the
//! condition's samples. Derivative conditions are differentiated through
//! the candidate: in continuous time the tangent along `f(x)` is carried
//! forward on the tape, in discrete time the candidate is evaluated a second
//! time at `f(x)`.

mod adam;
mod family;
mod tape;

use certus_ir::{DynamicalModel, TimeDomain};
use rand::SeedableRng;
use rand_pcg::Pcg64;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

use crate::certificate::{CertificateSpec, Condition, Requirement, Subject};
use crate::config::CegisOptions;
use crate::samples::SampleSet;

pub use family::{monomials, Activation, FunctionFamily, Layer};

use adam::Adam;
use tape::{Tape, Var};

/// Offset separating the learner's random stream from the sampler's.
const LEARNER_STREAM: u64 = 0x9e37_79b9_7f4a_7c15;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LearnerError {
    #[error("loss became non-finite at epoch {epoch}")]
    Diverged { epoch: usize },
}

/// A fitted function: family plus parameter values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    family: FunctionFamily,
    params: Vec<f64>,
    /// Loss of `params` on the samples it was fitted to.
    pub loss: f64,
    pub epochs: usize,
    /// Loss reached the configured threshold.
    pub converged: bool,
}

impl Candidate {
    /// A candidate with given parameters, e.g. one constructed by hand.
    pub fn new(family: FunctionFamily, params: Vec<f64>) -> Self {
        Self {
            family,
            params,
            loss: 0.0,
            epochs: 0,
            converged: true,
        }
    }

    pub fn family(&self) -> &FunctionFamily {
        &self.family
    }

    pub fn params(&self) -> &[f64] {
        &self.params
    }

    pub fn eval(&self, point: &[f64]) -> f64 {
        self.family.eval(&self.params, point)
    }

    /// Lie derivative along the model in continuous time, `V(f(x)) - V(x)`
    /// in discrete time.
    pub fn derivative_at(&self, model: &DynamicalModel, time: TimeDomain, point: &[f64]) -> f64 {
        let image = model.evaluate(point);
        match time {
            TimeDomain::Continuous => self.family.directional(&self.params, point, &image),
            TimeDomain::Discrete => self.eval(&image) - self.eval(point),
        }
    }
}

/// Produces candidates from samples. Implementations must not depend on
/// anything but their own state and the arguments, so that fixed seeds give
/// fixed candidates.
pub trait Learner {
    fn fit(
        &mut self,
        samples: &SampleSet,
        spec: &CertificateSpec,
        model: &DynamicalModel,
        previous: Option<&Candidate>,
    ) -> Result<Candidate, LearnerError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearnerSettings {
    pub learning_rate: f64,
    pub max_epochs: usize,
    pub loss_threshold: f64,
    pub margin: f64,
}

impl From<&CegisOptions> for LearnerSettings {
    fn from(options: &CegisOptions) -> Self {
        Self {
            learning_rate: options.learning_rate,
            max_epochs: options.max_epochs,
            loss_threshold: options.loss_threshold,
            margin: options.margin,
        }
    }
}

/// Gradient-trained learner over a [`FunctionFamily`].
#[derive(Debug, Clone)]
pub struct NeuralLearner {
    family: FunctionFamily,
    settings: LearnerSettings,
    rng: Pcg64,
}

/// One condition's samples with everything that does not depend on the
/// parameters precomputed.
struct Batch<'a> {
    condition: &'a Condition,
    points: &'a [Vec<f64>],
    /// `f(x)`: tangent directions in continuous time, successors in discrete time.
    images: Option<Vec<Vec<f64>>>,
    margins: Vec<f64>,
}

impl NeuralLearner {
    pub fn new(options: &CegisOptions) -> Self {
        Self {
            family: options.family.clone(),
            settings: LearnerSettings::from(options),
            rng: Pcg64::seed_from_u64(options.seed ^ LEARNER_STREAM),
        }
    }

    pub fn family(&self) -> &FunctionFamily {
        &self.family
    }

    fn loss_and_gradient(
        &self,
        params: &[f64],
        batches: &[Batch<'_>],
        time: TimeDomain,
    ) -> (f64, Vec<f64>) {
        let mut tape = Tape::new();
        let vars: Vec<Var> = params.iter().map(|p| tape.scalar(*p)).collect();
        let mut terms = Vec::with_capacity(batches.len());

        for batch in batches {
            let condition = batch.condition;
            let needs_tangent =
                condition.subject == Subject::Derivative && time == TimeDomain::Continuous;
            let forward = self.family.forward(
                &mut tape,
                &vars,
                batch.points,
                if needs_tangent {
                    batch.images.as_deref()
                } else {
                    None
                },
            );
            let subject = match (condition.subject, time) {
                (Subject::Value, _) => forward.value,
                (Subject::Derivative, TimeDomain::Continuous) => match forward.tangent {
                    Some(t) => t,
                    None => continue,
                },
                (Subject::Derivative, TimeDomain::Discrete) => {
                    let Some(images) = batch.images.as_deref() else {
                        continue;
                    };
                    let next = self.family.forward(&mut tape, &vars, images, None);
                    tape.sub(next.value, forward.value)
                }
            };

            let values = tape.value(forward.value);
            let mask: Vec<f64> = batch
                .points
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let v = if values.len() == 1 { values[0] } else { values[i] };
                    if condition.trains_on(p, v) {
                        1.0
                    } else {
                        0.0
                    }
                })
                .collect();
            let active: f64 = mask.iter().sum();
            if active == 0.0 {
                continue;
            }

            let margin = tape.leaf(batch.margins.clone());
            let raw = match condition.requirement {
                Requirement::Positive => tape.sub(margin, subject),
                Requirement::NonPositive | Requirement::Negative => tape.add(subject, margin),
            };
            let hinge = tape.relu(raw);
            let mask = tape.leaf(mask);
            let masked = tape.mul(hinge, mask);
            let total = tape.reduce(masked);
            terms.push(tape.scale(total, 1.0 / active));
        }

        let loss = tape.sum(&terms);
        let value = tape.value(loss)[0];
        (value, tape.gradient_wrt(loss, &vars))
    }
}

impl Learner for NeuralLearner {
    fn fit(
        &mut self,
        samples: &SampleSet,
        spec: &CertificateSpec,
        model: &DynamicalModel,
        previous: Option<&Candidate>,
    ) -> Result<Candidate, LearnerError> {
        let n_vars = model.n_vars();
        let n_params = self.family.parameter_count(n_vars);
        let mut params = match previous {
            Some(c) if c.family == self.family && c.params.len() == n_params => c.params.clone(),
            _ => self.family.initial_parameters(n_vars, &mut self.rng),
        };

        let time = spec.time_domain();
        let batches: Vec<Batch<'_>> = spec
            .conditions()
            .iter()
            .filter_map(|condition| {
                let points = samples.get(condition.role);
                if points.is_empty() {
                    return None;
                }
                let images = (condition.subject == Subject::Derivative)
                    .then(|| points.iter().map(|p| model.evaluate(p)).collect());
                let margins = points
                    .iter()
                    .map(|p| condition.margin_at(p, self.settings.margin))
                    .collect();
                Some(Batch {
                    condition,
                    points,
                    images,
                    margins,
                })
            })
            .collect();

        let mut adam = Adam::new(n_params, self.settings.learning_rate);
        let mut best_loss = f64::INFINITY;
        let mut best_params = params.clone();
        let mut epochs = 0;
        let mut converged = false;

        for epoch in 0..self.settings.max_epochs {
            let (loss, grads) = self.loss_and_gradient(&params, &batches, time);
            epochs = epoch + 1;
            if !loss.is_finite() || grads.iter().any(|g| !g.is_finite()) {
                return Err(LearnerError::Diverged { epoch });
            }
            if loss < best_loss {
                best_loss = loss;
                best_params.clone_from(&params);
            }
            if loss <= self.settings.loss_threshold {
                converged = true;
                break;
            }
            if epoch % 100 == 0 {
                trace!(epoch, loss, "learner epoch");
            }
            adam.step(&mut params, &grads);
            if params.iter().any(|p| !p.is_finite()) {
                return Err(LearnerError::Diverged { epoch });
            }
        }

        debug!(loss = best_loss, epochs, converged, "learner finished");
        Ok(Candidate {
            family: self.family.clone(),
            params: best_params,
            loss: best_loss,
            epochs,
            converged,
        })
    }
}
