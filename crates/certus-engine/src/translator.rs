//! Fitted parameters → exact symbolic candidate.

use certus_ir::{DynamicalModel, Expr, TimeDomain};
use serde::Serialize;
use thiserror::Error;

use crate::learner::{monomials, Activation, Candidate, FunctionFamily};
use crate::samples::SampleSet;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranslateError {
    #[error("function family uses activation {activation:?}, which has no closed form")]
    UnsupportedFunctionFamily { activation: Activation },
    #[error("parameter {index} is not finite")]
    NonFiniteParameter { index: usize },
    #[error("family expects {expected} parameters, candidate has {found}")]
    ParameterCount { expected: usize, found: usize },
}

/// Candidate and its derivative as exact expressions over `x0 … x{n-1}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolicCandidate {
    pub value: Expr,
    /// Lie derivative (continuous time) or `V(f(x)) - V(x)` (discrete time).
    pub derivative: Expr,
}

/// Worst numeric/symbolic disagreement found on the samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mismatch {
    pub point: Vec<f64>,
    pub numeric: f64,
    pub symbolic: f64,
}

pub const AGREEMENT_TOLERANCE: f64 = 1e-6;

fn weight(params: &[f64], index: usize) -> Result<Expr, TranslateError> {
    params
        .get(index)
        .and_then(|w| Expr::from_f64(*w))
        .ok_or(TranslateError::NonFiniteParameter { index })
}

fn activate(activation: Activation, z: Expr) -> Result<Expr, TranslateError> {
    Ok(match activation {
        Activation::Linear => z,
        Activation::Square => z.pow(2),
        Activation::Poly2 => z.clone().add(z.pow(2)),
        Activation::Sigmoid => Expr::one().div(Expr::one().add(z.neg().exp())),
        Activation::Tanh => z.tanh(),
        Activation::Softplus => Expr::one().add(z.exp()).log(),
        Activation::Cosh => {
            z.clone()
                .exp()
                .add(z.neg().exp())
                .mul(Expr::half())
                .sub(Expr::one())
        }
        Activation::Relu | Activation::ReluSquare => {
            return Err(TranslateError::UnsupportedFunctionFamily { activation })
        }
    })
}

fn monomial(exponents: &[u32]) -> Expr {
    exponents
        .iter()
        .enumerate()
        .fold(Expr::one(), |acc, (i, &e)| acc.mul(Expr::var(i).pow(e)))
}

/// Closed form of the candidate's value.
pub fn translate_value(candidate: &Candidate, n_vars: usize) -> Result<Expr, TranslateError> {
    let family = candidate.family();
    if let Some(activation) = family.unsupported_activation() {
        return Err(TranslateError::UnsupportedFunctionFamily { activation });
    }
    let params = candidate.params();
    let expected = family.parameter_count(n_vars);
    if params.len() != expected {
        return Err(TranslateError::ParameterCount {
            expected,
            found: params.len(),
        });
    }

    match family {
        FunctionFamily::Polynomial {
            min_degree,
            max_degree,
        } => {
            let mut terms = Vec::new();
            for (k, exponents) in monomials(n_vars, *min_degree, *max_degree).iter().enumerate() {
                terms.push(weight(params, k)?.mul(monomial(exponents)));
            }
            Ok(Expr::sum(terms))
        }
        FunctionFamily::Network {
            layers,
            bias,
            last_layer_ones,
        } => {
            let mut h: Vec<Expr> = (0..n_vars).map(Expr::var).collect();
            let mut cursor = 0;
            for layer in layers {
                let inputs = h.len();
                let mut next = Vec::with_capacity(layer.width);
                for j in 0..layer.width {
                    let mut terms = Vec::with_capacity(inputs + 1);
                    for (i, x) in h.iter().enumerate() {
                        terms.push(weight(params, cursor + j * inputs + i)?.mul(x.clone()));
                    }
                    if *bias {
                        terms.push(weight(params, cursor + layer.width * inputs + j)?);
                    }
                    next.push(activate(layer.activation, Expr::sum(terms))?);
                }
                cursor += layer.width * inputs;
                if *bias {
                    cursor += layer.width;
                }
                h = next;
            }
            if *last_layer_ones {
                return Ok(Expr::sum(h));
            }
            let mut terms = Vec::with_capacity(h.len());
            for (k, x) in h.into_iter().enumerate() {
                terms.push(weight(params, cursor + k)?.mul(x));
            }
            Ok(Expr::sum(terms))
        }
    }
}

/// Translate the candidate and derive its change along the model.
///
/// Fails before any solver is involved when the family has no closed form.
pub fn translate(
    candidate: &Candidate,
    model: &DynamicalModel,
    time: TimeDomain,
) -> Result<SymbolicCandidate, TranslateError> {
    let value = translate_value(candidate, model.n_vars())?;
    let derivative = match time {
        TimeDomain::Continuous => value.lie_derivative(model.field()),
        TimeDomain::Discrete => value.substitute(model.field()).sub(value.clone()),
    };
    Ok(SymbolicCandidate { value, derivative })
}

fn agrees(numeric: f64, symbolic: f64) -> bool {
    (numeric - symbolic).abs() <= AGREEMENT_TOLERANCE * numeric.abs().max(1.0)
}

/// Compare numeric and symbolic values on every sample.
pub fn check_agreement(
    candidate: &Candidate,
    symbolic: &SymbolicCandidate,
    samples: &SampleSet,
) -> Result<(), Mismatch> {
    for role in samples.roles() {
        for point in samples.get(role) {
            let numeric = candidate.eval(point);
            let exact = symbolic.value.eval(point);
            if !agrees(numeric, exact) {
                return Err(Mismatch {
                    point: point.clone(),
                    numeric,
                    symbolic: exact,
                });
            }
        }
    }
    Ok(())
}
