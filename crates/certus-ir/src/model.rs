//! Dynamical models: a vector field `f(x)` over `n` state variables.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::expr::Expr;

/// Whether the model is a flow (`dx/dt = f(x)`) or a map (`x' = f(x)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeDomain {
    #[default]
    Continuous,
    Discrete,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("model `{0}` has an empty vector field")]
    EmptyField(String),
    #[error("component {component} of model `{model}` references x{var}, but the model has {n_vars} variables")]
    VariableOutOfRange {
        model: String,
        component: usize,
        var: usize,
        n_vars: usize,
    },
}

/// Numeric vector field evaluation.
pub type NumericField = Arc<dyn Fn(&[f64]) -> Vec<f64> + Send + Sync>;

/// Immutable description of `f(x)`.
///
/// The symbolic form is authoritative for verification. An optional
/// hand-written numeric form may be supplied for sampling and training; it
/// is assumed, not checked, to agree with the symbolic one.
#[derive(Clone)]
pub struct DynamicalModel {
    name: String,
    field: Vec<Expr>,
    numeric: Option<NumericField>,
}

impl DynamicalModel {
    pub fn new(name: impl Into<String>, field: Vec<Expr>) -> Result<Self, ModelError> {
        let name = name.into();
        if field.is_empty() {
            return Err(ModelError::EmptyField(name));
        }
        let n_vars = field.len();
        for (component, expr) in field.iter().enumerate() {
            let arity = expr.arity();
            if arity > n_vars {
                return Err(ModelError::VariableOutOfRange {
                    model: name,
                    component,
                    var: arity - 1,
                    n_vars,
                });
            }
        }
        Ok(Self {
            name,
            field,
            numeric: None,
        })
    }

    /// Attach a numeric implementation of the same field.
    pub fn with_numeric(
        mut self,
        numeric: impl Fn(&[f64]) -> Vec<f64> + Send + Sync + 'static,
    ) -> Self {
        self.numeric = Some(Arc::new(numeric));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_vars(&self) -> usize {
        self.field.len()
    }

    /// Symbolic vector field, one expression per state variable.
    pub fn field(&self) -> &[Expr] {
        &self.field
    }

    pub fn is_polynomial(&self) -> bool {
        self.field.iter().all(Expr::is_polynomial)
    }

    /// `f(point)`, using the numeric form when one was supplied.
    pub fn evaluate(&self, point: &[f64]) -> Vec<f64> {
        match &self.numeric {
            Some(numeric) => numeric(point),
            None => self.field.iter().map(|e| e.eval(point)).collect(),
        }
    }
}

impl fmt::Debug for DynamicalModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicalModel")
            .field("name", &self.name)
            .field("field", &self.field)
            .field("numeric", &self.numeric.is_some())
            .finish()
    }
}

impl fmt::Display for DynamicalModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.name)?;
        for (i, component) in self.field.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "f{i} = {component}")?;
        }
        Ok(())
    }
}
