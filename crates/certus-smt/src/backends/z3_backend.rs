use std::collections::HashMap;

use thiserror::Error;
use z3::SatResult as Z3SatResult;

use crate::backends::smtlib_printer::parse_real_value;
use crate::solver::{Model, ModelValue, SatResult, SmtSolver};
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

#[derive(Debug, Error)]
pub enum Z3Error {
    #[error("Z3 error: {0}")]
    Internal(String),
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
    #[error("Unsupported by the Z3 backend: {0}")]
    Unsupported(String),
}

pub struct Z3Solver {
    solver: z3::Solver,
    real_vars: HashMap<String, z3::ast::Real>,
    bool_vars: HashMap<String, z3::ast::Bool>,
    _params: Option<z3::Params>,
}

impl Z3Solver {
    pub fn new() -> Self {
        let solver = z3::Solver::new();
        Self {
            solver,
            real_vars: HashMap::new(),
            bool_vars: HashMap::new(),
            _params: None,
        }
    }

    pub fn with_timeout_secs(timeout_secs: u64) -> Self {
        if timeout_secs == 0 {
            return Self::new();
        }
        let solver = z3::Solver::new();
        let mut params = z3::Params::new();
        let timeout_ms = timeout_secs.saturating_mul(1000);
        params.set_u32("timeout", timeout_ms as u32);
        solver.set_params(&params);
        Self {
            solver,
            real_vars: HashMap::new(),
            bool_vars: HashMap::new(),
            _params: Some(params),
        }
    }

    pub fn with_default_config() -> Self {
        Self::new()
    }

    fn literal(value: &num::rational::BigRational) -> Result<z3::ast::Real, Z3Error> {
        let num = value.numer().to_string();
        let den = value.denom().to_string();
        z3::ast::Real::from_real_str(&num, &den)
            .ok_or_else(|| Z3Error::Internal(format!("cannot build literal {num}/{den}")))
    }

    fn translate_term(&self, term: &SmtTerm) -> Result<Z3Term, Z3Error> {
        match term {
            SmtTerm::Var(name) => {
                if let Some(v) = self.real_vars.get(name) {
                    Ok(Z3Term::Real(v.clone()))
                } else if let Some(v) = self.bool_vars.get(name) {
                    Ok(Z3Term::Bool(v.clone()))
                } else {
                    Err(Z3Error::UnknownVariable(name.clone()))
                }
            }
            SmtTerm::RealLit(value) => Ok(Z3Term::Real(Self::literal(value)?)),
            SmtTerm::BoolLit(b) => Ok(Z3Term::Bool(z3::ast::Bool::from_bool(*b))),
            SmtTerm::Add(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_real()?;
                let r = self.translate_term(rhs)?.into_real()?;
                Ok(Z3Term::Real(&l + &r))
            }
            SmtTerm::Sub(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_real()?;
                let r = self.translate_term(rhs)?.into_real()?;
                Ok(Z3Term::Real(&l - &r))
            }
            SmtTerm::Mul(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_real()?;
                let r = self.translate_term(rhs)?.into_real()?;
                Ok(Z3Term::Real(&l * &r))
            }
            SmtTerm::Div(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_real()?;
                let r = self.translate_term(rhs)?.into_real()?;
                Ok(Z3Term::Real(&l / &r))
            }
            SmtTerm::Neg(inner) => {
                let v = self.translate_term(inner)?.into_real()?;
                let zero = z3::ast::Real::from_real(0, 1);
                Ok(Z3Term::Real(&zero - &v))
            }
            SmtTerm::Pow(base, n) => {
                let b = self.translate_term(base)?.into_real()?;
                let mut acc = z3::ast::Real::from_real(1, 1);
                for _ in 0..*n {
                    acc = &acc * &b;
                }
                Ok(Z3Term::Real(acc))
            }
            SmtTerm::Sin(_)
            | SmtTerm::Cos(_)
            | SmtTerm::Exp(_)
            | SmtTerm::Log(_)
            | SmtTerm::Tanh(_) => Err(Z3Error::Unsupported(
                "transcendental functions require a delta-complete backend".into(),
            )),
            SmtTerm::Eq(lhs, rhs) => {
                let l = self.translate_term(lhs)?;
                let r = self.translate_term(rhs)?;
                match (l, r) {
                    (Z3Term::Real(lr), Z3Term::Real(rr)) => Ok(Z3Term::Bool(lr.eq(&rr))),
                    (Z3Term::Bool(lb), Z3Term::Bool(rb)) => Ok(Z3Term::Bool(lb.eq(&rb))),
                    _ => Err(Z3Error::Internal("Sort mismatch in Eq".into())),
                }
            }
            SmtTerm::Lt(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_real()?;
                let r = self.translate_term(rhs)?.into_real()?;
                Ok(Z3Term::Bool(l.lt(&r)))
            }
            SmtTerm::Le(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_real()?;
                let r = self.translate_term(rhs)?.into_real()?;
                Ok(Z3Term::Bool(l.le(&r)))
            }
            SmtTerm::Gt(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_real()?;
                let r = self.translate_term(rhs)?.into_real()?;
                Ok(Z3Term::Bool(l.gt(&r)))
            }
            SmtTerm::Ge(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_real()?;
                let r = self.translate_term(rhs)?.into_real()?;
                Ok(Z3Term::Bool(l.ge(&r)))
            }
            SmtTerm::And(terms) => {
                let bools: Result<Vec<_>, _> = terms
                    .iter()
                    .map(|t| self.translate_term(t).and_then(|z| z.into_bool()))
                    .collect();
                let bools = bools?;
                let refs: Vec<&z3::ast::Bool> = bools.iter().collect();
                Ok(Z3Term::Bool(z3::ast::Bool::and(&refs)))
            }
            SmtTerm::Or(terms) => {
                let bools: Result<Vec<_>, _> = terms
                    .iter()
                    .map(|t| self.translate_term(t).and_then(|z| z.into_bool()))
                    .collect();
                let bools = bools?;
                let refs: Vec<&z3::ast::Bool> = bools.iter().collect();
                Ok(Z3Term::Bool(z3::ast::Bool::or(&refs)))
            }
            SmtTerm::Not(inner) => {
                let b = self.translate_term(inner)?.into_bool()?;
                Ok(Z3Term::Bool(b.not()))
            }
            SmtTerm::Implies(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_bool()?;
                let r = self.translate_term(rhs)?.into_bool()?;
                Ok(Z3Term::Bool(l.implies(&r)))
            }
        }
    }
}

enum Z3Term {
    Real(z3::ast::Real),
    Bool(z3::ast::Bool),
}

impl Z3Term {
    fn into_real(self) -> Result<z3::ast::Real, Z3Error> {
        match self {
            Z3Term::Real(r) => Ok(r),
            Z3Term::Bool(_) => Err(Z3Error::Internal("Expected Real, got Bool".into())),
        }
    }

    fn into_bool(self) -> Result<z3::ast::Bool, Z3Error> {
        match self {
            Z3Term::Bool(b) => Ok(b),
            Z3Term::Real(_) => Err(Z3Error::Internal("Expected Bool, got Real".into())),
        }
    }
}

/// Numeric value of a model constant; algebraic numbers fall back to
/// Z3's decimal approximation.
fn real_value(value: &z3::ast::Real) -> f64 {
    parse_real_value(&value.to_string()).unwrap_or_else(|| value.approx_f64())
}

impl Default for Z3Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtSolver for Z3Solver {
    type Error = Z3Error;

    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), Z3Error> {
        match sort {
            SmtSort::Real => {
                let v = z3::ast::Real::new_const(name);
                self.real_vars.insert(name.to_string(), v);
            }
            SmtSort::Bool => {
                let v = z3::ast::Bool::new_const(name);
                self.bool_vars.insert(name.to_string(), v);
            }
        }
        Ok(())
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), Z3Error> {
        let z3_term = self.translate_term(term)?.into_bool()?;
        self.solver.assert(&z3_term);
        Ok(())
    }

    fn push(&mut self) -> Result<(), Z3Error> {
        self.solver.push();
        Ok(())
    }

    fn pop(&mut self) -> Result<(), Z3Error> {
        self.solver.pop(1);
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, Z3Error> {
        match self.solver.check() {
            Z3SatResult::Sat => Ok(SatResult::Sat),
            Z3SatResult::Unsat => Ok(SatResult::Unsat),
            Z3SatResult::Unknown => Ok(SatResult::Unknown("Z3 returned unknown".into())),
        }
    }

    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Z3Error> {
        match self.solver.check() {
            Z3SatResult::Sat => {
                let z3_model = self
                    .solver
                    .get_model()
                    .ok_or_else(|| Z3Error::Internal("SAT but no model available".into()))?;
                let mut values = HashMap::new();

                for &(name, sort) in var_names {
                    match sort {
                        SmtSort::Real => {
                            if let Some(v) = self.real_vars.get(name) {
                                if let Some(val) = z3_model.eval::<z3::ast::Real>(v, true) {
                                    values.insert(name.to_string(), ModelValue::Real(real_value(&val)));
                                }
                            }
                        }
                        SmtSort::Bool => {
                            if let Some(v) = self.bool_vars.get(name) {
                                if let Some(val) = z3_model.eval::<z3::ast::Bool>(v, true) {
                                    if let Some(b) = val.as_bool() {
                                        values.insert(name.to_string(), ModelValue::Bool(b));
                                    }
                                }
                            }
                        }
                    }
                }

                Ok((SatResult::Sat, Some(Model { values })))
            }
            Z3SatResult::Unsat => Ok((SatResult::Unsat, None)),
            Z3SatResult::Unknown => Ok((SatResult::Unknown("Z3 returned unknown".into()), None)),
        }
    }

    fn reset(&mut self) -> Result<(), Z3Error> {
        self.solver.reset();
        // Z3 may drop per-solver parameters on reset; reapply timeout if configured.
        if let Some(params) = &self._params {
            self.solver.set_params(params);
        }
        self.real_vars.clear();
        self.bool_vars.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "z3"
    }
}
