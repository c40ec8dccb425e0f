//! Branch-and-prune δ-decision procedure over interval arithmetic.
//!
//! The search box is read off the asserted variable bounds. Boxes are
//! evaluated with three-valued interval semantics: certainly-false boxes are
//! pruned, certainly-true boxes yield a model, the rest are bisected along
//! their widest side. A box narrower than the precision whose status is
//! still undecided, and none of whose probe points satisfies the formula,
//! yields a δ-sat answer at its midpoint. `Unsat` answers are therefore
//! sound; `Sat` answers may be δ-relaxed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use num::rational::BigRational;
use num::traits::{ToPrimitive, Zero};
use thiserror::Error;
use tracing::debug;

use crate::interval::{self, Interval, Truth};
use crate::solver::{Model, ModelValue, SatResult, SmtSolver};
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

#[derive(Debug, Error)]
pub enum IntervalError {
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
    #[error("Unsupported sort for variable {name}: {sort}")]
    UnsupportedSort { name: String, sort: SmtSort },
    #[error("Unsupported term: {0}")]
    UnsupportedTerm(String),
    #[error("pop without matching push")]
    ScopeUnderflow,
}

/// Search parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalConfig {
    /// Boxes narrower than this on every side are not split further.
    pub precision: f64,
    /// Maximum number of boxes examined per check.
    pub max_boxes: usize,
    /// Wall-clock limit per check.
    pub timeout: Option<Duration>,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            precision: 1e-3,
            max_boxes: 2_000_000,
            timeout: None,
        }
    }
}

/// Statistics from the most recent check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchStats {
    pub boxes: usize,
    /// The last `Sat` answer came from a box at precision rather than a
    /// point satisfying every constraint.
    pub delta_sat: bool,
}

#[derive(Debug, Clone)]
enum Node {
    Var(usize),
    Const { enclosure: Interval, value: f64 },
    Add(Box<Node>, Box<Node>),
    Sub(Box<Node>, Box<Node>),
    Mul(Box<Node>, Box<Node>),
    Div(Box<Node>, Box<Node>),
    Neg(Box<Node>),
    Pow(Box<Node>, u32),
    Sin(Box<Node>),
    Cos(Box<Node>),
    Exp(Box<Node>),
    Log(Box<Node>),
    Tanh(Box<Node>),
}

impl Node {
    fn enclose(&self, b: &[Interval]) -> Interval {
        match self {
            Node::Var(i) => b[*i],
            Node::Const { enclosure, .. } => *enclosure,
            Node::Add(x, y) => x.enclose(b).add(&y.enclose(b)),
            Node::Sub(x, y) => x.enclose(b).sub(&y.enclose(b)),
            Node::Mul(x, y) => x.enclose(b).mul(&y.enclose(b)),
            Node::Div(x, y) => x.enclose(b).div(&y.enclose(b)),
            Node::Neg(x) => x.enclose(b).neg(),
            Node::Pow(x, n) => x.enclose(b).powi(*n),
            Node::Sin(x) => x.enclose(b).sin(),
            Node::Cos(x) => x.enclose(b).cos(),
            Node::Exp(x) => x.enclose(b).exp(),
            Node::Log(x) => x.enclose(b).ln(),
            Node::Tanh(x) => x.enclose(b).tanh(),
        }
    }

    fn eval(&self, p: &[f64]) -> f64 {
        match self {
            Node::Var(i) => p[*i],
            Node::Const { value, .. } => *value,
            Node::Add(x, y) => x.eval(p) + y.eval(p),
            Node::Sub(x, y) => x.eval(p) - y.eval(p),
            Node::Mul(x, y) => x.eval(p) * y.eval(p),
            Node::Div(x, y) => x.eval(p) / y.eval(p),
            Node::Neg(x) => -x.eval(p),
            Node::Pow(x, n) => x.eval(p).powi(*n as i32),
            Node::Sin(x) => x.eval(p).sin(),
            Node::Cos(x) => x.eval(p).cos(),
            Node::Exp(x) => x.eval(p).exp(),
            Node::Log(x) => x.eval(p).ln(),
            Node::Tanh(x) => x.eval(p).tanh(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Cmp {
    Le,
    Lt,
    Ge,
    Gt,
    Eq,
}

#[derive(Debug, Clone)]
enum Formula {
    Const(bool),
    Cmp(Cmp, Node, Node),
    And(Vec<Formula>),
    Or(Vec<Formula>),
    Not(Box<Formula>),
}

impl Formula {
    fn truth(&self, b: &[Interval]) -> Truth {
        match self {
            Formula::Const(v) => Truth::from_bool(*v),
            Formula::Cmp(cmp, l, r) => {
                let (l, r) = (l.enclose(b), r.enclose(b));
                match cmp {
                    Cmp::Le => interval::le(&l, &r),
                    Cmp::Lt => interval::lt(&l, &r),
                    Cmp::Ge => interval::le(&r, &l),
                    Cmp::Gt => interval::lt(&r, &l),
                    Cmp::Eq => interval::eq(&l, &r),
                }
            }
            Formula::And(parts) => {
                let mut acc = Truth::True;
                for part in parts {
                    acc = acc.and(part.truth(b));
                    if acc == Truth::False {
                        break;
                    }
                }
                acc
            }
            Formula::Or(parts) => {
                let mut acc = Truth::False;
                for part in parts {
                    acc = acc.or(part.truth(b));
                    if acc == Truth::True {
                        break;
                    }
                }
                acc
            }
            Formula::Not(inner) => inner.truth(b).not(),
        }
    }

    fn holds(&self, p: &[f64]) -> bool {
        match self {
            Formula::Const(v) => *v,
            Formula::Cmp(cmp, l, r) => {
                let (l, r) = (l.eval(p), r.eval(p));
                match cmp {
                    Cmp::Le => l <= r,
                    Cmp::Lt => l < r,
                    Cmp::Ge => l >= r,
                    Cmp::Gt => l > r,
                    Cmp::Eq => l == r,
                }
            }
            Formula::And(parts) => parts.iter().all(|f| f.holds(p)),
            Formula::Or(parts) => parts.iter().any(|f| f.holds(p)),
            Formula::Not(inner) => !inner.holds(p),
        }
    }
}

/// Nearest float to `value` and an interval guaranteed to contain it.
fn enclose_rational(value: &BigRational) -> (f64, Interval) {
    let approx = value.to_f64().unwrap_or(f64::NAN);
    let exact = BigRational::from_float(approx).is_some_and(|back| &back == value);
    let enclosure = if exact {
        Interval::point(approx)
    } else if approx.is_finite() {
        Interval::around(approx)
    } else {
        Interval::entire()
    };
    (approx, enclosure)
}

fn literal(value: &BigRational) -> Node {
    let (value, enclosure) = enclose_rational(value);
    Node::Const { enclosure, value }
}

/// `x_i` plus a constant, read off a linear term in a single variable
/// with unit coefficient.
#[derive(Debug, Clone)]
struct Shifted {
    var: Option<usize>,
    negated: bool,
    offset: BigRational,
}

pub struct IntervalSolver {
    config: IntervalConfig,
    index: HashMap<String, usize>,
    names: Vec<String>,
    assertions: Vec<SmtTerm>,
    scopes: Vec<(usize, usize)>,
    stats: SearchStats,
}

impl IntervalSolver {
    pub fn new(config: IntervalConfig) -> Self {
        Self {
            config,
            index: HashMap::new(),
            names: Vec::new(),
            assertions: Vec::new(),
            scopes: Vec::new(),
            stats: SearchStats::default(),
        }
    }

    pub fn with_default_config() -> Self {
        Self::new(IntervalConfig::default())
    }

    pub fn config(&self) -> &IntervalConfig {
        &self.config
    }

    pub fn last_stats(&self) -> &SearchStats {
        &self.stats
    }

    fn compile_real(&self, term: &SmtTerm) -> Result<Node, IntervalError> {
        let unary = |t: &SmtTerm| self.compile_real(t).map(Box::new);
        Ok(match term {
            SmtTerm::Var(name) => Node::Var(
                *self
                    .index
                    .get(name)
                    .ok_or_else(|| IntervalError::UnknownVariable(name.clone()))?,
            ),
            SmtTerm::RealLit(value) => literal(value),
            SmtTerm::Add(a, b) => Node::Add(unary(a)?, unary(b)?),
            SmtTerm::Sub(a, b) => Node::Sub(unary(a)?, unary(b)?),
            SmtTerm::Mul(a, b) if a == b => Node::Pow(unary(a)?, 2),
            SmtTerm::Mul(a, b) => Node::Mul(unary(a)?, unary(b)?),
            SmtTerm::Div(a, b) => Node::Div(unary(a)?, unary(b)?),
            SmtTerm::Neg(a) => Node::Neg(unary(a)?),
            SmtTerm::Pow(a, n) => Node::Pow(unary(a)?, *n),
            SmtTerm::Sin(a) => Node::Sin(unary(a)?),
            SmtTerm::Cos(a) => Node::Cos(unary(a)?),
            SmtTerm::Exp(a) => Node::Exp(unary(a)?),
            SmtTerm::Log(a) => Node::Log(unary(a)?),
            SmtTerm::Tanh(a) => Node::Tanh(unary(a)?),
            other => {
                return Err(IntervalError::UnsupportedTerm(format!(
                    "expected a real term, found {other:?}"
                )))
            }
        })
    }

    fn compile_bool(&self, term: &SmtTerm) -> Result<Formula, IntervalError> {
        let cmp = |c: Cmp, a: &SmtTerm, b: &SmtTerm| -> Result<Formula, IntervalError> {
            Ok(Formula::Cmp(c, self.compile_real(a)?, self.compile_real(b)?))
        };
        match term {
            SmtTerm::BoolLit(v) => Ok(Formula::Const(*v)),
            SmtTerm::Le(a, b) => cmp(Cmp::Le, a, b),
            SmtTerm::Lt(a, b) => cmp(Cmp::Lt, a, b),
            SmtTerm::Ge(a, b) => cmp(Cmp::Ge, a, b),
            SmtTerm::Gt(a, b) => cmp(Cmp::Gt, a, b),
            SmtTerm::Eq(a, b) => cmp(Cmp::Eq, a, b),
            SmtTerm::And(parts) => Ok(Formula::And(
                parts
                    .iter()
                    .map(|p| self.compile_bool(p))
                    .collect::<Result<_, _>>()?,
            )),
            SmtTerm::Or(parts) => Ok(Formula::Or(
                parts
                    .iter()
                    .map(|p| self.compile_bool(p))
                    .collect::<Result<_, _>>()?,
            )),
            SmtTerm::Not(inner) => Ok(Formula::Not(Box::new(self.compile_bool(inner)?))),
            SmtTerm::Implies(a, b) => Ok(Formula::Or(vec![
                Formula::Not(Box::new(self.compile_bool(a)?)),
                self.compile_bool(b)?,
            ])),
            other => Err(IntervalError::UnsupportedTerm(format!(
                "expected a formula, found {other:?}"
            ))),
        }
    }

    fn shifted(&self, term: &SmtTerm) -> Option<Shifted> {
        match term {
            SmtTerm::Var(name) => Some(Shifted {
                var: Some(*self.index.get(name)?),
                negated: false,
                offset: BigRational::zero(),
            }),
            SmtTerm::RealLit(value) => Some(Shifted {
                var: None,
                negated: false,
                offset: value.clone(),
            }),
            SmtTerm::Neg(a) => {
                let s = self.shifted(a)?;
                Some(Shifted {
                    var: s.var,
                    negated: !s.negated,
                    offset: -s.offset,
                })
            }
            SmtTerm::Add(a, b) => combine(self.shifted(a)?, self.shifted(b)?),
            SmtTerm::Sub(a, b) => {
                let s = self.shifted(b)?;
                let negated_b = Shifted {
                    var: s.var,
                    negated: !s.negated,
                    offset: -s.offset,
                };
                combine(self.shifted(a)?, negated_b)
            }
            _ => None,
        }
    }

    /// Tighten `bounds` with a top-level atom of the form `±x + c ⋈ d`.
    /// Returns `false` when the bound contradicts what is already known.
    fn infer_bound(&self, term: &SmtTerm, bounds: &mut [Interval]) -> bool {
        let (cmp, lhs, rhs) = match term {
            SmtTerm::Le(a, b) | SmtTerm::Lt(a, b) => (Cmp::Le, a, b),
            SmtTerm::Ge(a, b) | SmtTerm::Gt(a, b) => (Cmp::Ge, a, b),
            SmtTerm::Eq(a, b) => (Cmp::Eq, a, b),
            _ => return true,
        };
        let (Some(l), Some(r)) = (self.shifted(lhs), self.shifted(rhs)) else {
            return true;
        };
        // l - r = ±x + k
        let negated_r = Shifted {
            var: r.var,
            negated: !r.negated,
            offset: -r.offset,
        };
        let Some(Shifted {
            var: Some(var),
            negated,
            offset,
        }) = combine(l, negated_r)
        else {
            return true;
        };
        // ±x + k ⋈ 0  ⇒  x ⋈' ∓k
        let (value, cmp) = if negated {
            let flipped = match cmp {
                Cmp::Le => Cmp::Ge,
                Cmp::Ge => Cmp::Le,
                other => other,
            };
            (offset, flipped)
        } else {
            (-offset, cmp)
        };
        let (approx, enclosure) = enclose_rational(&value);
        if approx.is_nan() {
            return true;
        }
        let current = bounds[var];
        let (lo, hi) = match cmp {
            Cmp::Le => (current.lo(), current.hi().min(enclosure.hi())),
            Cmp::Ge => (current.lo().max(enclosure.lo()), current.hi()),
            _ => (
                current.lo().max(enclosure.lo()),
                current.hi().min(enclosure.hi()),
            ),
        };
        if lo > hi {
            return false;
        }
        bounds[var] = Interval::new(lo, hi);
        true
    }

    fn collect_bounds(&self, term: &SmtTerm, bounds: &mut [Interval]) -> bool {
        match term {
            SmtTerm::And(parts) => parts.iter().all(|p| self.collect_bounds(p, bounds)),
            other => self.infer_bound(other, bounds),
        }
    }

    fn search(&mut self) -> Result<(SatResult, Option<Vec<f64>>), IntervalError> {
        self.stats = SearchStats::default();
        let formula = Formula::And(
            self.assertions
                .iter()
                .map(|t| self.compile_bool(t))
                .collect::<Result<_, _>>()?,
        );

        let mut root = vec![Interval::entire(); self.names.len()];
        for term in &self.assertions {
            if !self.collect_bounds(term, &mut root) {
                return Ok((SatResult::Unsat, None));
            }
        }
        for (i, b) in root.iter().enumerate() {
            if !b.is_bounded() {
                return Ok((
                    SatResult::Unknown(format!("variable {} is unbounded", self.names[i])),
                    None,
                ));
            }
        }

        let deadline = self.config.timeout.map(|t| Instant::now() + t);
        let mut stack = vec![root];
        while let Some(region) = stack.pop() {
            self.stats.boxes += 1;
            if self.stats.boxes > self.config.max_boxes {
                return Ok((
                    SatResult::Unknown(format!(
                        "box budget of {} exhausted",
                        self.config.max_boxes
                    )),
                    None,
                ));
            }
            if self.stats.boxes % 1024 == 0 && deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok((SatResult::Unknown("timeout".into()), None));
            }

            let truth = formula.truth(&region);
            let mid: Vec<f64> = region.iter().map(Interval::midpoint).collect();
            match truth {
                Truth::False => continue,
                Truth::True => return Ok((SatResult::Sat, Some(mid))),
                Truth::Unknown => {}
            }
            if formula.holds(&mid) {
                return Ok((SatResult::Sat, Some(mid)));
            }

            let (widest, width) = region
                .iter()
                .enumerate()
                .map(|(i, b)| (i, b.width()))
                .fold((0, 0.0), |acc, (i, w)| if w > acc.1 { (i, w) } else { acc });
            if width <= self.config.precision {
                if let Some(corner) = satisfying_corner(&formula, &region) {
                    return Ok((SatResult::Sat, Some(corner)));
                }
                self.stats.delta_sat = true;
                debug!(boxes = self.stats.boxes, point = ?mid, "delta-sat box");
                return Ok((SatResult::Sat, Some(mid)));
            }
            let (left, right) = region[widest].bisect();
            let mut upper = region.clone();
            upper[widest] = right;
            let mut lower = region;
            lower[widest] = left;
            stack.push(upper);
            stack.push(lower);
        }
        Ok((SatResult::Unsat, None))
    }
}

fn combine(a: Shifted, b: Shifted) -> Option<Shifted> {
    let offset = a.offset + b.offset;
    match (a.var, b.var) {
        (Some(_), Some(_)) => None,
        (Some(v), None) => Some(Shifted {
            var: Some(v),
            negated: a.negated,
            offset,
        }),
        (None, Some(v)) => Some(Shifted {
            var: Some(v),
            negated: b.negated,
            offset,
        }),
        (None, None) => Some(Shifted {
            var: None,
            negated: false,
            offset,
        }),
    }
}

/// First corner of a small box satisfying the formula, if any.
fn satisfying_corner(formula: &Formula, region: &[Interval]) -> Option<Vec<f64>> {
    let n = region.len();
    if n > 12 {
        return None;
    }
    (0u32..(1 << n)).find_map(|mask| {
        let corner: Vec<f64> = region
            .iter()
            .enumerate()
            .map(|(i, b)| if mask & (1 << i) == 0 { b.lo() } else { b.hi() })
            .collect();
        formula.holds(&corner).then_some(corner)
    })
}

impl Default for IntervalSolver {
    fn default() -> Self {
        Self::with_default_config()
    }
}

impl SmtSolver for IntervalSolver {
    type Error = IntervalError;

    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), IntervalError> {
        if *sort != SmtSort::Real {
            return Err(IntervalError::UnsupportedSort {
                name: name.to_string(),
                sort: sort.clone(),
            });
        }
        if !self.index.contains_key(name) {
            self.index.insert(name.to_string(), self.names.len());
            self.names.push(name.to_string());
        }
        Ok(())
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), IntervalError> {
        // Compile eagerly so malformed terms are reported at the call site.
        self.compile_bool(term)?;
        self.assertions.push(term.clone());
        Ok(())
    }

    fn push(&mut self) -> Result<(), IntervalError> {
        self.scopes.push((self.assertions.len(), self.names.len()));
        Ok(())
    }

    fn pop(&mut self) -> Result<(), IntervalError> {
        let (assertions, vars) = self.scopes.pop().ok_or(IntervalError::ScopeUnderflow)?;
        self.assertions.truncate(assertions);
        for name in self.names.drain(vars..) {
            self.index.remove(&name);
        }
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, IntervalError> {
        Ok(self.search()?.0)
    }

    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), IntervalError> {
        let (result, point) = self.search()?;
        let Some(point) = point else {
            return Ok((result, None));
        };
        let mut values = HashMap::new();
        for &(name, _) in var_names {
            let i = *self
                .index
                .get(name)
                .ok_or_else(|| IntervalError::UnknownVariable(name.to_string()))?;
            values.insert(name.to_string(), ModelValue::Real(point[i]));
        }
        Ok((result, Some(Model { values })))
    }

    fn reset(&mut self) -> Result<(), IntervalError> {
        self.index.clear();
        self.names.clear();
        self.assertions.clear();
        self.scopes.clear();
        self.stats = SearchStats::default();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "interval"
    }
}
