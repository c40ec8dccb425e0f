//! Real-valued symbolic expressions over the state variables `x0 … x{n-1}`.
//!
//! Constants are exact rationals with a cached `f64` approximation, so an
//! expression can be both evaluated cheaply and handed to a decision
//! procedure without loss of precision.

use std::fmt;

use num::bigint::BigInt;
use num::rational::BigRational;
use num::traits::{One, Signed, ToPrimitive, Zero};
use serde::{Serialize, Serializer};

/// An exact rational constant paired with its nearest `f64`.
#[derive(Debug, Clone)]
pub struct Constant {
    exact: BigRational,
    approx: f64,
}

impl Constant {
    pub fn new(exact: BigRational) -> Self {
        let approx = exact.to_f64().unwrap_or(f64::NAN);
        Self { exact, approx }
    }

    pub fn integer(n: i64) -> Self {
        Self::new(BigRational::from_integer(BigInt::from(n)))
    }

    /// `num / den`. Returns `None` when `den` is zero.
    pub fn ratio(num: i64, den: i64) -> Option<Self> {
        if den == 0 {
            return None;
        }
        Some(Self::new(BigRational::new(BigInt::from(num), BigInt::from(den))))
    }

    /// Exact conversion of a finite float; `None` for NaN and infinities.
    pub fn from_f64(value: f64) -> Option<Self> {
        BigRational::from_float(value).map(|exact| Self {
            exact,
            approx: value,
        })
    }

    pub fn exact(&self) -> &BigRational {
        &self.exact
    }

    pub fn value(&self) -> f64 {
        self.approx
    }

    pub fn is_zero(&self) -> bool {
        self.exact.is_zero()
    }

    pub fn is_one(&self) -> bool {
        self.exact.is_one()
    }

    pub fn is_negative(&self) -> bool {
        self.exact.is_negative()
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        self.exact == other.exact
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exact.is_integer() {
            return write!(f, "{}", self.exact.numer());
        }
        // Dyadic constants that came from floats print in their shortest
        // round-tripping decimal form.
        match BigRational::from_float(self.approx) {
            Some(back) if back == self.exact => write!(f, "{}", self.approx),
            _ => write!(f, "{}/{}", self.exact.numer(), self.exact.denom()),
        }
    }
}

/// Symbolic real-valued expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// State variable `x_i`.
    Var(usize),
    Const(Constant),

    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Pow(Box<Expr>, u32),

    Sin(Box<Expr>),
    Cos(Box<Expr>),
    Exp(Box<Expr>),
    Log(Box<Expr>),
    Tanh(Box<Expr>),
}

#[allow(clippy::should_implement_trait)]
impl Expr {
    pub fn var(index: usize) -> Self {
        Expr::Var(index)
    }

    pub fn constant(c: Constant) -> Self {
        Expr::Const(c)
    }

    pub fn int(n: i64) -> Self {
        Expr::Const(Constant::integer(n))
    }

    pub fn zero() -> Self {
        Expr::int(0)
    }

    pub fn one() -> Self {
        Expr::int(1)
    }

    pub fn half() -> Self {
        Expr::Const(Constant::new(BigRational::new(BigInt::one(), BigInt::from(2))))
    }

    /// Rational constant `num / den`; a zero denominator yields `None`.
    pub fn ratio(num: i64, den: i64) -> Option<Self> {
        Constant::ratio(num, den).map(Expr::Const)
    }

    /// Exact constant for a finite float.
    pub fn from_f64(value: f64) -> Option<Self> {
        Constant::from_f64(value).map(Expr::Const)
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Expr::Const(c) => Some(c),
            _ => None,
        }
    }

    fn is_zero(&self) -> bool {
        self.as_constant().is_some_and(Constant::is_zero)
    }

    fn is_one(&self) -> bool {
        self.as_constant().is_some_and(Constant::is_one)
    }

    pub fn add(self, other: Expr) -> Self {
        match (&self, &other) {
            (Expr::Const(a), Expr::Const(b)) => {
                Expr::Const(Constant::new(a.exact() + b.exact()))
            }
            _ if self.is_zero() => other,
            _ if other.is_zero() => self,
            _ => Expr::Add(Box::new(self), Box::new(other)),
        }
    }

    pub fn sub(self, other: Expr) -> Self {
        match (&self, &other) {
            (Expr::Const(a), Expr::Const(b)) => {
                Expr::Const(Constant::new(a.exact() - b.exact()))
            }
            _ if other.is_zero() => self,
            _ if self.is_zero() => other.neg(),
            _ => Expr::Sub(Box::new(self), Box::new(other)),
        }
    }

    pub fn mul(self, other: Expr) -> Self {
        match (&self, &other) {
            (Expr::Const(a), Expr::Const(b)) => {
                Expr::Const(Constant::new(a.exact() * b.exact()))
            }
            _ if self.is_zero() || other.is_zero() => Expr::zero(),
            _ if self.is_one() => other,
            _ if other.is_one() => self,
            _ if self == other => self.pow(2),
            _ => Expr::Mul(Box::new(self), Box::new(other)),
        }
    }

    pub fn div(self, other: Expr) -> Self {
        match (&self, &other) {
            (Expr::Const(a), Expr::Const(b)) if !b.is_zero() => {
                Expr::Const(Constant::new(a.exact() / b.exact()))
            }
            _ if other.is_one() => self,
            _ => Expr::Div(Box::new(self), Box::new(other)),
        }
    }

    pub fn neg(self) -> Self {
        match self {
            Expr::Const(c) => Expr::Const(Constant::new(-c.exact().clone())),
            Expr::Neg(inner) => *inner,
            other => Expr::Neg(Box::new(other)),
        }
    }

    pub fn pow(self, exponent: u32) -> Self {
        match exponent {
            0 => Expr::one(),
            1 => self,
            _ => match self {
                Expr::Const(c) => {
                    let mut acc = BigRational::one();
                    for _ in 0..exponent {
                        acc *= c.exact();
                    }
                    Expr::Const(Constant::new(acc))
                }
                Expr::Pow(base, inner) => Expr::Pow(base, inner.saturating_mul(exponent)),
                other => Expr::Pow(Box::new(other), exponent),
            },
        }
    }

    pub fn sin(self) -> Self {
        Expr::Sin(Box::new(self))
    }

    pub fn cos(self) -> Self {
        Expr::Cos(Box::new(self))
    }

    pub fn exp(self) -> Self {
        Expr::Exp(Box::new(self))
    }

    pub fn log(self) -> Self {
        Expr::Log(Box::new(self))
    }

    pub fn tanh(self) -> Self {
        Expr::Tanh(Box::new(self))
    }

    /// Sum of an iterator of expressions (`0` when empty).
    pub fn sum(terms: impl IntoIterator<Item = Expr>) -> Self {
        terms.into_iter().fold(Expr::zero(), Expr::add)
    }

    /// Squared Euclidean norm `Σ x_i²` over the first `n_vars` variables.
    pub fn squared_norm(n_vars: usize) -> Self {
        Expr::sum((0..n_vars).map(|i| Expr::var(i).pow(2)))
    }

    /// Evaluate at a point. Variables beyond `point.len()` evaluate to NaN.
    pub fn eval(&self, point: &[f64]) -> f64 {
        match self {
            Expr::Var(i) => point.get(*i).copied().unwrap_or(f64::NAN),
            Expr::Const(c) => c.value(),
            Expr::Add(a, b) => a.eval(point) + b.eval(point),
            Expr::Sub(a, b) => a.eval(point) - b.eval(point),
            Expr::Mul(a, b) => a.eval(point) * b.eval(point),
            Expr::Div(a, b) => a.eval(point) / b.eval(point),
            Expr::Neg(a) => -a.eval(point),
            Expr::Pow(a, n) => a.eval(point).powi(*n as i32),
            Expr::Sin(a) => a.eval(point).sin(),
            Expr::Cos(a) => a.eval(point).cos(),
            Expr::Exp(a) => a.eval(point).exp(),
            Expr::Log(a) => a.eval(point).ln(),
            Expr::Tanh(a) => a.eval(point).tanh(),
        }
    }

    /// Symbolic partial derivative with respect to `x_var`.
    pub fn derivative(&self, var: usize) -> Expr {
        match self {
            Expr::Var(i) => {
                if *i == var {
                    Expr::one()
                } else {
                    Expr::zero()
                }
            }
            Expr::Const(_) => Expr::zero(),
            Expr::Add(a, b) => a.derivative(var).add(b.derivative(var)),
            Expr::Sub(a, b) => a.derivative(var).sub(b.derivative(var)),
            Expr::Mul(a, b) => {
                let left = a.derivative(var).mul((**b).clone());
                let right = (**a).clone().mul(b.derivative(var));
                left.add(right)
            }
            Expr::Div(a, b) => {
                let numerator = a
                    .derivative(var)
                    .mul((**b).clone())
                    .sub((**a).clone().mul(b.derivative(var)));
                numerator.div((**b).clone().pow(2))
            }
            Expr::Neg(a) => a.derivative(var).neg(),
            Expr::Pow(_, 0) => Expr::zero(),
            Expr::Pow(a, n) => Expr::int(i64::from(*n))
                .mul((**a).clone().pow(n - 1))
                .mul(a.derivative(var)),
            Expr::Sin(a) => (**a).clone().cos().mul(a.derivative(var)),
            Expr::Cos(a) => (**a).clone().sin().neg().mul(a.derivative(var)),
            Expr::Exp(a) => self.clone().mul(a.derivative(var)),
            Expr::Log(a) => a.derivative(var).div((**a).clone()),
            Expr::Tanh(a) => Expr::one()
                .sub(self.clone().pow(2))
                .mul(a.derivative(var)),
        }
    }

    /// Derivative along a vector field: `Σ_i ∂self/∂x_i · field_i`.
    pub fn lie_derivative(&self, field: &[Expr]) -> Expr {
        Expr::sum(
            field
                .iter()
                .enumerate()
                .map(|(i, f_i)| self.derivative(i).mul(f_i.clone())),
        )
    }

    /// Simultaneously replace every `x_i` with `replacements[i]`.
    ///
    /// Variables without a replacement are left untouched.
    pub fn substitute(&self, replacements: &[Expr]) -> Expr {
        match self {
            Expr::Var(i) => replacements
                .get(*i)
                .cloned()
                .unwrap_or_else(|| Expr::Var(*i)),
            Expr::Const(_) => self.clone(),
            Expr::Add(a, b) => a.substitute(replacements).add(b.substitute(replacements)),
            Expr::Sub(a, b) => a.substitute(replacements).sub(b.substitute(replacements)),
            Expr::Mul(a, b) => a.substitute(replacements).mul(b.substitute(replacements)),
            Expr::Div(a, b) => a.substitute(replacements).div(b.substitute(replacements)),
            Expr::Neg(a) => a.substitute(replacements).neg(),
            Expr::Pow(a, n) => a.substitute(replacements).pow(*n),
            Expr::Sin(a) => a.substitute(replacements).sin(),
            Expr::Cos(a) => a.substitute(replacements).cos(),
            Expr::Exp(a) => a.substitute(replacements).exp(),
            Expr::Log(a) => a.substitute(replacements).log(),
            Expr::Tanh(a) => a.substitute(replacements).tanh(),
        }
    }

    /// One past the highest variable index referenced (0 for constants).
    pub fn arity(&self) -> usize {
        match self {
            Expr::Var(i) => i + 1,
            Expr::Const(_) => 0,
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                a.arity().max(b.arity())
            }
            Expr::Neg(a)
            | Expr::Pow(a, _)
            | Expr::Sin(a)
            | Expr::Cos(a)
            | Expr::Exp(a)
            | Expr::Log(a)
            | Expr::Tanh(a) => a.arity(),
        }
    }

    /// Number of nodes in the expression tree.
    pub fn size(&self) -> usize {
        match self {
            Expr::Var(_) | Expr::Const(_) => 1,
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                1 + a.size() + b.size()
            }
            Expr::Neg(a)
            | Expr::Pow(a, _)
            | Expr::Sin(a)
            | Expr::Cos(a)
            | Expr::Exp(a)
            | Expr::Log(a)
            | Expr::Tanh(a) => 1 + a.size(),
        }
    }

    /// True if the expression uses any of `sin cos exp log tanh`.
    pub fn is_transcendental(&self) -> bool {
        match self {
            Expr::Var(_) | Expr::Const(_) => false,
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                a.is_transcendental() || b.is_transcendental()
            }
            Expr::Neg(a) | Expr::Pow(a, _) => a.is_transcendental(),
            Expr::Sin(_) | Expr::Cos(_) | Expr::Exp(_) | Expr::Log(_) | Expr::Tanh(_) => true,
        }
    }

    /// True for polynomials: no transcendental functions, divisions only by constants.
    pub fn is_polynomial(&self) -> bool {
        match self {
            Expr::Var(_) | Expr::Const(_) => true,
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) => {
                a.is_polynomial() && b.is_polynomial()
            }
            Expr::Div(a, b) => a.is_polynomial() && b.as_constant().is_some(),
            Expr::Neg(a) | Expr::Pow(a, _) => a.is_polynomial(),
            Expr::Sin(_) | Expr::Cos(_) | Expr::Exp(_) | Expr::Log(_) | Expr::Tanh(_) => false,
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Add(..) | Expr::Sub(..) => 1,
            Expr::Mul(..) | Expr::Div(..) => 2,
            Expr::Neg(_) => 3,
            Expr::Const(c) if c.is_negative() => 3,
            Expr::Pow(..) => 4,
            _ => 5,
        }
    }

    fn fmt_child(&self, f: &mut fmt::Formatter<'_>, min_precedence: u8) -> fmt::Result {
        if self.precedence() < min_precedence {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(i) => write!(f, "x{i}"),
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Add(a, b) => {
                a.fmt_child(f, 1)?;
                f.write_str(" + ")?;
                b.fmt_child(f, 1)
            }
            Expr::Sub(a, b) => {
                a.fmt_child(f, 1)?;
                f.write_str(" - ")?;
                b.fmt_child(f, 2)
            }
            Expr::Mul(a, b) => {
                a.fmt_child(f, 2)?;
                f.write_str("*")?;
                b.fmt_child(f, 3)
            }
            Expr::Div(a, b) => {
                a.fmt_child(f, 2)?;
                f.write_str("/")?;
                b.fmt_child(f, 4)
            }
            Expr::Neg(a) => {
                f.write_str("-")?;
                a.fmt_child(f, 4)
            }
            Expr::Pow(a, n) => {
                a.fmt_child(f, 5)?;
                write!(f, "^{n}")
            }
            Expr::Sin(a) => write!(f, "sin({a})"),
            Expr::Cos(a) => write!(f, "cos({a})"),
            Expr::Exp(a) => write!(f, "exp({a})"),
            Expr::Log(a) => write!(f, "log({a})"),
            Expr::Tanh(a) => write!(f, "tanh({a})"),
        }
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Expr {
        Expr::var(0)
    }

    fn y() -> Expr {
        Expr::var(1)
    }

    #[test]
    fn constant_folding_is_exact() {
        let third = Expr::ratio(1, 3).unwrap();
        let sum = third.clone().add(third.clone()).add(third);
        assert_eq!(sum, Expr::one());
    }

    #[test]
    fn neutral_elements_are_dropped() {
        assert_eq!(x().add(Expr::zero()), x());
        assert_eq!(Expr::one().mul(y()), y());
        assert_eq!(x().mul(Expr::zero()), Expr::zero());
        assert_eq!(x().neg().neg(), x());
    }

    #[test]
    fn self_product_becomes_square() {
        assert_eq!(x().mul(x()), Expr::Pow(Box::new(x()), 2));
    }

    #[test]
    fn derivative_of_polynomial() {
        // d/dx (x^3 + x*y) = 3x^2 + y
        let e = x().pow(3).add(x().mul(y()));
        let d = e.derivative(0);
        for &(a, b) in &[(0.5, -1.0), (2.0, 3.0), (-1.5, 0.25)] {
            let expected = 3.0 * a * a + b;
            assert!((d.eval(&[a, b]) - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn derivative_of_transcendental_functions() {
        let e = x().sin().mul(x().exp()).add(y().tanh());
        let dx = e.derivative(0);
        let dy = e.derivative(1);
        let (a, b): (f64, f64) = (0.3, -0.7);
        assert!((dx.eval(&[a, b]) - (a.cos() * a.exp() + a.sin() * a.exp())).abs() < 1e-12);
        assert!((dy.eval(&[a, b]) - (1.0 - b.tanh().powi(2))).abs() < 1e-12);
    }

    #[test]
    fn lie_derivative_of_quadratic_along_linear_field() {
        // V = x^2 + y^2, f = (-x, -y) => dV/dt = -2x^2 - 2y^2
        let v = Expr::squared_norm(2);
        let field = vec![x().neg(), y().neg()];
        let vdot = v.lie_derivative(&field);
        let p = [0.4, -1.2];
        assert!((vdot.eval(&p) + 2.0 * (0.16 + 1.44)).abs() < 1e-12);
    }

    #[test]
    fn half_is_exact() {
        assert_eq!(Expr::half(), Expr::ratio(1, 2).unwrap());
        assert_eq!(Expr::half().mul(x()).eval(&[3.0]), 1.5);
    }

    #[test]
    fn substitution_composes_with_field() {
        // V(x) = x0^2, f(x) = 0.5*x0 => V(f(x)) = 0.25*x0^2
        let v = x().pow(2);
        let half = Expr::ratio(1, 2).unwrap();
        let composed = v.substitute(&[half.mul(x())]);
        assert!((composed.eval(&[2.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn float_constants_are_exact_and_print_shortest() {
        let c = Constant::from_f64(0.1).unwrap();
        assert_eq!(c.value(), 0.1);
        assert_eq!(c.to_string(), "0.1");
        assert!(Constant::from_f64(f64::NAN).is_none());
        assert_eq!(Constant::ratio(1, 3).unwrap().to_string(), "1/3");
        assert!(Constant::ratio(1, 0).is_none());
    }

    #[test]
    fn display_respects_precedence() {
        let e = x().add(y()).mul(x().sub(y().sub(Expr::one())));
        assert_eq!(e.to_string(), "(x0 + x1)*(x0 - (x1 - 1))");
        let p = x().add(Expr::one()).pow(2).neg();
        assert_eq!(p.to_string(), "-(x0 + 1)^2");
    }

    #[test]
    fn classification_helpers() {
        assert!(x().pow(2).add(y()).is_polynomial());
        assert!(!x().sin().is_polynomial());
        assert!(x().sin().is_transcendental());
        assert!(x().div(Expr::int(2)).is_polynomial());
        assert!(!x().div(y()).is_polynomial());
        assert_eq!(x().add(Expr::var(4)).arity(), 5);
    }
}
