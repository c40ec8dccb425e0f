//! Outward-rounded interval arithmetic and three-valued truth.
//!
//! Every operation returns an interval guaranteed to contain the exact real
//! result for all points of its arguments. Inexact floating-point results
//! are stepped one ulp outward (exactness is detected with TwoSum and fused
//! multiply-add); library transcendentals are widened by a few ulps since
//! they are not correctly rounded.

use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::fmt;

/// Ulps added around results of libm calls.
const LIBM_SLACK: u32 = 4;

/// Smallest float strictly greater than `x`.
pub fn next_up(x: f64) -> f64 {
    if x.is_nan() || x == f64::INFINITY {
        return x;
    }
    if x == 0.0 {
        return f64::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

/// Largest float strictly less than `x`.
pub fn next_down(x: f64) -> f64 {
    -next_up(-x)
}

/// Rounding error of `a + b` is zero (TwoSum).
fn sum_is_exact(a: f64, b: f64, s: f64) -> bool {
    let bb = s - a;
    s.is_finite() && (a - (s - bb)) + (b - bb) == 0.0
}

fn add_down(a: f64, b: f64) -> f64 {
    let s = a + b;
    if sum_is_exact(a, b, s) {
        s
    } else {
        next_down(s)
    }
}

fn add_up(a: f64, b: f64) -> f64 {
    let s = a + b;
    if sum_is_exact(a, b, s) {
        s
    } else {
        next_up(s)
    }
}

fn mul_down(a: f64, b: f64) -> f64 {
    let p = a * b;
    if p.is_finite() && a.mul_add(b, -p) == 0.0 {
        p
    } else {
        next_down(p)
    }
}

fn mul_up(a: f64, b: f64) -> f64 {
    let p = a * b;
    if p.is_finite() && a.mul_add(b, -p) == 0.0 {
        p
    } else {
        next_up(p)
    }
}

fn div_down(a: f64, b: f64) -> f64 {
    let q = a / b;
    if q.is_finite() && q.mul_add(b, -a) == 0.0 {
        q
    } else {
        next_down(q)
    }
}

fn div_up(a: f64, b: f64) -> f64 {
    let q = a / b;
    if q.is_finite() && q.mul_add(b, -a) == 0.0 {
        q
    } else {
        next_up(q)
    }
}

fn up_by(mut x: f64, ulps: u32) -> f64 {
    for _ in 0..ulps {
        x = next_up(x);
    }
    x
}

fn down_by(mut x: f64, ulps: u32) -> f64 {
    for _ in 0..ulps {
        x = next_down(x);
    }
    x
}

/// Closed interval `[lo, hi]` of reals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    lo: f64,
    hi: f64,
}

impl Interval {
    /// `[lo, hi]`; the bounds are swapped if given in the wrong order.
    pub fn new(lo: f64, hi: f64) -> Self {
        if lo <= hi {
            Self { lo, hi }
        } else {
            Self { lo: hi, hi: lo }
        }
    }

    pub fn point(value: f64) -> Self {
        Self {
            lo: value,
            hi: value,
        }
    }

    pub fn entire() -> Self {
        Self {
            lo: f64::NEG_INFINITY,
            hi: f64::INFINITY,
        }
    }

    /// Smallest float interval around a value known only to round to `value`.
    pub fn around(value: f64) -> Self {
        Self {
            lo: next_down(value),
            hi: next_up(value),
        }
    }

    pub fn lo(&self) -> f64 {
        self.lo
    }

    pub fn hi(&self) -> f64 {
        self.hi
    }

    pub fn width(&self) -> f64 {
        self.hi - self.lo
    }

    pub fn midpoint(&self) -> f64 {
        match (self.lo.is_finite(), self.hi.is_finite()) {
            (true, true) => {
                let mid = 0.5 * self.lo + 0.5 * self.hi;
                mid.clamp(self.lo, self.hi)
            }
            (true, false) => self.lo,
            (false, true) => self.hi,
            (false, false) => 0.0,
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.lo.is_finite() && self.hi.is_finite()
    }

    fn is_nan(&self) -> bool {
        self.lo.is_nan() || self.hi.is_nan()
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lo <= value && value <= self.hi
    }

    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let lo = self.lo.max(other.lo);
        let hi = self.hi.min(other.hi);
        (lo <= hi).then_some(Interval { lo, hi })
    }

    /// The two halves at the midpoint.
    pub fn bisect(&self) -> (Interval, Interval) {
        let mid = self.midpoint();
        (
            Interval { lo: self.lo, hi: mid },
            Interval { lo: mid, hi: self.hi },
        )
    }

    fn sanitize(lo: f64, hi: f64) -> Self {
        if lo.is_nan() || hi.is_nan() {
            Self::entire()
        } else {
            Self { lo, hi }
        }
    }

    pub fn add(&self, other: &Interval) -> Interval {
        Self::sanitize(add_down(self.lo, other.lo), add_up(self.hi, other.hi))
    }

    pub fn sub(&self, other: &Interval) -> Interval {
        Self::sanitize(add_down(self.lo, -other.hi), add_up(self.hi, -other.lo))
    }

    pub fn neg(&self) -> Interval {
        Interval {
            lo: -self.hi,
            hi: -self.lo,
        }
    }

    pub fn mul(&self, other: &Interval) -> Interval {
        let pairs = [
            (self.lo, other.lo),
            (self.lo, other.hi),
            (self.hi, other.lo),
            (self.hi, other.hi),
        ];
        if pairs.iter().any(|(a, b)| (a * b).is_nan()) {
            return Self::entire();
        }
        let lo = pairs
            .iter()
            .map(|&(a, b)| mul_down(a, b))
            .fold(f64::INFINITY, f64::min);
        let hi = pairs
            .iter()
            .map(|&(a, b)| mul_up(a, b))
            .fold(f64::NEG_INFINITY, f64::max);
        Interval { lo, hi }
    }

    pub fn div(&self, other: &Interval) -> Interval {
        if other.contains(0.0) {
            return Self::entire();
        }
        let pairs = [
            (self.lo, other.lo),
            (self.lo, other.hi),
            (self.hi, other.lo),
            (self.hi, other.hi),
        ];
        if pairs.iter().any(|(a, b)| (a / b).is_nan()) {
            return Self::entire();
        }
        let lo = pairs
            .iter()
            .map(|&(a, b)| div_down(a, b))
            .fold(f64::INFINITY, f64::min);
        let hi = pairs
            .iter()
            .map(|&(a, b)| div_up(a, b))
            .fold(f64::NEG_INFINITY, f64::max);
        Interval { lo, hi }
    }

    pub fn powi(&self, n: u32) -> Interval {
        if n == 0 {
            return Interval::point(1.0);
        }
        if n == 1 {
            return *self;
        }
        if n % 2 == 1 {
            let lo = if self.lo >= 0.0 {
                pow_down(self.lo, n)
            } else {
                -pow_up(-self.lo, n)
            };
            let hi = if self.hi >= 0.0 {
                pow_up(self.hi, n)
            } else {
                -pow_down(-self.hi, n)
            };
            return Self::sanitize(lo, hi);
        }
        let (near, far) = if self.lo >= 0.0 {
            (self.lo, self.hi)
        } else if self.hi <= 0.0 {
            (-self.hi, -self.lo)
        } else {
            (0.0, self.hi.max(-self.lo))
        };
        Self::sanitize(pow_down(near, n), pow_up(far, n))
    }

    pub fn exp(&self) -> Interval {
        let lo = down_by(self.lo.exp(), LIBM_SLACK).max(0.0);
        let hi = up_by(self.hi.exp(), LIBM_SLACK);
        Self::sanitize(lo, hi)
    }

    /// Natural logarithm; the part of the argument at or below zero is
    /// outside the domain and widens the result to `-inf`.
    pub fn ln(&self) -> Interval {
        if self.hi <= 0.0 {
            return Self::entire();
        }
        let lo = if self.lo <= 0.0 {
            f64::NEG_INFINITY
        } else {
            down_by(self.lo.ln(), LIBM_SLACK)
        };
        Self::sanitize(lo, up_by(self.hi.ln(), LIBM_SLACK))
    }

    pub fn tanh(&self) -> Interval {
        let lo = down_by(self.lo.tanh(), LIBM_SLACK).max(-1.0);
        let hi = up_by(self.hi.tanh(), LIBM_SLACK).min(1.0);
        Self::sanitize(lo, hi)
    }

    pub fn sin(&self) -> Interval {
        self.periodic(f64::sin, FRAC_PI_2, -FRAC_PI_2)
    }

    pub fn cos(&self) -> Interval {
        self.periodic(f64::cos, 0.0, PI)
    }

    /// Range of a 2π-periodic function bounded by `[-1, 1]` whose maxima sit
    /// at `max_phase + 2kπ` and minima at `min_phase + 2kπ`.
    fn periodic(&self, f: fn(f64) -> f64, max_phase: f64, min_phase: f64) -> Interval {
        let unit = Interval { lo: -1.0, hi: 1.0 };
        if self.is_nan() || !self.is_bounded() || self.width() >= TAU {
            return unit;
        }
        if self.lo.abs().max(self.hi.abs()) > 1e8 {
            return unit;
        }
        let a = f(self.lo);
        let b = f(self.hi);
        let mut lo = down_by(a.min(b), LIBM_SLACK);
        let mut hi = up_by(a.max(b), LIBM_SLACK);
        if self.may_contain_phase(max_phase) {
            hi = 1.0;
        }
        if self.may_contain_phase(min_phase) {
            lo = -1.0;
        }
        Interval {
            lo: lo.max(-1.0),
            hi: hi.min(1.0),
        }
    }

    /// Whether `phase + 2kπ` may lie in the interval for some integer `k`.
    /// Errs on the side of `true` near the endpoints.
    fn may_contain_phase(&self, phase: f64) -> bool {
        let slack = 1e-9 * (1.0 + self.lo.abs().max(self.hi.abs()));
        let k = ((self.lo - slack - phase) / TAU).ceil();
        let candidate = phase + k * TAU;
        candidate <= self.hi + slack
    }
}

/// `x^n` rounded down, for `x >= 0`.
fn pow_down(x: f64, n: u32) -> f64 {
    let mut acc = 1.0f64;
    for _ in 0..n {
        acc = mul_down(acc, x).max(0.0);
    }
    acc
}

/// `x^n` rounded up, for `x >= 0`.
fn pow_up(x: f64, n: u32) -> f64 {
    let mut acc = 1.0f64;
    for _ in 0..n {
        acc = mul_up(acc, x);
    }
    acc
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lo, self.hi)
    }
}

/// Kleene three-valued truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    pub fn from_bool(b: bool) -> Self {
        if b {
            Truth::True
        } else {
            Truth::False
        }
    }

    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    pub fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }
}

/// `a <= b` over all points of both intervals.
pub fn le(a: &Interval, b: &Interval) -> Truth {
    if a.is_nan() || b.is_nan() {
        Truth::Unknown
    } else if a.hi <= b.lo {
        Truth::True
    } else if a.lo > b.hi {
        Truth::False
    } else {
        Truth::Unknown
    }
}

/// `a < b` over all points of both intervals.
pub fn lt(a: &Interval, b: &Interval) -> Truth {
    if a.is_nan() || b.is_nan() {
        Truth::Unknown
    } else if a.hi < b.lo {
        Truth::True
    } else if a.lo >= b.hi {
        Truth::False
    } else {
        Truth::Unknown
    }
}

/// `a == b` over all points of both intervals.
pub fn eq(a: &Interval, b: &Interval) -> Truth {
    if a.is_nan() || b.is_nan() {
        Truth::Unknown
    } else if a.lo == a.hi && b.lo == b.hi && a.lo == b.lo {
        Truth::True
    } else if a.hi < b.lo || b.hi < a.lo {
        Truth::False
    } else {
        Truth::Unknown
    }
}
