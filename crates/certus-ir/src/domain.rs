//! State-space regions with a role in a certificate's conditions.
//!
//! Every domain exposes the same region twice: a numeric membership test and
//! sampler for the learner, and a symbolic [`Predicate`] for the verifier.
//! Boundaries are inclusive in both views.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::expr::Expr;
use crate::predicate::Predicate;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("lower and upper corners have different lengths ({lower} vs {upper})")]
    CornerLengthMismatch { lower: usize, upper: usize },
    #[error("lower corner exceeds upper corner in dimension {dim}")]
    InvertedBounds { dim: usize },
    #[error("domain coordinates must be finite")]
    NonFinite,
    #[error("invalid radius: {0}")]
    InvalidRadius(String),
    #[error("centre must have at least one coordinate")]
    EmptyCentre,
    #[error("union needs at least one member")]
    EmptyUnion,
    #[error("union members disagree on dimension ({expected} vs {found})")]
    UnionDimensionMismatch { expected: usize, found: usize },
    #[error("domain for role {role} has dimension {found}, model has {expected} variables")]
    DimensionMismatch {
        role: DomainRole,
        expected: usize,
        found: usize,
    },
}

/// The part a region plays in a certificate's conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DomainRole {
    /// Operating region over which the derivative conditions must hold.
    #[serde(rename = "XD")]
    Operating,
    /// Initial states.
    #[serde(rename = "XI")]
    Initial,
    /// States that must never be reached.
    #[serde(rename = "XU")]
    Unsafe,
}

impl DomainRole {
    pub fn symbol(self) -> &'static str {
        match self {
            DomainRole::Operating => "XD",
            DomainRole::Initial => "XI",
            DomainRole::Unsafe => "XU",
        }
    }
}

impl fmt::Display for DomainRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    /// Smallest box containing both.
    pub fn hull(&self, other: &Bounds) -> Bounds {
        Bounds {
            lower: self
                .lower
                .iter()
                .zip(&other.lower)
                .map(|(a, b)| a.min(*b))
                .collect(),
            upper: self
                .upper
                .iter()
                .zip(&other.upper)
                .map(|(a, b)| a.max(*b))
                .collect(),
        }
    }

    /// `lower_i <= x_i <= upper_i` for every dimension.
    pub fn predicate(&self) -> Predicate {
        let mut parts = Vec::with_capacity(2 * self.lower.len());
        for (i, (lo, hi)) in self.lower.iter().zip(&self.upper).enumerate() {
            if let (Some(lo), Some(hi)) = (Expr::from_f64(*lo), Expr::from_f64(*hi)) {
                parts.push(Predicate::ge(Expr::var(i), lo));
                parts.push(Predicate::le(Expr::var(i), hi));
            }
        }
        Predicate::and(parts)
    }
}

/// A geometric region of state space.
pub trait Domain: fmt::Debug + Send + Sync {
    fn dimension(&self) -> usize;

    /// Numeric membership, boundary included.
    fn contains(&self, point: &[f64]) -> bool;

    /// Symbolic membership, boundary included.
    fn membership(&self) -> Predicate;

    fn bounds(&self) -> Bounds;

    /// Draw `batch_size` points from the region.
    fn sample(&self, rng: &mut dyn RngCore, batch_size: usize) -> Vec<Vec<f64>>;
}

fn check_finite(values: &[f64]) -> Result<(), DomainError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(DomainError::NonFinite)
    }
}

fn exact(value: f64) -> Result<Expr, DomainError> {
    Expr::from_f64(value).ok_or(DomainError::NonFinite)
}

/// Finite, non-empty centre.
fn check_centre(centre: &[f64]) -> Result<(), DomainError> {
    if centre.is_empty() {
        return Err(DomainError::EmptyCentre);
    }
    check_finite(centre)
}

fn squared_distance_expr(centre: &[f64]) -> Result<Expr, DomainError> {
    let terms = centre
        .iter()
        .enumerate()
        .map(|(i, c)| Ok(Expr::var(i).sub(exact(*c)?).pow(2)))
        .collect::<Result<Vec<_>, DomainError>>()?;
    Ok(Expr::sum(terms))
}

fn next_up(x: f64) -> f64 {
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

fn next_down(x: f64) -> f64 {
    -next_up(-x)
}

/// Box around a ball, rounded outward so it contains the exact ball.
fn ball_bounds(centre: &[f64], radius: f64) -> Bounds {
    Bounds {
        lower: centre.iter().map(|c| next_down(c - radius)).collect(),
        upper: centre.iter().map(|c| next_up(c + radius)).collect(),
    }
}

fn squared_distance(point: &[f64], centre: &[f64]) -> f64 {
    point
        .iter()
        .zip(centre)
        .map(|(p, c)| (p - c) * (p - c))
        .sum()
}

/// Standard normal draw (Box–Muller).
fn standard_normal(rng: &mut dyn RngCore) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Uniform direction on the unit sphere in `n` dimensions.
fn unit_direction(rng: &mut dyn RngCore, n: usize) -> Vec<f64> {
    loop {
        let v: Vec<f64> = (0..n).map(|_| standard_normal(rng)).collect();
        let norm = v.iter().map(|c| c * c).sum::<f64>().sqrt();
        if norm > 1e-12 {
            return v.into_iter().map(|c| c / norm).collect();
        }
    }
}

/// Point uniformly distributed in the shell `inner <= |x - centre| <= outer`.
fn sample_shell(rng: &mut dyn RngCore, centre: &[f64], inner: f64, outer: f64) -> Vec<f64> {
    let n = centre.len() as i32;
    let u: f64 = rng.gen_range(0.0..=1.0);
    let lo = inner.powi(n);
    let hi = outer.powi(n);
    let radius = (lo + u * (hi - lo)).powf(1.0 / f64::from(n));
    unit_direction(rng, centre.len())
        .into_iter()
        .zip(centre)
        .map(|(d, c)| c + radius * d)
        .collect()
}

/// Hyper-rectangle `[lower, upper]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Rectangle {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl Rectangle {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, DomainError> {
        if lower.len() != upper.len() {
            return Err(DomainError::CornerLengthMismatch {
                lower: lower.len(),
                upper: upper.len(),
            });
        }
        check_finite(&lower)?;
        check_finite(&upper)?;
        if let Some(dim) = lower.iter().zip(&upper).position(|(lo, hi)| lo > hi) {
            return Err(DomainError::InvertedBounds { dim });
        }
        Ok(Self { lower, upper })
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }
}

impl Domain for Rectangle {
    fn dimension(&self) -> usize {
        self.lower.len()
    }

    fn contains(&self, point: &[f64]) -> bool {
        point.len() == self.lower.len()
            && point
                .iter()
                .zip(self.lower.iter().zip(&self.upper))
                .all(|(x, (lo, hi))| *lo <= *x && *x <= *hi)
    }

    fn membership(&self) -> Predicate {
        self.bounds().predicate()
    }

    fn bounds(&self) -> Bounds {
        Bounds {
            lower: self.lower.clone(),
            upper: self.upper.clone(),
        }
    }

    fn sample(&self, rng: &mut dyn RngCore, batch_size: usize) -> Vec<Vec<f64>> {
        (0..batch_size)
            .map(|_| {
                self.lower
                    .iter()
                    .zip(&self.upper)
                    .map(|(lo, hi)| rng.gen_range(*lo..=*hi))
                    .collect()
            })
            .collect()
    }
}

/// Closed ball `|x - centre| <= radius`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sphere {
    centre: Vec<f64>,
    radius: f64,
    membership: Predicate,
}

impl Sphere {
    pub fn new(centre: Vec<f64>, radius: f64) -> Result<Self, DomainError> {
        check_centre(&centre)?;
        if !(radius.is_finite() && radius > 0.0) {
            return Err(DomainError::InvalidRadius(format!(
                "sphere radius must be positive, got {radius}"
            )));
        }
        let membership = Predicate::le(squared_distance_expr(&centre)?, exact(radius)?.pow(2));
        Ok(Self {
            centre,
            radius,
            membership,
        })
    }

    pub fn centre(&self) -> &[f64] {
        &self.centre
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }
}

impl Domain for Sphere {
    fn dimension(&self) -> usize {
        self.centre.len()
    }

    fn contains(&self, point: &[f64]) -> bool {
        point.len() == self.centre.len()
            && squared_distance(point, &self.centre) <= self.radius * self.radius
    }

    fn membership(&self) -> Predicate {
        self.membership.clone()
    }

    fn bounds(&self) -> Bounds {
        ball_bounds(&self.centre, self.radius)
    }

    fn sample(&self, rng: &mut dyn RngCore, batch_size: usize) -> Vec<Vec<f64>> {
        (0..batch_size)
            .map(|_| loop {
                let p = sample_shell(rng, &self.centre, 0.0, self.radius);
                if self.contains(&p) {
                    break p;
                }
            })
            .collect()
    }
}

/// Spherical shell `inner <= |x - centre| <= outer`.
#[derive(Debug, Clone, PartialEq)]
pub struct Torus {
    centre: Vec<f64>,
    outer: f64,
    inner: f64,
    membership: Predicate,
}

impl Torus {
    pub fn new(centre: Vec<f64>, outer: f64, inner: f64) -> Result<Self, DomainError> {
        check_centre(&centre)?;
        if !(outer.is_finite() && inner.is_finite() && 0.0 <= inner && inner < outer) {
            return Err(DomainError::InvalidRadius(format!(
                "torus needs 0 <= inner < outer, got inner={inner}, outer={outer}"
            )));
        }
        let d = squared_distance_expr(&centre)?;
        let membership = Predicate::and(vec![
            Predicate::ge(d.clone(), exact(inner)?.pow(2)),
            Predicate::le(d, exact(outer)?.pow(2)),
        ]);
        Ok(Self {
            centre,
            outer,
            inner,
            membership,
        })
    }
}

impl Domain for Torus {
    fn dimension(&self) -> usize {
        self.centre.len()
    }

    fn contains(&self, point: &[f64]) -> bool {
        if point.len() != self.centre.len() {
            return false;
        }
        let d = squared_distance(point, &self.centre);
        self.inner * self.inner <= d && d <= self.outer * self.outer
    }

    fn membership(&self) -> Predicate {
        self.membership.clone()
    }

    fn bounds(&self) -> Bounds {
        ball_bounds(&self.centre, self.outer)
    }

    fn sample(&self, rng: &mut dyn RngCore, batch_size: usize) -> Vec<Vec<f64>> {
        (0..batch_size)
            .map(|_| loop {
                let p = sample_shell(rng, &self.centre, self.inner, self.outer);
                if self.contains(&p) {
                    break p;
                }
            })
            .collect()
    }
}

/// Union of regions of equal dimension.
#[derive(Debug, Clone)]
pub struct Union {
    members: Vec<Arc<dyn Domain>>,
}

impl Union {
    pub fn new(members: Vec<Arc<dyn Domain>>) -> Result<Self, DomainError> {
        let first = members.first().ok_or(DomainError::EmptyUnion)?;
        let expected = first.dimension();
        if let Some(bad) = members.iter().find(|m| m.dimension() != expected) {
            return Err(DomainError::UnionDimensionMismatch {
                expected,
                found: bad.dimension(),
            });
        }
        Ok(Self { members })
    }

    /// Union of exactly two regions.
    pub fn of(a: impl Domain + 'static, b: impl Domain + 'static) -> Result<Self, DomainError> {
        Self::new(vec![Arc::new(a), Arc::new(b)])
    }

    pub fn members(&self) -> &[Arc<dyn Domain>] {
        &self.members
    }
}

impl Domain for Union {
    fn dimension(&self) -> usize {
        self.members[0].dimension()
    }

    fn contains(&self, point: &[f64]) -> bool {
        self.members.iter().any(|m| m.contains(point))
    }

    fn membership(&self) -> Predicate {
        Predicate::or(self.members.iter().map(|m| m.membership()).collect())
    }

    fn bounds(&self) -> Bounds {
        let mut bounds = self.members[0].bounds();
        for member in &self.members[1..] {
            bounds = bounds.hull(&member.bounds());
        }
        bounds
    }

    /// Splits the batch evenly across members; earlier members take the remainder.
    fn sample(&self, rng: &mut dyn RngCore, batch_size: usize) -> Vec<Vec<f64>> {
        let k = self.members.len();
        let mut out = Vec::with_capacity(batch_size);
        for (i, member) in self.members.iter().enumerate() {
            let share = batch_size / k + usize::from(i < batch_size % k);
            out.extend(member.sample(rng, share));
        }
        out
    }
}

/// Fixed role → region mapping for one synthesis run.
#[derive(Debug, Clone, Default)]
pub struct Domains {
    regions: IndexMap<DomainRole, Arc<dyn Domain>>,
}

impl Domains {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, role: DomainRole, domain: impl Domain + 'static) -> Self {
        self.regions.insert(role, Arc::new(domain));
        self
    }

    pub fn insert(&mut self, role: DomainRole, domain: Arc<dyn Domain>) -> Option<Arc<dyn Domain>> {
        self.regions.insert(role, domain)
    }

    pub fn get(&self, role: DomainRole) -> Option<&Arc<dyn Domain>> {
        self.regions.get(&role)
    }

    pub fn contains_role(&self, role: DomainRole) -> bool {
        self.regions.contains_key(&role)
    }

    pub fn roles(&self) -> impl Iterator<Item = DomainRole> + '_ {
        self.regions.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DomainRole, &Arc<dyn Domain>)> {
        self.regions.iter().map(|(role, d)| (*role, d))
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Every region must live in an `n_vars`-dimensional space.
    pub fn check_dimension(&self, n_vars: usize) -> Result<(), DomainError> {
        for (role, domain) in self.iter() {
            if domain.dimension() != n_vars {
                return Err(DomainError::DimensionMismatch {
                    role,
                    expected: n_vars,
                    found: domain.dimension(),
                });
            }
        }
        Ok(())
    }
}
