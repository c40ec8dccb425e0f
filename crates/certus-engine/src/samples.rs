//! Per-role training points.
//!
//! The set only grows: points are appended by the loop and never removed.
//! A point within `tolerance` (max-norm) of one already stored for the same
//! role is dropped.

use certus_ir::{DomainRole, Domains};
use indexmap::IndexMap;
use rand::RngCore;

use crate::config::ConfigurationError;

#[derive(Debug, Clone, Default)]
pub struct SampleSet {
    points: IndexMap<DomainRole, Vec<Vec<f64>>>,
    tolerance: f64,
}

fn within(a: &[f64], b: &[f64], tolerance: f64) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tolerance)
}

impl SampleSet {
    pub fn new(tolerance: f64) -> Self {
        Self {
            points: IndexMap::new(),
            tolerance,
        }
    }

    /// Draw `batch_size` points from the domain of every role in `roles`.
    pub fn sample(
        domains: &Domains,
        roles: &[DomainRole],
        batch_size: usize,
        rng: &mut dyn RngCore,
        tolerance: f64,
    ) -> Result<Self, ConfigurationError> {
        let mut set = Self::new(tolerance);
        for &role in roles {
            let domain = domains.get(role).ok_or(ConfigurationError::InvalidOption {
                option: "domains",
                reason: format!("no domain for role {role}"),
            })?;
            set.points.entry(role).or_default();
            set.extend(role, domain.sample(rng, batch_size));
        }
        Ok(set)
    }

    /// Append a point; returns `false` when it was a near-duplicate or not finite.
    pub fn insert(&mut self, role: DomainRole, point: Vec<f64>) -> bool {
        if point.iter().any(|x| !x.is_finite()) {
            return false;
        }
        let tolerance = self.tolerance;
        let existing = self.points.entry(role).or_default();
        if existing.iter().any(|p| within(p, &point, tolerance)) {
            return false;
        }
        existing.push(point);
        true
    }

    /// Append several points; returns how many were kept.
    pub fn extend(&mut self, role: DomainRole, points: impl IntoIterator<Item = Vec<f64>>) -> usize {
        points
            .into_iter()
            .map(|p| usize::from(self.insert(role, p)))
            .sum()
    }

    pub fn get(&self, role: DomainRole) -> &[Vec<f64>] {
        self.points.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self, role: DomainRole) -> usize {
        self.get(role).len()
    }

    pub fn total(&self) -> usize {
        self.points.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn roles(&self) -> impl Iterator<Item = DomainRole> + '_ {
        self.points.keys().copied()
    }

    pub fn counts(&self) -> IndexMap<DomainRole, usize> {
        self.points.iter().map(|(r, p)| (*r, p.len())).collect()
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }
}
