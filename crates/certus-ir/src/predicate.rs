//! Boolean combinations of sign constraints on expressions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expr::Expr;

/// Comparison of an expression against zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Le,
    Lt,
    Ge,
    Gt,
    Eq,
}

impl Relation {
    /// Whether `value ⋈ 0` holds.
    pub fn holds(self, value: f64) -> bool {
        match self {
            Relation::Le => value <= 0.0,
            Relation::Lt => value < 0.0,
            Relation::Ge => value >= 0.0,
            Relation::Gt => value > 0.0,
            Relation::Eq => value == 0.0,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Relation::Le => "<=",
            Relation::Lt => "<",
            Relation::Ge => ">=",
            Relation::Gt => ">",
            Relation::Eq => "==",
        }
    }
}

/// A constraint over the state variables.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    False,
    /// `expr ⋈ 0`.
    Atom { expr: Expr, relation: Relation },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn atom(expr: Expr, relation: Relation) -> Self {
        Predicate::Atom { expr, relation }
    }

    /// `lhs <= rhs`.
    pub fn le(lhs: Expr, rhs: Expr) -> Self {
        Predicate::atom(lhs.sub(rhs), Relation::Le)
    }

    /// `lhs < rhs`.
    pub fn lt(lhs: Expr, rhs: Expr) -> Self {
        Predicate::atom(lhs.sub(rhs), Relation::Lt)
    }

    /// `lhs >= rhs`.
    pub fn ge(lhs: Expr, rhs: Expr) -> Self {
        Predicate::atom(lhs.sub(rhs), Relation::Ge)
    }

    /// `lhs > rhs`.
    pub fn gt(lhs: Expr, rhs: Expr) -> Self {
        Predicate::atom(lhs.sub(rhs), Relation::Gt)
    }

    pub fn and(parts: Vec<Predicate>) -> Self {
        Predicate::And(parts)
    }

    pub fn or(parts: Vec<Predicate>) -> Self {
        Predicate::Or(parts)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Evaluate numerically at a point.
    pub fn holds(&self, point: &[f64]) -> bool {
        match self {
            Predicate::True => true,
            Predicate::False => false,
            Predicate::Atom { expr, relation } => relation.holds(expr.eval(point)),
            Predicate::And(parts) => parts.iter().all(|p| p.holds(point)),
            Predicate::Or(parts) => parts.iter().any(|p| p.holds(point)),
            Predicate::Not(inner) => !inner.holds(point),
        }
    }

    /// Push a negation down to the atoms.
    ///
    /// `¬(e <= 0)` becomes `e > 0` and so on; an equality becomes a
    /// disjunction of the two strict inequalities.
    pub fn negated(&self) -> Predicate {
        match self {
            Predicate::True => Predicate::False,
            Predicate::False => Predicate::True,
            Predicate::Atom { expr, relation } => match relation {
                Relation::Le => Predicate::atom(expr.clone(), Relation::Gt),
                Relation::Lt => Predicate::atom(expr.clone(), Relation::Ge),
                Relation::Ge => Predicate::atom(expr.clone(), Relation::Lt),
                Relation::Gt => Predicate::atom(expr.clone(), Relation::Le),
                Relation::Eq => Predicate::Or(vec![
                    Predicate::atom(expr.clone(), Relation::Lt),
                    Predicate::atom(expr.clone(), Relation::Gt),
                ]),
            },
            Predicate::And(parts) => Predicate::Or(parts.iter().map(Predicate::negated).collect()),
            Predicate::Or(parts) => Predicate::And(parts.iter().map(Predicate::negated).collect()),
            Predicate::Not(inner) => (**inner).clone(),
        }
    }

    /// One past the highest variable index referenced.
    pub fn arity(&self) -> usize {
        match self {
            Predicate::True | Predicate::False => 0,
            Predicate::Atom { expr, .. } => expr.arity(),
            Predicate::And(parts) | Predicate::Or(parts) => {
                parts.iter().map(Predicate::arity).max().unwrap_or(0)
            }
            Predicate::Not(inner) => inner.arity(),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, parts: &[Predicate], sep: &str) -> fmt::Result {
            f.write_str("(")?;
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    f.write_str(sep)?;
                }
                write!(f, "{part}")?;
            }
            f.write_str(")")
        }
        match self {
            Predicate::True => f.write_str("true"),
            Predicate::False => f.write_str("false"),
            Predicate::Atom { expr, relation } => write!(f, "{expr} {} 0", relation.symbol()),
            Predicate::And(parts) => join(f, parts, " && "),
            Predicate::Or(parts) => join(f, parts, " || "),
            Predicate::Not(inner) => write!(f, "!({inner})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_points_satisfy_non_strict_atoms() {
        let p = Predicate::le(Expr::var(0), Expr::one());
        assert!(p.holds(&[1.0]));
        assert!(!Predicate::lt(Expr::var(0), Expr::one()).holds(&[1.0]));
    }

    #[test]
    fn negation_flips_strictness() {
        let p = Predicate::and(vec![
            Predicate::ge(Expr::var(0), Expr::zero()),
            Predicate::atom(Expr::var(1), Relation::Eq),
        ]);
        let n = p.negated();
        for point in [[0.0, 0.0], [-1.0, 0.0], [1.0, 2.0], [0.0, -0.5]] {
            assert_eq!(n.holds(&point), !p.holds(&point), "at {point:?}");
        }
    }

    #[test]
    fn display_is_readable() {
        let p = Predicate::or(vec![
            Predicate::atom(Expr::var(0), Relation::Gt),
            Predicate::True,
        ]);
        assert_eq!(p.to_string(), "(x0 > 0 || true)");
    }
}
