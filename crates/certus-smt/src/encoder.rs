//! Lowering of IR expressions and predicates to solver terms.

use certus_ir::{Expr, Predicate, Relation};

use crate::solver::SmtSolver;
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

/// Solver name of state variable `x_i`.
pub fn var_name(index: usize) -> String {
    format!("x{index}")
}

/// Names of the first `n_vars` state variables.
pub fn state_vars(n_vars: usize) -> Vec<String> {
    (0..n_vars).map(var_name).collect()
}

/// Declare `x0 … x{n-1}` as reals.
pub fn declare_state<S: SmtSolver>(solver: &mut S, n_vars: usize) -> Result<(), S::Error> {
    for name in state_vars(n_vars) {
        solver.declare_var(&name, &SmtSort::Real)?;
    }
    Ok(())
}

pub fn encode_expr(expr: &Expr) -> SmtTerm {
    match expr {
        Expr::Var(i) => SmtTerm::var(var_name(*i)),
        Expr::Const(c) => SmtTerm::real(c.exact().clone()),
        Expr::Add(a, b) => encode_expr(a).add(encode_expr(b)),
        Expr::Sub(a, b) => encode_expr(a).sub(encode_expr(b)),
        Expr::Mul(a, b) => encode_expr(a).mul(encode_expr(b)),
        Expr::Div(a, b) => encode_expr(a).div(encode_expr(b)),
        Expr::Neg(a) => encode_expr(a).neg(),
        Expr::Pow(a, n) => encode_expr(a).pow(*n),
        Expr::Sin(a) => encode_expr(a).sin(),
        Expr::Cos(a) => encode_expr(a).cos(),
        Expr::Exp(a) => encode_expr(a).exp(),
        Expr::Log(a) => encode_expr(a).log(),
        Expr::Tanh(a) => encode_expr(a).tanh(),
    }
}

fn compare(lhs: SmtTerm, relation: Relation, rhs: SmtTerm) -> SmtTerm {
    match relation {
        Relation::Le => lhs.le(rhs),
        Relation::Lt => lhs.lt(rhs),
        Relation::Ge => lhs.ge(rhs),
        Relation::Gt => lhs.gt(rhs),
        Relation::Eq => lhs.eq(rhs),
    }
}

/// `expr ⋈ 0`, written as `a ⋈ b` when the expression is a difference so
/// that variable bounds stay recognisable to the backends.
fn encode_atom(expr: &Expr, relation: Relation) -> SmtTerm {
    match expr {
        Expr::Sub(a, b) => compare(encode_expr(a), relation, encode_expr(b)),
        other => compare(encode_expr(other), relation, SmtTerm::int(0)),
    }
}

pub fn encode_predicate(predicate: &Predicate) -> SmtTerm {
    match predicate {
        Predicate::True => SmtTerm::bool(true),
        Predicate::False => SmtTerm::bool(false),
        Predicate::Atom { expr, relation } => encode_atom(expr, *relation),
        Predicate::And(parts) => SmtTerm::and(parts.iter().map(encode_predicate).collect()),
        Predicate::Or(parts) => SmtTerm::or(parts.iter().map(encode_predicate).collect()),
        Predicate::Not(inner) => encode_predicate(inner).not(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_atoms_keep_variable_on_the_left() {
        let p = Predicate::ge(Expr::var(1), Expr::int(-2));
        assert_eq!(
            encode_predicate(&p),
            SmtTerm::var("x1").ge(SmtTerm::int(-2))
        );
    }

    #[test]
    fn non_difference_atoms_compare_against_zero() {
        let p = Predicate::atom(Expr::var(0).pow(2).add(Expr::var(1)), Relation::Lt);
        assert_eq!(
            encode_predicate(&p),
            SmtTerm::var("x0")
                .pow(2)
                .add(SmtTerm::var("x1"))
                .lt(SmtTerm::int(0))
        );
    }

    #[test]
    fn state_variable_names() {
        assert_eq!(state_vars(3), vec!["x0", "x1", "x2"]);
    }
}
