//! Proptest strategies for expressions, points and regions.

use proptest::prelude::*;

use crate::domain::Rectangle;
use crate::expr::Expr;

/// Polynomial expression over `n_vars` variables with small integer constants.
///
/// Depth is bounded so evaluation stays cheap and finite on small boxes.
pub fn arb_polynomial(n_vars: usize) -> impl Strategy<Value = Expr> {
    let n_vars = n_vars.max(1);
    let leaf = prop_oneof![
        (0..n_vars).prop_map(Expr::var),
        (-5i64..=5).prop_map(Expr::int),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.add(b)),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.sub(b)),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.mul(b)),
            inner.clone().prop_map(Expr::neg),
            (inner, 2u32..=3).prop_map(|(a, n)| a.pow(n)),
        ]
    })
}

/// Expression that may also use `sin`, `cos` and `tanh`.
pub fn arb_smooth_expr(n_vars: usize) -> impl Strategy<Value = Expr> {
    arb_polynomial(n_vars).prop_recursive(2, 32, 2, |inner| {
        prop_oneof![
            inner.clone().prop_map(Expr::sin),
            inner.clone().prop_map(Expr::cos),
            inner.clone().prop_map(Expr::tanh),
            (inner.clone(), inner).prop_map(|(a, b)| a.add(b)),
        ]
    })
}

/// Point in `[-bound, bound]^n`.
pub fn arb_point(n_vars: usize, bound: f64) -> impl Strategy<Value = Vec<f64>> {
    proptest::collection::vec(-bound..=bound, n_vars)
}

/// Non-degenerate rectangle inside `[-bound, bound]^n`.
pub fn arb_rectangle(n_vars: usize, bound: f64) -> impl Strategy<Value = Rectangle> {
    proptest::collection::vec((-bound..bound, 0.01f64..1.0), n_vars).prop_filter_map(
        "rectangle corners must be ordered",
        move |sides| {
            let lower: Vec<f64> = sides.iter().map(|(lo, _)| *lo).collect();
            let upper: Vec<f64> = sides
                .iter()
                .map(|(lo, width)| lo + width * (bound - lo))
                .collect();
            Rectangle::new(lower, upper).ok()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;

    proptest! {
        #[test]
        fn derivative_matches_finite_difference(e in arb_polynomial(2), p in arb_point(2, 1.0)) {
            let h = 1e-6;
            let d = e.derivative(0).eval(&p);
            let fwd = e.eval(&[p[0] + h, p[1]]);
            let bwd = e.eval(&[p[0] - h, p[1]]);
            let fd = (fwd - bwd) / (2.0 * h);
            let tolerance = 1e-4 * (1.0 + d.abs()) + 1e-8 * (1.0 + fwd.abs() + bwd.abs());
            prop_assert!((d - fd).abs() <= tolerance, "{e}: {d} vs {fd}");
        }

        #[test]
        fn rectangle_membership_predicate_agrees(r in arb_rectangle(2, 3.0), p in arb_point(2, 3.0)) {
            prop_assert_eq!(r.contains(&p), r.membership().holds(&p));
        }

        #[test]
        fn substituting_identity_is_noop(e in arb_smooth_expr(2), p in arb_point(2, 2.0)) {
            let same = e.substitute(&[Expr::var(0), Expr::var(1)]);
            let (a, b) = (e.eval(&p), same.eval(&p));
            prop_assert!((a - b).abs() <= 1e-9 * (1.0 + a.abs()));
        }
    }
}
