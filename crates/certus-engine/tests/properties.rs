mod common;

use certus_engine::translator::{check_agreement, translate};
use certus_engine::verifier::IntervalFactory;
use certus_engine::{
    Activation, Candidate, CandidateVerifier, CegisOptions, CertificateKind, CertificateSpec,
    FunctionFamily, Layer, SampleSet, SmtVerifier, SymbolicCandidate, VerifyOutcome,
};
use certus_ir::proptest_generators::arb_point;
use certus_ir::{DomainRole, Domains, Expr, Rectangle, TimeDomain};
use proptest::prelude::*;

use common::{linear_decay, quick_options, unit_disc, TestResult};

fn smooth_activation() -> impl Strategy<Value = Activation> {
    prop_oneof![
        Just(Activation::Linear),
        Just(Activation::Square),
        Just(Activation::Poly2),
        Just(Activation::Sigmoid),
        Just(Activation::Tanh),
        Just(Activation::Softplus),
        Just(Activation::Cosh),
    ]
}

/// Activations whose growth stays polynomial, safe to stack.
fn tame_activation() -> impl Strategy<Value = Activation> {
    prop_oneof![
        Just(Activation::Linear),
        Just(Activation::Square),
        Just(Activation::Sigmoid),
        Just(Activation::Tanh),
        Just(Activation::Softplus),
    ]
}

fn arb_network() -> impl Strategy<Value = FunctionFamily> {
    (
        (1usize..=4, smooth_activation()),
        proptest::option::of((1usize..=3, tame_activation())),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(first, second, bias, last_layer_ones)| FunctionFamily::Network {
            layers: std::iter::once(first)
                .chain(second)
                .map(|(width, activation)| Layer { width, activation })
                .collect(),
            bias,
            last_layer_ones,
        })
}

fn arb_candidate() -> impl Strategy<Value = Candidate> {
    arb_network().prop_flat_map(|family| {
        let n = family.parameter_count(2);
        proptest::collection::vec(-1.0f64..1.0, n)
            .prop_map(move |params| Candidate::new(family.clone(), params))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn symbolic_form_agrees_with_numeric_form(
        candidate in arb_candidate(),
        points in proptest::collection::vec(arb_point(2, 1.0), 1..20),
    ) {
        let model = linear_decay();
        let symbolic = translate(&candidate, &model, TimeDomain::Continuous).unwrap();
        let mut samples = SampleSet::new(0.0);
        for p in &points {
            samples.insert(DomainRole::Operating, p.clone());
        }
        prop_assert!(check_agreement(&candidate, &symbolic, &samples).is_ok());
        for p in &points {
            let numeric = candidate.derivative_at(&model, TimeDomain::Continuous, p);
            let exact = symbolic.derivative.eval(p);
            prop_assert!((numeric - exact).abs() <= 1e-6 * numeric.abs().max(1.0));
        }
    }

    #[test]
    fn sample_set_never_shrinks_or_duplicates(
        batches in proptest::collection::vec(
            proptest::collection::vec(arb_point(2, 1.0), 0..10), 1..6),
        tolerance in 0.0f64..0.1,
    ) {
        let mut samples = SampleSet::new(tolerance);
        let mut previous = 0;
        for batch in batches {
            // Re-inserting the previous points must not grow the set.
            let before = samples.get(DomainRole::Operating).to_vec();
            samples.extend(DomainRole::Operating, before);
            prop_assert_eq!(samples.len(DomainRole::Operating), previous);

            samples.extend(DomainRole::Operating, batch);
            let now = samples.len(DomainRole::Operating);
            prop_assert!(now >= previous);
            previous = now;
        }
        let points = samples.get(DomainRole::Operating);
        for (i, a) in points.iter().enumerate() {
            for b in &points[i + 1..] {
                let far = a.iter().zip(b).any(|(x, y)| (x - y).abs() > tolerance);
                prop_assert!(far, "{a:?} and {b:?} are duplicates");
            }
        }
    }
}

fn quadratic(params: Vec<f64>) -> SymbolicCandidate {
    let candidate = Candidate::new(
        FunctionFamily::Polynomial {
            min_degree: 2,
            max_degree: 2,
        },
        params,
    );
    translate(&candidate, &linear_decay(), TimeDomain::Continuous).expect("polynomials translate")
}

#[test]
fn verified_candidate_stays_verified() -> TestResult {
    let options = quick_options();
    let spec = CertificateSpec::new(&options);
    let domains = unit_disc();
    let candidate = quadratic(vec![0.5, 0.1, 0.25]);
    let mut verifier = SmtVerifier::new(IntervalFactory, &spec, &domains, &options);
    for _ in 0..3 {
        assert_eq!(verifier.verify(&candidate, false), VerifyOutcome::Verified);
    }
    // A fresh verifier agrees.
    let mut other = SmtVerifier::new(IntervalFactory, &spec, &domains, &options);
    assert_eq!(other.verify(&candidate, false), VerifyOutcome::Verified);
    Ok(())
}

#[test]
fn violation_on_the_unsafe_boundary_is_a_counterexample() -> TestResult {
    let options = CegisOptions {
        certificate: CertificateKind::Barrier,
        counterexample_neighbours: 0,
        ..CegisOptions::default()
    };
    let domains = Domains::new()
        .with(DomainRole::Operating, Rectangle::new(vec![-3.0, -3.0], vec![3.0, 3.0])?)
        .with(DomainRole::Initial, Rectangle::new(vec![-2.0, 0.0], vec![-1.0, 1.0])?)
        .with(DomainRole::Unsafe, Rectangle::new(vec![1.0, 0.0], vec![2.0, 1.0])?);
    let spec = CertificateSpec::for_domains(&options, &domains)?;
    // B = x0 - 1: negative on XI, zero only on the face x0 = 1 of XU.
    let candidate = SymbolicCandidate {
        value: Expr::var(0).sub(Expr::one()),
        derivative: Expr::int(-1),
    };
    let mut verifier = SmtVerifier::new(IntervalFactory, &spec, &domains, &options);
    let VerifyOutcome::Counterexamples(found) = verifier.verify(&candidate, false) else {
        panic!("a boundary violation must not be accepted");
    };
    assert!(found.iter().all(|c| c.condition == "unsafe"));
    assert!(found.iter().all(|c| (c.point[0] - 1.0).abs() <= options.precision));

    // Moving the face off the unsafe box makes the same check pass.
    let shifted = SymbolicCandidate {
        value: Expr::var(0).sub(Expr::ratio(1, 2).expect("ratio")),
        derivative: Expr::int(-1),
    };
    assert_eq!(verifier.verify(&shifted, false), VerifyOutcome::Verified);
    Ok(())
}
