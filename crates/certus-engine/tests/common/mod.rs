#![allow(dead_code)]

use certus_engine::verifier::{CandidateVerifier, VerifyOutcome};
use certus_engine::{
    Activation, CegisOptions, CertificateKind, FunctionFamily, Layer, SymbolicCandidate,
};
use certus_ir::{DomainRole, Domains, DynamicalModel, Expr, Rectangle, Sphere, Union};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// `dx/dt = -x`, `dy/dt = -y`.
pub fn linear_decay() -> DynamicalModel {
    DynamicalModel::new("linear_decay", vec![Expr::var(0).neg(), Expr::var(1).neg()])
        .expect("two-variable field")
}

pub fn unit_disc() -> Domains {
    Domains::new().with(
        DomainRole::Operating,
        Sphere::new(vec![0.0, 0.0], 1.0).expect("valid sphere"),
    )
}

/// Initial ball around the origin, unsafe box in the first quadrant.
pub fn barrier_domains() -> Domains {
    Domains::new()
        .with(
            DomainRole::Operating,
            Rectangle::new(vec![-3.0, -3.0], vec![3.0, 3.0]).expect("valid rectangle"),
        )
        .with(
            DomainRole::Initial,
            Sphere::new(vec![0.0, 0.0], 0.5).expect("valid sphere"),
        )
        .with(
            DomainRole::Unsafe,
            Rectangle::new(vec![1.0, 1.0], vec![2.0, 2.0]).expect("valid rectangle"),
        )
}

fn rect(lower: [f64; 2], upper: [f64; 2]) -> Rectangle {
    Rectangle::new(lower.to_vec(), upper.to_vec()).expect("valid rectangle")
}

fn sphere(centre: [f64; 2], radius: f64) -> Sphere {
    Sphere::new(centre.to_vec(), radius).expect("valid sphere")
}

fn sigmoid_network(width: usize) -> FunctionFamily {
    FunctionFamily::Network {
        layers: vec![Layer {
            width,
            activation: Activation::Sigmoid,
        }],
        bias: true,
        last_layer_ones: false,
    }
}

/// Polynomial barrier benchmark with its usual options.
pub fn barr1() -> (DynamicalModel, Domains, CegisOptions) {
    let (x, y) = (Expr::var(0), Expr::var(1));
    let field = vec![
        y.clone().add(Expr::int(2).mul(x.clone()).mul(y.clone())),
        x.clone()
            .neg()
            .sub(y.pow(2))
            .add(Expr::int(2).mul(x.pow(2))),
    ];
    let domains = Domains::new()
        .with(DomainRole::Operating, rect([-2.0, -2.0], [2.0, 2.0]))
        .with(DomainRole::Initial, rect([0.0, 1.0], [1.0, 2.0]))
        .with(DomainRole::Unsafe, rect([-2.0, -2.0], [-0.5, -0.5]));
    let options = CegisOptions {
        certificate: CertificateKind::Barrier,
        family: sigmoid_network(5),
        max_iters: 25,
        ..CegisOptions::default()
    };
    (
        DynamicalModel::new("barr1", field).expect("two-variable field"),
        domains,
        options,
    )
}

/// Van der Pol style barrier benchmark over unions of regions.
pub fn barr3() -> (DynamicalModel, Domains, CegisOptions) {
    let (x, y) = (Expr::var(0), Expr::var(1));
    let third = Expr::ratio(1, 3).expect("nonzero denominator");
    let field = vec![
        y.clone(),
        x.clone().neg().add(third.mul(x.pow(3))).sub(y),
    ];
    let initial = Union::of(
        sphere([1.5, 0.0], 0.5),
        Union::of(rect([-1.8, -0.1], [-1.2, 0.1]), rect([-1.4, -0.5], [-1.2, 0.1]))
            .expect("same dimension"),
    )
    .expect("same dimension");
    let unsafe_set = Union::of(
        sphere([-1.0, -1.0], 0.4),
        Union::of(rect([0.4, 0.1], [0.6, 0.5]), rect([0.4, 0.1], [0.8, 0.3]))
            .expect("same dimension"),
    )
    .expect("same dimension");
    let domains = Domains::new()
        .with(DomainRole::Operating, rect([-3.5, -2.0], [2.0, 1.0]))
        .with(DomainRole::Initial, initial)
        .with(DomainRole::Unsafe, unsafe_set);
    let options = CegisOptions {
        certificate: CertificateKind::Barrier,
        family: sigmoid_network(5),
        symmetric_belt: false,
        max_iters: 1000,
        ..CegisOptions::default()
    };
    (
        DynamicalModel::new("barr3", field).expect("two-variable field"),
        domains,
        options,
    )
}

/// Defaults with a smaller batch so the suites stay quick.
pub fn quick_options() -> CegisOptions {
    CegisOptions {
        batch_size: 200,
        max_epochs: 300,
        ..CegisOptions::default()
    }
}

/// Counts calls and reports every candidate as verified.
#[derive(Debug, Default)]
pub struct CountingVerifier {
    pub calls: usize,
}

impl CandidateVerifier for CountingVerifier {
    fn verify(&mut self, _candidate: &SymbolicCandidate, _relaxed: bool) -> VerifyOutcome {
        self.calls += 1;
        VerifyOutcome::Verified
    }
}

/// Points of `[-1, 1]^2` on a regular grid.
pub fn grid(steps: usize) -> Vec<Vec<f64>> {
    let h = 2.0 / steps as f64;
    let mut points = Vec::new();
    for i in 0..=steps {
        for j in 0..=steps {
            points.push(vec![-1.0 + h * i as f64, -1.0 + h * j as f64]);
        }
    }
    points
}
