//! Built-in benchmark systems.

use certus_engine::{Activation, CegisOptions, CertificateKind, FunctionFamily, Layer};
use certus_ir::{DomainRole, Domains, DynamicalModel, Expr, Rectangle, Sphere, Union};
use miette::IntoDiagnostic;

/// A model, its domains and the options it is usually run with.
pub(crate) struct Problem {
    pub(crate) model: DynamicalModel,
    pub(crate) domains: Domains,
    pub(crate) options: CegisOptions,
}

pub(crate) struct Benchmark {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    build: fn() -> miette::Result<Problem>,
}

impl Benchmark {
    pub(crate) fn build(&self) -> miette::Result<Problem> {
        (self.build)()
    }
}

pub(crate) const BENCHMARKS: &[Benchmark] = &[
    Benchmark {
        name: "linear2d",
        description: "Lyapunov, dx = -x, dy = -y, quadratic polynomial",
        build: linear2d,
    },
    Benchmark {
        name: "nonpoly1",
        description: "Lyapunov, dx = -x + xy, dy = -y, linear+square network",
        build: nonpoly1,
    },
    Benchmark {
        name: "barr1",
        description: "barrier, polynomial field, sigmoid network",
        build: barr1,
    },
    Benchmark {
        name: "barr3",
        description: "barrier, Van der Pol style field, unions of spheres and boxes \
            (hard: usually exhausts its budget or times out)",
        build: barr3,
    },
];

pub(crate) fn find(name: &str) -> Option<&'static Benchmark> {
    BENCHMARKS.iter().find(|b| b.name == name)
}

fn x() -> Expr {
    Expr::var(0)
}

fn y() -> Expr {
    Expr::var(1)
}

fn int(n: i64) -> Expr {
    Expr::int(n)
}

fn rect(lower: [f64; 2], upper: [f64; 2]) -> miette::Result<Rectangle> {
    Rectangle::new(lower.to_vec(), upper.to_vec()).into_diagnostic()
}

fn sphere(centre: [f64; 2], radius: f64) -> miette::Result<Sphere> {
    Sphere::new(centre.to_vec(), radius).into_diagnostic()
}

fn model(name: &str, field: Vec<Expr>) -> miette::Result<DynamicalModel> {
    DynamicalModel::new(name, field).into_diagnostic()
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

fn linear2d() -> miette::Result<Problem> {
    Ok(Problem {
        model: model("linear2d", vec![x().neg(), y().neg()])?,
        domains: Domains::new().with(DomainRole::Operating, sphere([0.0, 0.0], 1.0)?),
        options: CegisOptions::default(),
    })
}

fn nonpoly1() -> miette::Result<Problem> {
    let field = vec![x().neg().add(x().mul(y())), y().neg()];
    let layers = [Activation::Linear, Activation::Square]
        .into_iter()
        .map(|activation| Layer {
            width: 20,
            activation,
        })
        .collect();
    Ok(Problem {
        model: model("nonpoly1", field)?,
        domains: Domains::new().with(DomainRole::Operating, sphere([0.0, 0.0], 1.0)?),
        options: CegisOptions {
            family: FunctionFamily::Network {
                layers,
                bias: false,
                last_layer_ones: true,
            },
            ..CegisOptions::default()
        },
    })
}

fn barr1() -> miette::Result<Problem> {
    let field = vec![
        y().add(int(2).mul(x()).mul(y())),
        x().neg().sub(y().pow(2)).add(int(2).mul(x().pow(2))),
    ];
    Ok(Problem {
        model: model("barr1", field)?,
        domains: Domains::new()
            .with(DomainRole::Operating, rect([-2.0, -2.0], [2.0, 2.0])?)
            .with(DomainRole::Initial, rect([0.0, 1.0], [1.0, 2.0])?)
            .with(DomainRole::Unsafe, rect([-2.0, -2.0], [-0.5, -0.5])?),
        options: CegisOptions {
            certificate: CertificateKind::Barrier,
            family: sigmoid_network(5),
            max_iters: 25,
            ..CegisOptions::default()
        },
    })
}

fn barr3() -> miette::Result<Problem> {
    let third = Expr::ratio(1, 3).ok_or_else(|| miette::miette!("invalid constant 1/3"))?;
    let field = vec![y(), x().neg().add(third.mul(x().pow(3))).sub(y())];
    let initial = Union::of(
        sphere([1.5, 0.0], 0.5)?,
        Union::of(
            rect([-1.8, -0.1], [-1.2, 0.1])?,
            rect([-1.4, -0.5], [-1.2, 0.1])?,
        )
        .into_diagnostic()?,
    )
    .into_diagnostic()?;
    let unsafe_set = Union::of(
        sphere([-1.0, -1.0], 0.4)?,
        Union::of(rect([0.4, 0.1], [0.6, 0.5])?, rect([0.4, 0.1], [0.8, 0.3])?)
            .into_diagnostic()?,
    )
    .into_diagnostic()?;
    Ok(Problem {
        model: model("barr3", field)?,
        domains: Domains::new()
            .with(DomainRole::Operating, rect([-3.5, -2.0], [2.0, 1.0])?)
            .with(DomainRole::Initial, initial)
            .with(DomainRole::Unsafe, unsafe_set),
        options: CegisOptions {
            certificate: CertificateKind::Barrier,
            family: sigmoid_network(5),
            symmetric_belt: false,
            max_iters: 1000,
            ..CegisOptions::default()
        },
    })
}
