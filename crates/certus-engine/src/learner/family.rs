//! Parametric function families the learner can fit.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::tape::{Tape, Var};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Square,
    /// `z + z^2`
    Poly2,
    Sigmoid,
    Tanh,
    Softplus,
    /// `cosh(z) - 1`
    Cosh,
    Relu,
    ReluSquare,
}

impl Activation {
    /// Has an exact closed form in the expression language.
    pub fn is_smooth(self) -> bool {
        !matches!(self, Activation::Relu | Activation::ReluSquare)
    }

    pub fn apply(self, z: f64) -> f64 {
        match self {
            Activation::Linear => z,
            Activation::Square => z * z,
            Activation::Poly2 => z + z * z,
            Activation::Sigmoid => super::tape::sigmoid(z),
            Activation::Tanh => z.tanh(),
            Activation::Softplus => super::tape::softplus(z),
            Activation::Cosh => z.cosh() - 1.0,
            Activation::Relu => z.max(0.0),
            Activation::ReluSquare => z.max(0.0).powi(2),
        }
    }

    /// Push `σ(z)` and, when a tangent `ż` is given, `σ'(z)·ż`.
    fn on_tape(self, tape: &mut Tape, z: Var, dz: Option<Var>) -> (Var, Option<Var>) {
        match self {
            Activation::Linear => (z, dz),
            Activation::Square => {
                let h = tape.mul(z, z);
                let dh = dz.map(|dz| {
                    let zdz = tape.mul(z, dz);
                    tape.scale(zdz, 2.0)
                });
                (h, dh)
            }
            Activation::Poly2 => {
                let sq = tape.mul(z, z);
                let h = tape.add(z, sq);
                let dh = dz.map(|dz| {
                    let zdz = tape.mul(z, dz);
                    let two_zdz = tape.scale(zdz, 2.0);
                    tape.add(dz, two_zdz)
                });
                (h, dh)
            }
            Activation::Sigmoid => {
                let s = tape.sigmoid(z);
                let dh = dz.map(|dz| {
                    let one = tape.scalar(1.0);
                    let rest = tape.sub(one, s);
                    let slope = tape.mul(s, rest);
                    tape.mul(slope, dz)
                });
                (s, dh)
            }
            Activation::Tanh => {
                let t = tape.tanh(z);
                let dh = dz.map(|dz| {
                    let one = tape.scalar(1.0);
                    let t2 = tape.mul(t, t);
                    let slope = tape.sub(one, t2);
                    tape.mul(slope, dz)
                });
                (t, dh)
            }
            Activation::Softplus => {
                let h = tape.softplus(z);
                let dh = dz.map(|dz| {
                    let slope = tape.sigmoid(z);
                    tape.mul(slope, dz)
                });
                (h, dh)
            }
            Activation::Cosh => {
                let ep = tape.exp(z);
                let nz = tape.neg(z);
                let en = tape.exp(nz);
                let sum = tape.add(ep, en);
                let half = tape.scale(sum, 0.5);
                let one = tape.scalar(1.0);
                let h = tape.sub(half, one);
                let dh = dz.map(|dz| {
                    let diff = tape.sub(ep, en);
                    let sinh = tape.scale(diff, 0.5);
                    tape.mul(sinh, dz)
                });
                (h, dh)
            }
            Activation::Relu => {
                let h = tape.relu(z);
                let dh = dz.map(|dz| {
                    let gate = tape.step(z);
                    tape.mul(gate, dz)
                });
                (h, dh)
            }
            Activation::ReluSquare => {
                let r = tape.relu(z);
                let h = tape.mul(r, r);
                let dh = dz.map(|dz| {
                    let rdz = tape.mul(r, dz);
                    tape.scale(rdz, 2.0)
                });
                (h, dh)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Layer {
    pub width: usize,
    pub activation: Activation,
}

fn default_bias() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum FunctionFamily {
    /// Linear combination of every monomial whose total degree lies in
    /// `min_degree..=max_degree`.
    Polynomial { min_degree: u32, max_degree: u32 },
    /// Fully connected network with a scalar linear output.
    Network {
        layers: Vec<Layer>,
        #[serde(default = "default_bias")]
        bias: bool,
        /// Fix the output weights to one instead of learning them.
        #[serde(default)]
        last_layer_ones: bool,
    },
}

impl Default for FunctionFamily {
    fn default() -> Self {
        FunctionFamily::Polynomial {
            min_degree: 2,
            max_degree: 2,
        }
    }
}

/// Exponent vectors of all monomials in `n_vars` variables with total degree
/// in `min..=max`, by increasing degree and then lexicographically
/// decreasing (`x0^2, x0 x1, x1^2`).
pub fn monomials(n_vars: usize, min_degree: u32, max_degree: u32) -> Vec<Vec<u32>> {
    fn fill(n_vars: usize, var: usize, remaining: u32, current: &mut Vec<u32>, out: &mut Vec<Vec<u32>>) {
        if var + 1 == n_vars {
            current.push(remaining);
            out.push(current.clone());
            current.pop();
            return;
        }
        for e in (0..=remaining).rev() {
            current.push(e);
            fill(n_vars, var + 1, remaining - e, current, out);
            current.pop();
        }
    }

    let mut out = Vec::new();
    if n_vars == 0 {
        return out;
    }
    for degree in min_degree..=max_degree {
        fill(n_vars, 0, degree, &mut Vec::with_capacity(n_vars), &mut out);
    }
    out
}

fn monomial_value(exponents: &[u32], point: &[f64]) -> f64 {
    exponents
        .iter()
        .zip(point)
        .map(|(&e, &x)| x.powi(e as i32))
        .product()
}

/// `∇m(point) · direction`.
fn monomial_directional(exponents: &[u32], point: &[f64], direction: &[f64]) -> f64 {
    let mut total = 0.0;
    for (i, &e) in exponents.iter().enumerate() {
        if e == 0 {
            continue;
        }
        let mut term = f64::from(e) * direction[i];
        for (j, &ej) in exponents.iter().enumerate() {
            let exp = if j == i { ej - 1 } else { ej };
            term *= point[j].powi(exp as i32);
        }
        total += term;
    }
    total
}

/// Value node and optional tangent node of a family evaluated on a batch.
pub(crate) struct Forward {
    pub value: Var,
    pub tangent: Option<Var>,
}

impl FunctionFamily {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            FunctionFamily::Polynomial {
                min_degree,
                max_degree,
            } => {
                if min_degree > max_degree {
                    return Err(format!(
                        "polynomial min_degree {min_degree} exceeds max_degree {max_degree}"
                    ));
                }
                if *max_degree == 0 {
                    return Err("polynomial needs max_degree >= 1".into());
                }
                Ok(())
            }
            FunctionFamily::Network { layers, .. } => {
                if layers.is_empty() {
                    return Err("network needs at least one layer".into());
                }
                if let Some(i) = layers.iter().position(|l| l.width == 0) {
                    return Err(format!("layer {i} has zero width"));
                }
                Ok(())
            }
        }
    }

    /// Activations without a closed form, if any.
    pub fn unsupported_activation(&self) -> Option<Activation> {
        match self {
            FunctionFamily::Polynomial { .. } => None,
            FunctionFamily::Network { layers, .. } => layers
                .iter()
                .map(|l| l.activation)
                .find(|a| !a.is_smooth()),
        }
    }

    pub fn parameter_count(&self, n_vars: usize) -> usize {
        match self {
            FunctionFamily::Polynomial {
                min_degree,
                max_degree,
            } => monomials(n_vars, *min_degree, *max_degree).len(),
            FunctionFamily::Network {
                layers,
                bias,
                last_layer_ones,
            } => {
                let mut inputs = n_vars;
                let mut count = 0;
                for layer in layers {
                    count += layer.width * inputs;
                    if *bias {
                        count += layer.width;
                    }
                    inputs = layer.width;
                }
                if !*last_layer_ones {
                    count += inputs;
                }
                count
            }
        }
    }

    /// Fresh parameters: small uniform coefficients for polynomials, fan-in
    /// scaled uniform weights for networks.
    pub fn initial_parameters(&self, n_vars: usize, rng: &mut impl Rng) -> Vec<f64> {
        match self {
            FunctionFamily::Polynomial { .. } => (0..self.parameter_count(n_vars))
                .map(|_| rng.gen_range(-0.1..=0.1))
                .collect(),
            FunctionFamily::Network {
                layers,
                bias,
                last_layer_ones,
            } => {
                let mut params = Vec::with_capacity(self.parameter_count(n_vars));
                let mut inputs = n_vars;
                for layer in layers {
                    let bound = 1.0 / (inputs as f64).sqrt();
                    for _ in 0..layer.width * inputs {
                        params.push(rng.gen_range(-bound..=bound));
                    }
                    if *bias {
                        for _ in 0..layer.width {
                            params.push(rng.gen_range(-bound..=bound));
                        }
                    }
                    inputs = layer.width;
                }
                if !*last_layer_ones {
                    let bound = 1.0 / (inputs as f64).sqrt();
                    for _ in 0..inputs {
                        params.push(rng.gen_range(-bound..=bound));
                    }
                }
                params
            }
        }
    }

    /// Evaluate on a batch of points. `directions`, when given, holds one
    /// direction per point and the tangent of the output along it is
    /// propagated alongside the value.
    pub(crate) fn forward(
        &self,
        tape: &mut Tape,
        params: &[Var],
        points: &[Vec<f64>],
        directions: Option<&[Vec<f64>]>,
    ) -> Forward {
        let n_vars = points.first().map(Vec::len).unwrap_or(0);
        match self {
            FunctionFamily::Polynomial {
                min_degree,
                max_degree,
            } => {
                let basis = monomials(n_vars, *min_degree, *max_degree);
                let mut values = Vec::with_capacity(basis.len());
                let mut tangents = Vec::with_capacity(basis.len());
                for (k, exponents) in basis.iter().enumerate() {
                    let column: Vec<f64> =
                        points.iter().map(|p| monomial_value(exponents, p)).collect();
                    let leaf = tape.leaf(column);
                    values.push(tape.mul(params[k], leaf));
                    if let Some(dirs) = directions {
                        let column: Vec<f64> = points
                            .iter()
                            .zip(dirs)
                            .map(|(p, d)| monomial_directional(exponents, p, d))
                            .collect();
                        let leaf = tape.leaf(column);
                        tangents.push(tape.mul(params[k], leaf));
                    }
                }
                Forward {
                    value: tape.sum(&values),
                    tangent: directions.map(|_| tape.sum(&tangents)),
                }
            }
            FunctionFamily::Network {
                layers,
                bias,
                last_layer_ones,
            } => {
                let mut h: Vec<Var> = (0..n_vars)
                    .map(|i| tape.leaf(points.iter().map(|p| p[i]).collect()))
                    .collect();
                let mut dh: Option<Vec<Var>> = directions.map(|dirs| {
                    (0..n_vars)
                        .map(|i| tape.leaf(dirs.iter().map(|d| d[i]).collect()))
                        .collect()
                });
                let mut cursor = 0;
                for layer in layers {
                    let inputs = h.len();
                    let weights = &params[cursor..cursor + layer.width * inputs];
                    cursor += layer.width * inputs;
                    let biases = if *bias {
                        let b = &params[cursor..cursor + layer.width];
                        cursor += layer.width;
                        Some(b)
                    } else {
                        None
                    };
                    let mut next_h = Vec::with_capacity(layer.width);
                    let mut next_dh = dh.as_ref().map(|_| Vec::with_capacity(layer.width));
                    for j in 0..layer.width {
                        let row = &weights[j * inputs..(j + 1) * inputs];
                        let mut terms: Vec<Var> =
                            row.iter().zip(&h).map(|(w, x)| tape.mul(*w, *x)).collect();
                        if let Some(b) = biases {
                            terms.push(b[j]);
                        }
                        let z = tape.sum(&terms);
                        let dz = dh.as_ref().map(|dh| {
                            let terms: Vec<Var> =
                                row.iter().zip(dh).map(|(w, d)| tape.mul(*w, *d)).collect();
                            tape.sum(&terms)
                        });
                        let (a, da) = layer.activation.on_tape(tape, z, dz);
                        next_h.push(a);
                        if let (Some(next), Some(da)) = (next_dh.as_mut(), da) {
                            next.push(da);
                        }
                    }
                    h = next_h;
                    dh = next_dh;
                }
                let output = |tape: &mut Tape, hidden: &[Var]| {
                    if *last_layer_ones {
                        tape.sum(hidden)
                    } else {
                        let out = &params[cursor..cursor + hidden.len()];
                        let terms: Vec<Var> = out
                            .iter()
                            .zip(hidden)
                            .map(|(w, x)| tape.mul(*w, *x))
                            .collect();
                        tape.sum(&terms)
                    }
                };
                let value = output(tape, &h);
                let tangent = dh.map(|dh| output(tape, &dh));
                Forward { value, tangent }
            }
        }
    }

    /// Numeric value at one point.
    pub fn eval(&self, params: &[f64], point: &[f64]) -> f64 {
        let mut tape = Tape::new();
        let vars: Vec<Var> = params.iter().map(|p| tape.scalar(*p)).collect();
        let forward = self.forward(&mut tape, &vars, &[point.to_vec()], None);
        tape.value(forward.value)[0]
    }

    /// Numeric directional derivative `∇V(point) · direction`.
    pub fn directional(&self, params: &[f64], point: &[f64], direction: &[f64]) -> f64 {
        let mut tape = Tape::new();
        let vars: Vec<Var> = params.iter().map(|p| tape.scalar(*p)).collect();
        let forward = self.forward(
            &mut tape,
            &vars,
            &[point.to_vec()],
            Some(&[direction.to_vec()]),
        );
        forward
            .tangent
            .map(|t| tape.value(t)[0])
            .unwrap_or(0.0)
    }
}
