//! Batched reverse-mode automatic differentiation.
//!
//! Every node holds either one value (a scalar, broadcast where needed) or
//! one value per sample. Values are computed eagerly as nodes are pushed;
//! [`Tape::gradient`] walks the tape backwards once.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Var(usize);

#[derive(Debug, Clone)]
enum Op {
    Leaf,
    Add(usize, usize),
    Sub(usize, usize),
    Mul(usize, usize),
    Neg(usize),
    Scale(usize, f64),
    Exp(usize),
    Sigmoid(usize),
    Tanh(usize),
    Softplus(usize),
    Relu(usize),
    Sum(Vec<usize>),
    /// Sum over the batch, producing a scalar.
    Reduce(usize),
}

#[derive(Debug)]
struct Node {
    op: Op,
    value: Vec<f64>,
}

#[inline]
fn at(values: &[f64], i: usize) -> f64 {
    if values.len() == 1 {
        values[0]
    } else {
        values[i]
    }
}

fn broadcast(a: &[f64], b: &[f64], f: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    let n = a.len().max(b.len());
    (0..n).map(|i| f(at(a, i), at(b, i))).collect()
}

#[inline]
fn accumulate(adjoint: &mut [f64], i: usize, delta: f64) {
    if adjoint.len() == 1 {
        adjoint[0] += delta;
    } else {
        adjoint[i] += delta;
    }
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

pub(crate) fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

#[derive(Debug, Default)]
pub(crate) struct Tape {
    nodes: Vec<Node>,
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, op: Op, value: Vec<f64>) -> Var {
        self.nodes.push(Node { op, value });
        Var(self.nodes.len() - 1)
    }

    pub fn leaf(&mut self, value: Vec<f64>) -> Var {
        self.push(Op::Leaf, value)
    }

    pub fn scalar(&mut self, value: f64) -> Var {
        self.leaf(vec![value])
    }

    pub fn value(&self, var: Var) -> &[f64] {
        &self.nodes[var.0].value
    }

    fn unary(&mut self, a: Var, op: Op, f: impl Fn(f64) -> f64) -> Var {
        let value = self.nodes[a.0].value.iter().map(|&x| f(x)).collect();
        self.push(op, value)
    }

    fn binary(&mut self, a: Var, b: Var, op: Op, f: impl Fn(f64, f64) -> f64) -> Var {
        let value = broadcast(&self.nodes[a.0].value, &self.nodes[b.0].value, f);
        self.push(op, value)
    }

    pub fn add(&mut self, a: Var, b: Var) -> Var {
        self.binary(a, b, Op::Add(a.0, b.0), |x, y| x + y)
    }

    pub fn sub(&mut self, a: Var, b: Var) -> Var {
        self.binary(a, b, Op::Sub(a.0, b.0), |x, y| x - y)
    }

    pub fn mul(&mut self, a: Var, b: Var) -> Var {
        self.binary(a, b, Op::Mul(a.0, b.0), |x, y| x * y)
    }

    pub fn neg(&mut self, a: Var) -> Var {
        self.unary(a, Op::Neg(a.0), |x| -x)
    }

    pub fn scale(&mut self, a: Var, factor: f64) -> Var {
        self.unary(a, Op::Scale(a.0, factor), |x| factor * x)
    }

    pub fn exp(&mut self, a: Var) -> Var {
        self.unary(a, Op::Exp(a.0), f64::exp)
    }

    pub fn sigmoid(&mut self, a: Var) -> Var {
        self.unary(a, Op::Sigmoid(a.0), sigmoid)
    }

    pub fn tanh(&mut self, a: Var) -> Var {
        self.unary(a, Op::Tanh(a.0), f64::tanh)
    }

    pub fn softplus(&mut self, a: Var) -> Var {
        self.unary(a, Op::Softplus(a.0), softplus)
    }

    pub fn relu(&mut self, a: Var) -> Var {
        self.unary(a, Op::Relu(a.0), |x| x.max(0.0))
    }

    /// Heaviside step of `a`, treated as a constant.
    pub fn step(&mut self, a: Var) -> Var {
        let value = self.nodes[a.0]
            .value
            .iter()
            .map(|&x| if x > 0.0 { 1.0 } else { 0.0 })
            .collect();
        self.leaf(value)
    }

    /// Elementwise sum of any number of nodes (`0` when empty).
    pub fn sum(&mut self, terms: &[Var]) -> Var {
        let n = terms
            .iter()
            .map(|v| self.nodes[v.0].value.len())
            .max()
            .unwrap_or(1);
        let mut value = vec![0.0; n];
        for v in terms {
            let src = &self.nodes[v.0].value;
            for (i, slot) in value.iter_mut().enumerate() {
                *slot += at(src, i);
            }
        }
        self.push(Op::Sum(terms.iter().map(|v| v.0).collect()), value)
    }

    /// Sum over the batch dimension.
    pub fn reduce(&mut self, a: Var) -> Var {
        let total = self.nodes[a.0].value.iter().sum();
        self.push(Op::Reduce(a.0), vec![total])
    }

    /// Adjoint of every node with respect to the scalar `output`.
    pub fn gradient(&self, output: Var) -> Vec<Vec<f64>> {
        let mut adjoints: Vec<Vec<f64>> = self
            .nodes
            .iter()
            .map(|n| vec![0.0; n.value.len()])
            .collect();
        if let Some(seed) = adjoints[output.0].first_mut() {
            *seed = 1.0;
        }

        for idx in (0..=output.0).rev() {
            let (lower, upper) = adjoints.split_at_mut(idx);
            let out = &upper[0];
            if out.iter().all(|g| *g == 0.0) {
                continue;
            }
            let node = &self.nodes[idx];
            let n = node.value.len();
            match &node.op {
                Op::Leaf => {}
                Op::Add(a, b) => {
                    for i in 0..n {
                        accumulate(&mut lower[*a], i, out[i]);
                        accumulate(&mut lower[*b], i, out[i]);
                    }
                }
                Op::Sub(a, b) => {
                    for i in 0..n {
                        accumulate(&mut lower[*a], i, out[i]);
                        accumulate(&mut lower[*b], i, -out[i]);
                    }
                }
                Op::Mul(a, b) => {
                    let (va, vb) = (&self.nodes[*a].value, &self.nodes[*b].value);
                    for i in 0..n {
                        let (x, y) = (at(va, i), at(vb, i));
                        accumulate(&mut lower[*a], i, out[i] * y);
                        accumulate(&mut lower[*b], i, out[i] * x);
                    }
                }
                Op::Neg(a) => {
                    for i in 0..n {
                        accumulate(&mut lower[*a], i, -out[i]);
                    }
                }
                Op::Scale(a, factor) => {
                    for i in 0..n {
                        accumulate(&mut lower[*a], i, factor * out[i]);
                    }
                }
                Op::Exp(a) => {
                    for i in 0..n {
                        accumulate(&mut lower[*a], i, out[i] * node.value[i]);
                    }
                }
                Op::Sigmoid(a) => {
                    for i in 0..n {
                        let s = node.value[i];
                        accumulate(&mut lower[*a], i, out[i] * s * (1.0 - s));
                    }
                }
                Op::Tanh(a) => {
                    for i in 0..n {
                        let t = node.value[i];
                        accumulate(&mut lower[*a], i, out[i] * (1.0 - t * t));
                    }
                }
                Op::Softplus(a) => {
                    let va = &self.nodes[*a].value;
                    for i in 0..n {
                        accumulate(&mut lower[*a], i, out[i] * sigmoid(va[i]));
                    }
                }
                Op::Relu(a) => {
                    let va = &self.nodes[*a].value;
                    for i in 0..n {
                        if va[i] > 0.0 {
                            accumulate(&mut lower[*a], i, out[i]);
                        }
                    }
                }
                Op::Sum(terms) => {
                    for t in terms {
                        for i in 0..n {
                            accumulate(&mut lower[*t], i, out[i]);
                        }
                    }
                }
                Op::Reduce(a) => {
                    let g = out[0];
                    for slot in lower[*a].iter_mut() {
                        *slot += g;
                    }
                }
            }
        }
        adjoints
    }

    /// Gradient of `output` with respect to the given scalar leaves.
    pub fn gradient_wrt(&self, output: Var, params: &[Var]) -> Vec<f64> {
        let adjoints = self.gradient(output);
        params
            .iter()
            .map(|p| adjoints[p.0].iter().sum())
            .collect()
    }
}
