use num::bigint::BigInt;
use num::rational::BigRational;

/// Abstract SMT term representation, solver-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub enum SmtTerm {
    /// Variable reference by name.
    Var(String),
    /// Exact real literal.
    RealLit(BigRational),
    /// Boolean literal.
    BoolLit(bool),

    // Arithmetic
    Add(Box<SmtTerm>, Box<SmtTerm>),
    Sub(Box<SmtTerm>, Box<SmtTerm>),
    Mul(Box<SmtTerm>, Box<SmtTerm>),
    Div(Box<SmtTerm>, Box<SmtTerm>),
    Neg(Box<SmtTerm>),
    Pow(Box<SmtTerm>, u32),

    // Transcendental
    Sin(Box<SmtTerm>),
    Cos(Box<SmtTerm>),
    Exp(Box<SmtTerm>),
    Log(Box<SmtTerm>),
    Tanh(Box<SmtTerm>),

    // Comparison
    Eq(Box<SmtTerm>, Box<SmtTerm>),
    Lt(Box<SmtTerm>, Box<SmtTerm>),
    Le(Box<SmtTerm>, Box<SmtTerm>),
    Gt(Box<SmtTerm>, Box<SmtTerm>),
    Ge(Box<SmtTerm>, Box<SmtTerm>),

    // Boolean logic
    And(Vec<SmtTerm>),
    Or(Vec<SmtTerm>),
    Not(Box<SmtTerm>),
    Implies(Box<SmtTerm>, Box<SmtTerm>),
}

#[allow(clippy::should_implement_trait)]
impl SmtTerm {
    pub fn var(name: impl Into<String>) -> Self {
        SmtTerm::Var(name.into())
    }

    pub fn real(value: BigRational) -> Self {
        SmtTerm::RealLit(value)
    }

    /// Integer-valued real literal.
    pub fn int(n: i64) -> Self {
        SmtTerm::RealLit(BigRational::from_integer(BigInt::from(n)))
    }

    /// Exact literal for a finite float; `None` for NaN and infinities.
    pub fn from_f64(value: f64) -> Option<Self> {
        BigRational::from_float(value).map(SmtTerm::RealLit)
    }

    pub fn bool(b: bool) -> Self {
        SmtTerm::BoolLit(b)
    }

    pub fn add(self, other: SmtTerm) -> Self {
        SmtTerm::Add(Box::new(self), Box::new(other))
    }

    pub fn sub(self, other: SmtTerm) -> Self {
        SmtTerm::Sub(Box::new(self), Box::new(other))
    }

    pub fn mul(self, other: SmtTerm) -> Self {
        SmtTerm::Mul(Box::new(self), Box::new(other))
    }

    pub fn div(self, other: SmtTerm) -> Self {
        SmtTerm::Div(Box::new(self), Box::new(other))
    }

    pub fn neg(self) -> Self {
        SmtTerm::Neg(Box::new(self))
    }

    pub fn pow(self, exponent: u32) -> Self {
        SmtTerm::Pow(Box::new(self), exponent)
    }

    pub fn sin(self) -> Self {
        SmtTerm::Sin(Box::new(self))
    }

    pub fn cos(self) -> Self {
        SmtTerm::Cos(Box::new(self))
    }

    pub fn exp(self) -> Self {
        SmtTerm::Exp(Box::new(self))
    }

    pub fn log(self) -> Self {
        SmtTerm::Log(Box::new(self))
    }

    pub fn tanh(self) -> Self {
        SmtTerm::Tanh(Box::new(self))
    }

    pub fn eq(self, other: SmtTerm) -> Self {
        SmtTerm::Eq(Box::new(self), Box::new(other))
    }

    pub fn lt(self, other: SmtTerm) -> Self {
        SmtTerm::Lt(Box::new(self), Box::new(other))
    }

    pub fn le(self, other: SmtTerm) -> Self {
        SmtTerm::Le(Box::new(self), Box::new(other))
    }

    pub fn gt(self, other: SmtTerm) -> Self {
        SmtTerm::Gt(Box::new(self), Box::new(other))
    }

    pub fn ge(self, other: SmtTerm) -> Self {
        SmtTerm::Ge(Box::new(self), Box::new(other))
    }

    pub fn and(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::And(terms)
    }

    pub fn or(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::Or(terms)
    }

    pub fn not(self) -> Self {
        SmtTerm::Not(Box::new(self))
    }

    pub fn implies(self, other: SmtTerm) -> Self {
        SmtTerm::Implies(Box::new(self), Box::new(other))
    }

    /// Direct children, in order.
    pub fn children(&self) -> Vec<&SmtTerm> {
        match self {
            SmtTerm::Var(_) | SmtTerm::RealLit(_) | SmtTerm::BoolLit(_) => Vec::new(),
            SmtTerm::Add(a, b)
            | SmtTerm::Sub(a, b)
            | SmtTerm::Mul(a, b)
            | SmtTerm::Div(a, b)
            | SmtTerm::Eq(a, b)
            | SmtTerm::Lt(a, b)
            | SmtTerm::Le(a, b)
            | SmtTerm::Gt(a, b)
            | SmtTerm::Ge(a, b)
            | SmtTerm::Implies(a, b) => vec![a, b],
            SmtTerm::Neg(a)
            | SmtTerm::Pow(a, _)
            | SmtTerm::Sin(a)
            | SmtTerm::Cos(a)
            | SmtTerm::Exp(a)
            | SmtTerm::Log(a)
            | SmtTerm::Tanh(a)
            | SmtTerm::Not(a) => vec![a],
            SmtTerm::And(terms) | SmtTerm::Or(terms) => terms.iter().collect(),
        }
    }

    /// True if any subterm applies a transcendental function.
    pub fn is_transcendental(&self) -> bool {
        match self {
            SmtTerm::Sin(_)
            | SmtTerm::Cos(_)
            | SmtTerm::Exp(_)
            | SmtTerm::Log(_)
            | SmtTerm::Tanh(_) => true,
            other => other.children().into_iter().any(SmtTerm::is_transcendental),
        }
    }

    /// True if any subterm satisfies `pred`.
    pub fn any(&self, pred: &dyn Fn(&SmtTerm) -> bool) -> bool {
        pred(self) || self.children().into_iter().any(|c| c.any(pred))
    }
}
