#![doc = include_str!("../README.md")]

//! Certus intermediate representation.
//!
//! This crate defines the symbolic expression language shared by the
//! learner, translator and verifier, the dynamical models being certified,
//! and the geometric regions of state space the certificate conditions
//! quantify over.

pub mod domain;
pub mod expr;
pub mod model;
pub mod predicate;
#[cfg(any(test, feature = "proptest"))]
pub mod proptest_generators;

pub use domain::{
    Bounds, Domain, DomainError, DomainRole, Domains, Rectangle, Sphere, Torus, Union,
};
pub use expr::{Constant, Expr};
pub use model::{DynamicalModel, ModelError, NumericField, TimeDomain};
pub use predicate::{Predicate, Relation};
