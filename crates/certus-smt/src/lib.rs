#![doc = include_str!("../README.md")]

//! Real-arithmetic decision procedures for certificate verification.
//!
//! Terms are built solver-agnostically and discharged through the
//! [`solver::SmtSolver`] trait, implemented by an interval branch-and-prune
//! procedure, Z3 (behind the `z3` feature) and a cvc5 subprocess.

pub mod backends;
pub mod encoder;
pub mod interval;
pub mod solver;
pub mod sorts;
pub mod terms;
