#![doc = include_str!("../README.md")]

//! Certus synthesis engine.
//!
//! A [`learner::Learner`] fits a candidate to sample points, the
//! [`translator`] turns it into an exact expression, and a
//! [`verifier::CandidateVerifier`] either proves every condition of the
//! [`certificate::CertificateSpec`] or returns counterexamples that are fed
//! back as samples. [`cegis::solve`] wires the default components together.

pub mod certificate;
pub mod cegis;
pub mod config;
pub mod learner;
pub mod result;
pub mod samples;
mod timeout;
pub mod translator;
pub mod verifier;

pub use certificate::{CertificateKind, CertificateSpec, Condition};
pub use cegis::{solve, CegisError, CegisLoop, CegisStep, StepEvent};
pub use config::{BackendChoice, CegisConfig, CegisOptions, ConfigurationError};
pub use learner::{Activation, Candidate, FunctionFamily, Layer, Learner, NeuralLearner};
pub use result::{CandidateReport, CegisResult, CegisStatus, TerminationReason};
pub use samples::SampleSet;
pub use translator::{Mismatch, SymbolicCandidate, TranslateError};
pub use verifier::{CandidateVerifier, Counterexample, SmtVerifier, VerifyOutcome};
