pub mod cvc5_backend;
pub mod interval_backend;
pub mod smtlib_printer;
#[cfg(feature = "z3")]
pub mod z3_backend;
