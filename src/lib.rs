//! Turn natural-language analysis requests into R or Python code, run it in
//! a remote sandbox, feed failures back to the model and collect the files
//! the code produces.

pub mod artifacts;
pub mod config;
pub mod correction;
pub mod execution;
pub mod generator;
pub mod history;
pub mod llm;
pub mod printer;
pub mod sandbox;

mod lines;

#[cfg(test)]
mod test_server;
