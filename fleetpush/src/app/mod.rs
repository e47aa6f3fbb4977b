//! Application layer: command line, options, run and output

pub mod cli;
pub mod options;
pub mod run;
pub mod summary;
