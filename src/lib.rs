pub mod cli;
pub mod kmersearch;
