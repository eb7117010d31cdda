pub mod control;
pub mod strategies;
