//! Durable outputs of a run.

pub mod results;
