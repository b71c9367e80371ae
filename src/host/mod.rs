//! Host-facing contract and the stdio bridge that carries it.

pub mod contract;
pub mod stdio;
