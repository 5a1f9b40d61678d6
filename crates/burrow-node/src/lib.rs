//! An ABCI application that executes account and validator transactions on top of `cnidarium`
//! storage, either driven by tendermint or as a single node without consensus.
pub mod app;
pub mod chain;
pub mod config;
pub mod execution;
pub mod genesis;
mod node;
pub mod primitive;
pub mod process;
pub(crate) mod service;
pub(crate) mod storage;
pub mod telemetry;
#[cfg(test)]
pub(crate) mod test_utils;
pub mod transaction;
pub mod validator;

pub use config::Config;
pub use node::Node;
