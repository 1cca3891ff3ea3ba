//! Transformer model: pipeline configuration, weights, and the
//! client/server pair orchestrating encrypt → evaluate → decrypt.

pub mod client;
pub mod config;
pub mod server;
pub mod weights;

pub use client::{argmax, precision, tokenize, Client};
pub use config::PipelineConfig;
pub use server::Server;
pub use weights::ModelWeights;
