//! Demo front-end for the voxstream pipeline.
//!
//! Replays a text file as if an LLM were streaming it, speaking it through
//! a simulated synthesis engine and a console "speaker".
#![deny(unused_crate_dependencies)]

// Used by main.rs binary
use dotenvy as _;
use serde_json as _;
use tracing_subscriber as _;

pub mod demo;
pub mod parser;
pub mod replay;

pub use demo::{ConsoleDevice, SimulatedEngine};
pub use parser::Cli;
pub use replay::fragments;
