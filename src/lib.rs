pub mod bovw;
pub mod cache;
pub mod cli;
pub mod config;
#[cfg(feature = "opencv")]
pub mod cv;
pub mod detect;
pub mod engine;
pub mod error;
pub mod eval;
pub mod extract;
pub mod feature;
pub mod finder;
pub mod geom;
pub mod imageops;
pub mod index;
pub mod kmeans;
mod metrics;
pub mod rerank;
mod server;
pub mod text;
pub mod utils;

pub use config::Opts;
pub use error::{Error, Result};
pub use finder::{Finder, FinderBuilder};
