pub mod action;
pub mod actions;
pub mod config;
pub mod declaration;
pub mod error;
pub mod expression;
pub mod iteration;
pub mod params;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod scenario;
pub mod tracker;
pub mod types;

pub use error::{PipecheckError, Result};
