//! Client for prediction-style remote generators.
//!
//! Remote image and video models are driven through a two-call protocol:
//! create a prediction (returns an id) and fetch the prediction until it
//! reaches a terminal status. This crate provides:
//! - `PredictionClient` for both calls
//! - Prediction types
//! - Error classification into transient and permanent failures

pub mod client;
pub mod error;
pub mod types;

pub use client::{ClientConfig, PredictionClient};
pub use error::{ClientError, ClientResult};
pub use types::{Prediction, PredictionStatus};
