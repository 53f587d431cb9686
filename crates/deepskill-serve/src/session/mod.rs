//! Prediction session lifecycle.

pub mod manager;

pub use manager::PredictionSession;
