pub mod alerts;
pub mod calibration;
pub mod camera;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod pipeline;
pub mod queue;
pub mod sim;
pub mod statistics;

pub use eye_metrics;
