//! Streams finger angles estimated from hand landmarks to a remote
//! servo hand over an unreliable link.

pub mod config;
pub mod data;
pub mod error;
pub mod filter;
pub mod link;
pub mod pipeline;
pub mod pose;
pub mod transport;
pub mod wire;

pub use config::PipelineConfig;
pub use data::{DetectedHand, Handedness, Landmark, LandmarkFrame};
pub use filter::{Freshness, TelemetryFilter, TickDecision};
pub use link::{Delivery, DeliveryChannel, LinkState, SessionEnd};
pub use pipeline::{stop_channel, LandmarkFeed, Pipeline, PipelineReport, StopHandle};
pub use pose::{AngleSet, AngleVector, Digit, PoseEstimator, PoseFrame};
