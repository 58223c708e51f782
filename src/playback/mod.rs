//! Playback resiliency: the health state machine and the controller that
//! turns its decisions into player calls.

pub mod controller;
pub mod health;

pub use controller::PlaybackController;
