//! Application layer - services that drive the ports.

pub mod checkpoint;
pub mod orchestrator;
pub mod reducer;
pub mod scheduler;
pub mod video_unit;

#[cfg(test)]
mod fakes;
