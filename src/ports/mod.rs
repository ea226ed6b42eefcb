//! Ports - Traits at the collaborator seams.

pub mod catalog;
pub mod checkpoint;
pub mod media;
pub mod source;
