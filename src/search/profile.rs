//! Query profiling events
//!
//! Operators append flat events; parent/child structure is encoded by
//! `depth` and reconstructed by the coordinator when shaping the reply,
//! which also derives self-time as `total - sum(children)`.

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileEvent {
    pub depth: usize,
    pub descr: String,
    pub micros: u64,
    pub num_processed: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryProfile {
    pub events: Vec<ProfileEvent>,
}
