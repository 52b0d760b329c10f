pub mod inflight;
pub mod recorder;
