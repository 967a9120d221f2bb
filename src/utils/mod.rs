pub mod data;
pub mod jobs;
pub mod week;
