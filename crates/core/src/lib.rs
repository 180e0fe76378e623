pub mod cache;
pub mod detection;
pub mod media;
pub mod output;
pub mod pipeline;
pub mod recognition;
pub mod shared;
pub mod staging;
