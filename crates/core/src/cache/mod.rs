pub mod encoding_cache;
pub mod single_flight;
