pub mod batch_executor;
pub mod classification_engine;
pub mod engine_config;
pub mod infrastructure;
pub mod pipeline_logger;
