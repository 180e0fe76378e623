pub mod constants;
pub mod face_embedding;
pub mod fingerprint;
pub mod frame;
pub mod image_id;
pub mod model_resolver;
pub mod region;
