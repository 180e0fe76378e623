pub mod arcface_embedder;
pub mod detect_embed_extractor;
pub mod execution_provider;
pub mod math;
pub mod onnx_yolo_detector;
