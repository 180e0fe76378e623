pub mod area_scanner;
pub mod image_file_decoder;
