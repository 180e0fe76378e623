pub mod classification_result;
pub mod output_organizer;
