pub mod staging_area;
