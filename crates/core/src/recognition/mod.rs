pub mod dataset_record;
pub mod identity_registry;
pub mod matcher;
