pub mod cblite;
pub mod ingestor;
pub mod json_import;
pub mod lock;
pub mod remap;
