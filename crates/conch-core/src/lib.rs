pub mod brief;
pub mod codec;
pub mod filter;
pub mod fleece;
pub mod import_stream;
pub mod record;
pub mod value;

#[cfg(any(test, feature = "test-support"))]
pub mod fixtures;
