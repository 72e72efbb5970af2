//! Storage and extraction adapters for the document pipeline.

pub mod filesystem;
pub mod text_native;

pub use filesystem::FilesystemStorage;
pub use text_native::PlainTextExtractor;
