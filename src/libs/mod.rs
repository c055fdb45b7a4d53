pub mod config;
pub mod copy;
pub mod error;
pub mod frame;
pub mod infer;
pub mod query_builder;
pub mod schema;
pub mod uploader;

// Re-export them for easier access from the crate root
pub use config::*;
pub use copy::CopyChunks;
pub use error::*;
pub use frame::*;
pub use infer::*;
pub use query_builder::*;
pub use schema::*;
pub use uploader::*;
