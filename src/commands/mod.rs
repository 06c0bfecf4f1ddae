//! CLI commands implementation

pub mod ingest;
pub mod init;
pub mod query;
pub mod screen;
pub mod sessions;
pub mod status;

pub use ingest::*;
pub use init::*;
pub use query::*;
pub use screen::*;
pub use sessions::*;
pub use status::*;
