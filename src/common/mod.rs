//! Common utilities and types shared across segmentd

pub mod config;
pub mod error;
pub mod utils;

pub use config::{ConsulSettings, HdfsSettings, RawSettings, Settings, SyncMode};
pub use error::{Error, Result};
pub use utils::{encode_path, format_bytes, format_ttl, random_key};
