//! Video library core: watched folders, progressive folder scans backed by a
//! content-addressed thumbnail cache, per-path user metadata, and batch file
//! operations with metadata migration.

pub mod config;
pub mod database;
pub mod manager;
pub mod media;

pub use config::{AppConfig, DataPaths, PathCase};
pub use database::models::{VideoMetadata, VideoRecord, WatchedFolder};
pub use database::{Database, DatabaseError};
pub use manager::{ManagerError, MediaTools, VideoManager};
