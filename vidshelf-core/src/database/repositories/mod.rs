pub mod config;
pub mod folder;
pub mod metadata;
pub mod video;

pub use config::ConfigRepository;
pub use folder::FolderRepository;
pub use metadata::MetadataRepository;
pub use video::VideoRepository;

use super::{Database, DatabaseError};
use rusqlite::Connection;

pub trait Repository {
    fn database(&self) -> &Database;

    fn with_connection<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&mut Connection) -> Result<T, DatabaseError>,
    {
        self.database().with_connection(f)
    }
}
