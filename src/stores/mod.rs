pub mod bucket;
pub mod dropbox;
pub mod media;
pub mod sqlite;

pub use dropbox::DropboxStore;
pub use sqlite::SqliteStore;
