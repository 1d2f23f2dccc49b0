mod sqlite;

pub use sqlite::SqliteMetadataStore;
