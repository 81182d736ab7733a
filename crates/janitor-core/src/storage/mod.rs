mod queries;
mod sqlite;

pub use sqlite::Database;
