// Database module
// SQLite keeps the query history; the vector store holds embedded chunks.

pub mod sqlite;
pub mod vector;

pub use sqlite::Database;
pub use vector::{VectorBackend, VectorStoreManager};
