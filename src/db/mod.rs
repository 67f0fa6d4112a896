// Re-export the Database struct and other public items
pub mod article;
pub mod core;
pub mod incident;
mod schema;
pub mod summary;

// Re-export Database and essential traits
pub use self::core::Database;
pub use sqlx::Row;
