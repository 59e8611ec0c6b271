pub mod connection;
pub mod models;
pub mod projection;
pub mod schema;

pub use connection::create_pool;
pub use models::{Category, Counter, Hashtag, Pattern, PatternHashtag, PatternType};
pub use projection::{remove_dir_if_empty, sync_category_directories, ProjectionReport};
pub use schema::ensure_schema;
