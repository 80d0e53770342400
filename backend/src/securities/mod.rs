pub mod repository_sqlx;

pub use repository_sqlx::SqlxSecurityRepository;
