pub mod audit_repository;
pub mod config;
pub mod database;
pub mod repository;

pub use audit_repository::AuditRepository;
pub use config::DatabaseConfig;
pub use database::Database;
pub use repository::SnapshotRepository;
