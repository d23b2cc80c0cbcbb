pub mod alert_store;
pub mod database;

pub use alert_store::SqliteAlertLog;
pub use database::Database;
