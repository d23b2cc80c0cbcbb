pub mod http_client_factory;
pub mod observability;
pub mod persistence;
pub mod projectx;
