pub mod connection;
pub mod ledger;
pub mod models;
pub mod queries;
pub mod schema;
