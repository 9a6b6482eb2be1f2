pub mod keyring;
pub mod migrations;
pub mod models;
pub mod store;
