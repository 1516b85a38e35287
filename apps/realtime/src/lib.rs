pub mod hub;
pub mod server;
pub mod socket;
pub mod store;
