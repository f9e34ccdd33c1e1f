pub mod connection;
pub mod hub;
pub mod registry;
pub mod router;
pub mod send;
