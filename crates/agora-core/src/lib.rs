pub mod errors;
pub mod ids;
pub mod messages;
pub mod persistence;
pub mod role;
pub mod transport;
