pub mod connection;
pub mod manager;
pub mod messages;

pub use connection::*;
pub use manager::*;
pub use messages::*;
