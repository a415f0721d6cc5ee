pub mod messages;
pub mod sync;
pub mod transport;
