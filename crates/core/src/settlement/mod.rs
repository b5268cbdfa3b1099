//! Settlement of received messages

mod settler;

pub use settler::Settler;
