//! Pull-based receive

mod batch;

pub use batch::BatchReceiver;
