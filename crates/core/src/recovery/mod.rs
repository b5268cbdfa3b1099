//! Error to recovery-action classification

mod classifier;

pub use classifier::{classify, is_fatal};
