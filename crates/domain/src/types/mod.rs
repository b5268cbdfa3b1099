//! Domain types and models

pub mod entity;
pub mod message;
pub mod recovery;
pub mod settlement;
pub mod token;
pub mod value;

pub use entity::{Entity, ReceiveMode, SubQueue};
pub use message::{Message, MessageProperties, ReceivedMessage};
pub use recovery::{LinkId, RecoveryKind};
pub use settlement::{DeadLetterOptions, Disposition, DispositionStatus};
pub use token::AccessToken;
pub use value::{MapExt, Value};
