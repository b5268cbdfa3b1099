//! Link lifecycle
//!
//! [`LinkSet`] owns the links of one entity and rebuilds them on failure;
//! the traits in this module are what it needs from its surroundings.

mod link_set;
mod ports;

pub use link_set::{LinkSet, LinkSetState, Links, ReceiverLinkCreator, SenderLinkCreator};
pub use ports::{DataLinks, LinkCreator, NamespaceLinks};
