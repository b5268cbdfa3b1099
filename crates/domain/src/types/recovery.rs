//! Recovery vocabulary

use serde::{Deserialize, Serialize};

use crate::impl_wire_str_conversions;

/// Which layer must be recreated before an operation can be retried.
///
/// Ordered by severity: `None < Link < Connection < Fatal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryKind {
    /// Retry the operation as-is.
    None,
    /// Recreate the session and links over the same connection.
    Link,
    /// Recreate the connection, then the session and links.
    Connection,
    /// Do not retry.
    Fatal,
}

impl_wire_str_conversions!(RecoveryKind {
    None => "none",
    Link => "link",
    Connection => "connection",
    Fatal => "fatal",
});

/// Identifies one incarnation of a link set: the namespace connection
/// revision and the link set revision it was created under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkId {
    pub connection: u64,
    pub link: u64,
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c:{},l:{}", self.connection, self.link)
    }
}
