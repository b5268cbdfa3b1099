//! Security tokens

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A token scoped to one audience, put on the connection's claims node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    /// Token type, e.g. `jwt` or `servicebus.windows.net:sastoken`.
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}
