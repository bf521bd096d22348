use serde::{Deserialize, Serialize};

/// Body of `GET /overlay`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayMessage {
    pub message: String,
}
