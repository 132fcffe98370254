//! Worker status — single-writer: only the owning worker mutates it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Idle,
    Running,
    Interrupted,
    Cancelled,
    Error,
}

impl Status {
    pub fn is_terminal_for_run(self) -> bool {
        matches!(self, Status::Idle | Status::Error | Status::Interrupted)
    }
}
