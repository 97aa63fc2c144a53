use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Starting,
    Up,
    Down,
    OutOfService,
    Unknown,
}

impl Default for InstanceStatus {
    fn default() -> Self {
        InstanceStatus::Up
    }
}
