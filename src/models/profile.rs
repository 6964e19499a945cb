use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A named target box plus the source orientations it applies to.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct ResizeProfile {
    pub id: i64,
    pub name: String,
    pub width: i64,
    pub height: i64,
    pub include_horizontal: bool,
    pub include_vertical: bool,
    pub created_at: DateTime<Utc>,
}

impl ResizeProfile {
    /// Whether an image of the given orientation should be rendered by this profile.
    pub fn accepts(&self, horizontal: bool) -> bool {
        if horizontal {
            self.include_horizontal
        } else {
            self.include_vertical
        }
    }
}

/// Fields accepted when creating or replacing a profile.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NewProfile {
    pub name: String,
    pub width: i64,
    pub height: i64,
    #[serde(default = "default_true")]
    pub include_horizontal: bool,
    #[serde(default = "default_true")]
    pub include_vertical: bool,
}

fn default_true() -> bool {
    true
}
