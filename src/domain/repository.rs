use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// A tracked codebase: a local directory that is a git checkout (or bare
/// clone) at registration time. Identity record owned by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: Uuid,
    /// Unique within the catalog.
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Repository {
    pub fn new(name: String, path: PathBuf, description: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            path,
            description,
            created_at: Utc::now(),
        }
    }
}
