//! Contact directory entries (owned by the CRM side, read-only here)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub organization_id: String,
    pub email: String,
    pub name: Option<String>,
}

impl Contact {
    pub fn new(
        id: i64,
        organization_id: impl Into<String>,
        email: impl Into<String>,
        name: Option<String>,
    ) -> Self {
        Self {
            id,
            organization_id: organization_id.into(),
            email: email.into(),
            name,
        }
    }
}
