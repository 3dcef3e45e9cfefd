use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Entity;
use crate::schema::{CollectionSchema, FieldKind};

/// A member checking in to a class or session. Stored in `attendance`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attendance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub member_id: String,
    pub class_name: String,
    pub checked_in_at: DateTime<Utc>,
    /// Coach or admin who recorded the check-in, if not the member.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Attendance {
    pub fn new(
        member_id: impl Into<String>,
        class_name: impl Into<String>,
        checked_in_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            member_id: member_id.into(),
            class_name: class_name.into(),
            checked_in_at,
            recorded_by: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn recorded_by(mut self, staff: impl Into<String>) -> Self {
        self.recorded_by = Some(staff.into());
        self
    }
}

impl Entity for Attendance {
    const COLLECTION: &'static str = "attendance";

    fn schema() -> CollectionSchema {
        CollectionSchema::new(Self::COLLECTION)
            .field("memberId", FieldKind::Text)
            .field("className", FieldKind::Text)
            .field("checkedInAt", FieldKind::Timestamp)
            .field("recordedBy", FieldKind::Text)
    }
}

impl fmt::Display for Attendance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} checked in to {} at {}",
            self.member_id,
            self.class_name,
            self.checked_in_at.format("%Y-%m-%d %H:%M")
        )
    }
}
