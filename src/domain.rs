//! Catalog entities stored in the search index.
//!
//! These are read-optimized documents: the video carries its category,
//! cast-member and genre associations as denormalized id sets populated by
//! the projection pipeline, never by the change event itself.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("updated_at {updated_at} precedes created_at {created_at}")]
    TimestampOrder {
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    },
}

/// Catalog entity kinds, keyed by the upstream table that emits their
/// change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Category,
    CastMember,
    Genre,
    Video,
}

impl EntityKind {
    pub fn from_table(table: &str) -> Option<Self> {
        match table {
            "categories" => Some(Self::Category),
            "cast_members" => Some(Self::CastMember),
            "genres" => Some(Self::Genre),
            "videos" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Self::Category => "categories",
            Self::CastMember => "cast_members",
            Self::Genre => "genres",
            Self::Video => "videos",
        }
    }
}

/// Content rating codes, as stored by the upstream catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rating {
    #[serde(rename = "ER")]
    Er,
    #[serde(rename = "L")]
    L,
    #[serde(rename = "AGE_10")]
    Age10,
    #[serde(rename = "AGE_12")]
    Age12,
    #[serde(rename = "AGE_14")]
    Age14,
    #[serde(rename = "AGE_16")]
    Age16,
    #[serde(rename = "AGE_18")]
    Age18,
}

/// Cast member role. The admin catalog emits uppercase codes, the index
/// stores lowercase; accept both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CastMemberKind {
    #[serde(rename = "actor", alias = "ACTOR")]
    Actor,
    #[serde(rename = "director", alias = "DIRECTOR")]
    Director,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastMember {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CastMemberKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genre {
    pub id: Uuid,
    pub name: String,
    /// Associated category ids, joined in from a separate index at query
    /// time. Absent in the stored genre document itself.
    #[serde(default)]
    pub categories: BTreeSet<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: Uuid,
    pub title: String,
    pub launch_year: i32,
    pub rating: Rating,
    pub categories: BTreeSet<Uuid>,
    pub cast_members: BTreeSet<Uuid>,
    pub genres: BTreeSet<Uuid>,
    pub banner: Url,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Video {
    /// Checks record invariants before the document is written to the
    /// index. The upstream source does not enforce timestamp ordering.
    pub fn validated(self) -> Result<Self, ValidationError> {
        if self.updated_at < self.created_at {
            return Err(ValidationError::TimestampOrder {
                created_at: self.created_at,
                updated_at: self.updated_at,
            });
        }
        Ok(self)
    }
}
