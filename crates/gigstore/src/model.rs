//! # Domain Model
//!
//! Every stored document is a typed record implementing [`Entity`]. The record
//! carries the fields the storage and guard layers depend on (id, creation
//! timestamp, foreign keys, status) and an open `extra` map that is flattened
//! into the JSON document, so feature-specific fields written by other parts of
//! the application survive a read-modify-write cycle untouched.
//!
//! ## Identifiers
//!
//! Historically ids were written both as JSON integers and as strings. An
//! [`EntityId`] accepts either form on input and always writes a string, so
//! `42` and `"42"` name the same entity.
//!
//! ## Entity Kinds
//!
//! | Kind           | Directory       | File                | Timestamp   | Parent FK        |
//! |----------------|-----------------|---------------------|-------------|------------------|
//! | `Project`      | `projects`      | `project.json`      | `createdAt` | `gigId`          |
//! | `Gig`          | `gigs`          | `gig.json`          | `createdAt` | `commissionerId` |
//! | `Application`  | `applications`  | `application.json`  | `createdAt` | `gigId`          |
//! | `GigRequest`   | `gig-requests`  | `gig-request.json`  | `createdAt` | `commissionerId` |
//! | `Notification` | `notifications` | `notification.json` | `timestamp` | `targetUserId`   |
//!
//! Tasks are not a kind of their own: they live in the `tasks/` sub-resource
//! directory of their project.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id can be used as a single path segment.
    pub fn is_valid_segment(&self) -> bool {
        crate::store::paths::is_id_segment(&self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for EntityId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl From<&EntityId> for EntityId {
    fn from(id: &EntityId) -> Self {
        id.clone()
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Int(i64),
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => EntityId(s),
            RawId::Int(n) => EntityId(n.to_string()),
        })
    }
}

/// Reads an id out of a raw JSON document, accepting both representations.
pub fn id_from_value(value: &Value) -> Option<EntityId> {
    id_from_json(value.get("id")?)
}

/// Interprets a single JSON scalar as an id.
pub fn id_from_json(value: &Value) -> Option<EntityId> {
    match value {
        Value::String(s) => Some(EntityId(s.clone())),
        Value::Number(n) => Some(EntityId(n.to_string())),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Project,
    Gig,
    Application,
    GigRequest,
    Notification,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Project,
        EntityKind::Gig,
        EntityKind::Application,
        EntityKind::GigRequest,
        EntityKind::Notification,
    ];

    /// Directory under the data root holding every document of this kind.
    pub fn dir_name(self) -> &'static str {
        match self {
            EntityKind::Project => "projects",
            EntityKind::Gig => "gigs",
            EntityKind::Application => "applications",
            EntityKind::GigRequest => "gig-requests",
            EntityKind::Notification => "notifications",
        }
    }

    pub fn singular(self) -> &'static str {
        match self {
            EntityKind::Project => "project",
            EntityKind::Gig => "gig",
            EntityKind::Application => "application",
            EntityKind::GigRequest => "gig-request",
            EntityKind::Notification => "notification",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.json", self.singular())
    }

    pub fn index_file_name(self) -> String {
        format!("{}-index.json", self.dir_name())
    }

    /// JSON field carrying the timestamp the storage shard is derived from.
    pub fn timestamp_field(self) -> &'static str {
        match self {
            EntityKind::Notification => "timestamp",
            _ => "createdAt",
        }
    }

    /// Sub-directories attached to an entity directory that move and die with it.
    pub fn subresource_dirs(self) -> &'static [&'static str] {
        match self {
            EntityKind::Project => &["tasks"],
            _ => &[],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.singular())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        EntityKind::ALL
            .into_iter()
            .find(|k| k.singular() == lower || k.dir_name() == lower)
            .ok_or_else(|| format!("unknown entity kind: {}", s))
    }
}

/// A document stored by an [`crate::store::EntityStore`].
pub trait Entity: Serialize + DeserializeOwned + Clone + fmt::Debug {
    const KIND: EntityKind;

    fn id(&self) -> &EntityId;

    fn created_at(&self) -> DateTime<Utc>;

    /// The foreign key `read_by_parent` filters on.
    fn parent_id(&self) -> Option<&EntityId>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GigStatus {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Ongoing,
    Paused,
    Completed,
    Cancelled,
}

impl ProjectStatus {
    pub fn is_active(self) -> bool {
        matches!(self, ProjectStatus::Ongoing | ProjectStatus::Paused)
    }
}

/// Status shared by applications and gig requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gig {
    pub id: EntityId,
    pub created_at: DateTime<Utc>,
    pub commissioner_id: EntityId,
    pub title: String,
    pub status: GigStatus,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Gig {
    pub fn new(
        id: impl Into<EntityId>,
        commissioner_id: impl Into<EntityId>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            commissioner_id: commissioner_id.into(),
            title: title.into(),
            status: GigStatus::Available,
            extra: Map::new(),
        }
    }
}

impl Entity for Gig {
    const KIND: EntityKind = EntityKind::Gig;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn parent_id(&self) -> Option<&EntityId> {
        Some(&self.commissioner_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: EntityId,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gig_id: Option<EntityId>,
    pub freelancer_id: EntityId,
    pub commissioner_id: EntityId,
    pub title: String,
    pub status: ProjectStatus,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Project {
    pub fn new(
        id: impl Into<EntityId>,
        freelancer_id: impl Into<EntityId>,
        commissioner_id: impl Into<EntityId>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            gig_id: None,
            freelancer_id: freelancer_id.into(),
            commissioner_id: commissioner_id.into(),
            title: title.into(),
            status: ProjectStatus::Ongoing,
            extra: Map::new(),
        }
    }

    pub fn with_gig(mut self, gig_id: impl Into<EntityId>) -> Self {
        self.gig_id = Some(gig_id.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

impl Entity for Project {
    const KIND: EntityKind = EntityKind::Project;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn parent_id(&self) -> Option<&EntityId> {
        self.gig_id.as_ref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: EntityId,
    pub created_at: DateTime<Utc>,
    pub gig_id: EntityId,
    pub freelancer_id: EntityId,
    pub status: ReviewStatus,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Application {
    pub fn new(
        id: impl Into<EntityId>,
        gig_id: impl Into<EntityId>,
        freelancer_id: impl Into<EntityId>,
    ) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            gig_id: gig_id.into(),
            freelancer_id: freelancer_id.into(),
            status: ReviewStatus::Pending,
            extra: Map::new(),
        }
    }
}

impl Entity for Application {
    const KIND: EntityKind = EntityKind::Application;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn parent_id(&self) -> Option<&EntityId> {
        Some(&self.gig_id)
    }
}

/// A commissioner's direct offer to a freelancer, bypassing the public gig listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GigRequest {
    pub id: EntityId,
    pub created_at: DateTime<Utc>,
    pub freelancer_id: EntityId,
    pub commissioner_id: EntityId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gig_id: Option<EntityId>,
    pub status: ReviewStatus,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GigRequest {
    pub fn new(
        id: impl Into<EntityId>,
        freelancer_id: impl Into<EntityId>,
        commissioner_id: impl Into<EntityId>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            freelancer_id: freelancer_id.into(),
            commissioner_id: commissioner_id.into(),
            title: title.into(),
            gig_id: None,
            status: ReviewStatus::Pending,
            extra: Map::new(),
        }
    }

    /// Whether `project` fulfils this request: same freelancer, commissioner and title.
    pub fn matches(&self, project: &Project) -> bool {
        self.freelancer_id == project.freelancer_id
            && self.commissioner_id == project.commissioner_id
            && self.title.trim().eq_ignore_ascii_case(project.title.trim())
    }
}

impl Entity for GigRequest {
    const KIND: EntityKind = EntityKind::GigRequest;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn parent_id(&self) -> Option<&EntityId> {
        Some(&self.commissioner_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: EntityId,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub target_user_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<EntityId>,
    #[serde(default)]
    pub message: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Notification {
    pub fn new(kind: impl Into<String>, target_user_id: impl Into<EntityId>) -> Self {
        Self {
            id: EntityId::generate(),
            created_at: Utc::now(),
            kind: kind.into(),
            target_user_id: target_user_id.into(),
            actor_id: None,
            subject_id: None,
            message: String::new(),
            extra: Map::new(),
        }
    }
}

impl Entity for Notification {
    const KIND: EntityKind = EntityKind::Notification;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn parent_id(&self) -> Option<&EntityId> {
        Some(&self.target_user_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: EntityId,
    pub project_id: EntityId,
    pub created_at: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub order: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    pub fn new(project_id: impl Into<EntityId>, title: impl Into<String>, order: u32) -> Self {
        Self {
            id: EntityId::generate(),
            project_id: project_id.into(),
            created_at: Utc::now(),
            title: title.into(),
            status: TaskStatus::Todo,
            order,
            extra: Map::new(),
        }
    }
}
