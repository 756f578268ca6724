//! Shared data model: accounts, callers, auth context, storage-node and
//! object-metadata records. These types are produced and consumed across
//! the identity client, auth pipeline, picker, and metadata client, so they
//! live in one place rather than duplicated per module.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub uuid: Uuid,
    pub login: String,
    pub approved_for_provisioning: bool,
    pub is_operator: bool,
    #[serde(default)]
    pub groups: HashSet<String>,
    #[serde(default)]
    pub keys: HashMap<String, String>,
}

impl Account {
    pub fn is_operator_by_group(&self) -> bool {
        self.is_operator || self.groups.contains("operators")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub uuid: Uuid,
    pub account_uuid: Uuid,
    pub login: String,
    #[serde(default)]
    pub keys: HashMap<String, String>,
    #[serde(default)]
    pub roles: HashSet<Uuid>,
    #[serde(default)]
    pub default_roles: HashSet<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub policies: HashSet<Uuid>,
}

/// The result of identity resolution for one request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub account: Option<Account>,
    pub user: Option<User>,
    pub roles: HashMap<Uuid, Role>,
    pub anonymous: bool,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self {
            account: None,
            user: None,
            roles: HashMap::new(),
            anonymous: true,
        }
    }

    pub fn is_operator(&self) -> bool {
        self.account
            .as_ref()
            .map(|a| a.is_operator_by_group())
            .unwrap_or(false)
    }

    /// The key set the caller authenticates with: the subuser's keys if
    /// there is a subuser, else the account's.
    pub fn keys(&self) -> Option<&HashMap<String, String>> {
        if let Some(user) = &self.user {
            Some(&user.keys)
        } else {
            self.account.as_ref().map(|a| &a.keys)
        }
    }

    pub fn granted_roles(&self) -> HashSet<Uuid> {
        self.user
            .as_ref()
            .map(|u| u.roles.clone())
            .unwrap_or_default()
    }

    pub fn default_roles(&self) -> HashSet<Uuid> {
        self.user
            .as_ref()
            .map(|u| u.default_roles.clone())
            .unwrap_or_default()
    }
}

/// Conditions attached to an authorization decision. Typed rather than a
/// bag of `serde_json::Value`s per the redesign note in the design doc,
/// with an `extra` escape hatch for identity-service-specific extensions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conditions {
    pub method: Option<String>,
    #[serde(rename = "activeRoles", default)]
    pub active_roles: Vec<Uuid>,
    pub date: Option<String>,
    pub day: Option<String>,
    pub time: Option<String>,
    pub sourceip: Option<String>,
    #[serde(rename = "user-agent")]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub fromjob: bool,
    pub overwrite: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Conditions {
    /// The identity-relevant subset permitted inside a v2 sealed token:
    /// never `date`, `sourceip`, or `user-agent`.
    pub fn token_subset(&self) -> Conditions {
        Conditions {
            method: None,
            active_roles: self.active_roles.clone(),
            date: None,
            day: None,
            time: None,
            sourceip: None,
            user_agent: None,
            fromjob: self.fromjob,
            overwrite: None,
            extra: Default::default(),
        }
    }

    /// Overlay `other` onto `self`, letting any field `other` sets win.
    /// Used when token-supplied conditions must overwrite request-derived
    /// ones.
    pub fn overlay(mut self, other: &Conditions) -> Conditions {
        if !other.active_roles.is_empty() {
            self.active_roles = other.active_roles.clone();
        }
        if other.method.is_some() {
            self.method = other.method.clone();
        }
        if other.date.is_some() {
            self.date = other.date.clone();
        }
        if other.sourceip.is_some() {
            self.sourceip = other.sourceip.clone();
        }
        if other.user_agent.is_some() {
            self.user_agent = other.user_agent.clone();
        }
        self.fromjob = other.fromjob || self.fromjob;
        if other.overwrite.is_some() {
            self.overwrite = other.overwrite;
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct ResourceContext {
    pub owner: Account,
    pub key: String,
    pub roles: Vec<Uuid>,
}

/// Everything the authorizer reads. Built once per request by the auth
/// pipeline and never mutated by the authorizer itself.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal: Caller,
    pub action: String,
    pub resource: ResourceContext,
    pub conditions: Conditions,
}

/// A storage-daemon ("shark") inventory record as reported by the metadata
/// service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageNode {
    pub datacenter: String,
    pub manta_storage_id: String,
    #[serde(rename = "availableMB")]
    pub available_mb: u64,
    #[serde(rename = "percentUsed")]
    pub percent_used: u32,
    pub timestamp: i64,
}

/// One page of the storage-node listing query, cursor-paged by ascending
/// `_id`. `next_id` is `None` once the listing is drained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageNodePage {
    pub nodes: Vec<StorageNode>,
    #[serde(rename = "nextId")]
    pub next_id: Option<String>,
}

/// A single replica location, the shape recorded in object metadata and
/// handed to clients as `sharks`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SharkRef {
    pub datacenter: String,
    pub manta_storage_id: String,
}

impl From<&StorageNode> for SharkRef {
    fn from(node: &StorageNode) -> Self {
        SharkRef {
            datacenter: node.datacenter.clone(),
            manta_storage_id: node.manta_storage_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Object,
    Directory,
    Bucketobject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub key: String,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub owner_uuid: Uuid,
    pub etag: String,
    pub content_md5: String,
    pub content_length: u64,
    pub content_type: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub roles: Vec<Uuid>,
    pub modified: i64,
    #[serde(default)]
    pub sharks: Vec<SharkRef>,
}

impl ObjectMetadata {
    /// Only `m-`-prefixed headers are durable user metadata.
    pub fn durable_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
        headers
            .iter()
            .filter(|(k, _)| k.starts_with("m-"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
