//! Resource, resource manager, and property records.
//!
//! Records are plain data: the store persists them, the orchestrator mutates
//! them through sessions, and drivers read snapshots. Read APIs go through
//! [`ResourceView`] and [`ManagerView`], which drop transient workflow markers
//! and mask credentials.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod kind;

pub use kind::{ManagerKind, ParseTagError, ResourceKind, ResourceState};

pub mod keys;

const MASK: &str = "******";

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(value.trim()).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a [`Resource`].
    ResourceId
);
uuid_id!(
    /// Identifier of a [`ResourceManager`].
    ManagerId
);
uuid_id!(
    /// Identifier of a [`Property`].
    PropertyId
);

/// Credential string that never appears in `Debug` output.
#[derive(Clone, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wraps a credential value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw credential for use on the wire.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns `true` when no credential was supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({MASK})")
    }
}

/// A single fact attached to a resource or resource manager.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Property {
    /// Identifier of this property record.
    pub id: PropertyId,
    /// Property key; see [`keys`] for the documented set.
    pub key: String,
    /// Property value, often serialised JSON.
    pub value: String,
}

impl Property {
    /// Creates a property with a fresh identifier.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: PropertyId::generate(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A managed compute entity.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Resource {
    /// Unique identifier assigned on creation.
    pub id: ResourceId,
    /// Human name, unique among comparable kinds.
    pub name: String,
    /// Resource kind; selects the driver.
    pub kind: ResourceKind,
    /// Current lifecycle state.
    pub state: ResourceState,
    /// Network address of the resource.
    pub address: String,
    /// Login user for remote access.
    pub username: String,
    /// Login password for remote access.
    pub password: Secret,
    /// Optional management port.
    pub port: Option<u16>,
    /// Owning resource manager, for subordinate kinds.
    pub resource_manager_id: Option<ManagerId>,
    /// Ordered property list.
    #[serde(default)]
    pub properties: Vec<Property>,
}

impl Resource {
    /// Returns the first value stored under `key`.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        find_property(&self.properties, key)
    }

    /// Replaces every value of `key` with a single `value`.
    pub fn set_property(&mut self, key: &str, value: impl Into<String>) {
        self.remove_property(key);
        self.properties.push(Property::new(key, value));
    }

    /// Removes every value of `key`, returning how many were removed.
    pub fn remove_property(&mut self, key: &str) -> usize {
        let before = self.properties.len();
        self.properties.retain(|property| property.key != key);
        before - self.properties.len()
    }

    /// Returns the read-side representation of this resource.
    #[must_use]
    pub fn view(&self) -> ResourceView {
        ResourceView {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            state: self.state,
            address: self.address.clone(),
            username: self.username.clone(),
            port: self.port,
            resource_manager_id: self.resource_manager_id,
            properties: public_properties(&self.properties),
        }
    }
}

/// An upstream virtualization manager that owns clusters.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ResourceManager {
    /// Unique identifier assigned on creation.
    pub id: ManagerId,
    /// Human name.
    pub name: String,
    /// Manager kind.
    pub kind: ManagerKind,
    /// Network address of the manager endpoint.
    pub address: String,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: Secret,
    /// Optional endpoint port.
    pub port: Option<u16>,
    /// Ordered property list.
    #[serde(default)]
    pub properties: Vec<Property>,
}

impl ResourceManager {
    /// Returns the first value stored under `key`.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        find_property(&self.properties, key)
    }

    /// Returns the read-side representation of this manager.
    #[must_use]
    pub fn view(&self) -> ManagerView {
        ManagerView {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            address: self.address.clone(),
            username: self.username.clone(),
            port: self.port,
            properties: public_properties(&self.properties),
        }
    }
}

/// Input for creating a resource.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NewResource {
    /// Human name.
    pub name: String,
    /// Requested kind.
    pub kind: ResourceKind,
    /// Network address.
    pub address: String,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: Secret,
    /// Optional port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Owning manager, required for clusters.
    #[serde(default)]
    pub resource_manager_id: Option<ManagerId>,
    /// Kind-specific input fields; drivers pick what to persist.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Initial state, injected by the driver during validation.
    #[serde(default)]
    pub state: Option<ResourceState>,
}

/// Partial update of a resource's top-level fields.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ResourceUpdate {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,
    /// New address.
    #[serde(default)]
    pub address: Option<String>,
    /// New login user.
    #[serde(default)]
    pub username: Option<String>,
    /// New login password.
    #[serde(default)]
    pub password: Option<Secret>,
    /// New port.
    #[serde(default)]
    pub port: Option<u16>,
}

impl ResourceUpdate {
    /// Returns `true` when the update changes how the resource is reached.
    #[must_use]
    pub fn touches_connection(&self, current: &Resource) -> bool {
        self.address
            .as_ref()
            .is_some_and(|value| value != &current.address)
            || self
                .username
                .as_ref()
                .is_some_and(|value| value != &current.username)
            || self
                .password
                .as_ref()
                .is_some_and(|value| value != &current.password)
            || self.port.is_some_and(|value| Some(value) != current.port)
    }

    /// Applies the update to a copy of `current`.
    #[must_use]
    pub fn apply_to(&self, current: &Resource) -> Resource {
        let mut next = current.clone();
        if let Some(name) = &self.name {
            next.name = name.trim().to_owned();
        }
        if let Some(address) = &self.address {
            next.address = address.trim().to_owned();
        }
        if let Some(username) = &self.username {
            next.username = username.trim().to_owned();
        }
        if let Some(password) = &self.password {
            next.password = password.clone();
        }
        if self.port.is_some() {
            next.port = self.port;
        }
        next
    }
}

/// Input for registering a resource manager.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NewManager {
    /// Human name.
    pub name: String,
    /// Manager kind.
    #[serde(default)]
    pub kind: ManagerKind,
    /// Endpoint address.
    pub address: String,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: Secret,
    /// Optional endpoint port.
    #[serde(default)]
    pub port: Option<u16>,
}

/// Partial update of a resource manager.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ManagerUpdate {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,
    /// New endpoint address.
    #[serde(default)]
    pub address: Option<String>,
    /// New login user.
    #[serde(default)]
    pub username: Option<String>,
    /// New login password.
    #[serde(default)]
    pub password: Option<Secret>,
    /// New endpoint port.
    #[serde(default)]
    pub port: Option<u16>,
}

impl ManagerUpdate {
    /// Returns `true` when the update changes how the manager is reached.
    #[must_use]
    pub fn touches_connection(&self, current: &ResourceManager) -> bool {
        self.address
            .as_ref()
            .is_some_and(|value| value != &current.address)
            || self
                .username
                .as_ref()
                .is_some_and(|value| value != &current.username)
            || self
                .password
                .as_ref()
                .is_some_and(|value| value != &current.password)
            || self.port.is_some_and(|value| Some(value) != current.port)
    }

    /// Applies the update to a copy of `current`.
    #[must_use]
    pub fn apply_to(&self, current: &ResourceManager) -> ResourceManager {
        let mut next = current.clone();
        if let Some(name) = &self.name {
            next.name = name.trim().to_owned();
        }
        if let Some(address) = &self.address {
            next.address = address.trim().to_owned();
        }
        if let Some(username) = &self.username {
            next.username = username.trim().to_owned();
        }
        if let Some(password) = &self.password {
            next.password = password.clone();
        }
        if self.port.is_some() {
            next.port = self.port;
        }
        next
    }
}

/// A property as exposed by read APIs.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PropertyView {
    /// Property key.
    pub key: String,
    /// Property value, masked for credential keys.
    pub value: String,
}

/// Read-side representation of a [`Resource`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ResourceView {
    /// Resource identifier.
    pub id: ResourceId,
    /// Human name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Lifecycle state.
    pub state: ResourceState,
    /// Network address.
    pub address: String,
    /// Login user.
    pub username: String,
    /// Optional port.
    pub port: Option<u16>,
    /// Owning manager.
    pub resource_manager_id: Option<ManagerId>,
    /// Non-transient properties.
    pub properties: Vec<PropertyView>,
}

/// Read-side representation of a [`ResourceManager`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ManagerView {
    /// Manager identifier.
    pub id: ManagerId,
    /// Human name.
    pub name: String,
    /// Manager kind.
    pub kind: ManagerKind,
    /// Endpoint address.
    pub address: String,
    /// Login user.
    pub username: String,
    /// Optional endpoint port.
    pub port: Option<u16>,
    /// Non-transient properties.
    pub properties: Vec<PropertyView>,
}

fn find_property<'a>(properties: &'a [Property], key: &str) -> Option<&'a str> {
    properties
        .iter()
        .find(|property| property.key == key)
        .map(|property| property.value.as_str())
}

fn public_properties(properties: &[Property]) -> Vec<PropertyView> {
    properties
        .iter()
        .filter(|property| !keys::is_transient(&property.key))
        .map(|property| PropertyView {
            key: property.key.clone(),
            value: if keys::is_sensitive(&property.key) {
                MASK.to_owned()
            } else {
                property.value.clone()
            },
        })
        .collect()
}
