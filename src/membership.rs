//! Cluster membership value types: endpoints, member types and configurations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Log position of an entry; `NO_POSITION` marks "no entry".
pub type Position = i64;

/// Election epoch.
pub type Term = i32;

pub const NO_POSITION: Position = -1;
pub const NO_TERM: Term = -1;

/// Host/port identity of a cluster member. Equality is structural and the type
/// is used as the key for sessions and membership lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointParseError {
    #[error("endpoint `{0}` is missing a port")]
    MissingPort(String),
    #[error("endpoint `{0}` has an invalid port")]
    InvalidPort(String),
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (host, port) = value
            .rsplit_once(':')
            .ok_or_else(|| EndpointParseError::MissingPort(value.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointParseError::InvalidPort(value.to_string()))?;
        Ok(Endpoint::new(host, port))
    }
}

/// Whether a member takes part in quorum decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberType {
    Active,
    Inactive,
}

impl MemberType {
    pub fn is_active(self) -> bool {
        matches!(self, MemberType::Active)
    }
}

impl fmt::Display for MemberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberType::Active => write!(f, "active"),
            MemberType::Inactive => write!(f, "inactive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    pub endpoint: Endpoint,
    pub member_type: MemberType,
}

impl Member {
    pub fn new(endpoint: Endpoint, member_type: MemberType) -> Self {
        Self {
            endpoint,
            member_type,
        }
    }

    pub fn active(endpoint: Endpoint) -> Self {
        Self::new(endpoint, MemberType::Active)
    }

    pub fn inactive(endpoint: Endpoint) -> Self {
        Self::new(endpoint, MemberType::Inactive)
    }
}

/// Membership snapshot applied atomically. `position` is the log position of the
/// entry that carried it, or [`NO_POSITION`] for a bootstrap configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub position: Position,
    pub new_members: Vec<Member>,
    pub old_members: Vec<Member>,
}

impl Configuration {
    pub fn new(position: Position, new_members: Vec<Member>, old_members: Vec<Member>) -> Self {
        Self {
            position,
            new_members,
            old_members,
        }
    }

    pub fn bootstrap(members: Vec<Member>) -> Self {
        Self::new(NO_POSITION, members, Vec::new())
    }

    pub fn member(&self, endpoint: &Endpoint) -> Option<&Member> {
        self.new_members
            .iter()
            .find(|member| &member.endpoint == endpoint)
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.member(endpoint).is_some()
    }

    pub fn active_count(&self) -> usize {
        self.new_members
            .iter()
            .filter(|member| member.member_type.is_active())
            .count()
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::bootstrap(Vec::new())
    }
}
