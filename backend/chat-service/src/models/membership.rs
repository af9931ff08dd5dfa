//! Group and broadcast membership as seen by the chat core
//!
//! Membership is owned by the membership service; the core only reads
//! recipient sets and enforces the capacity limits on sends.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum members in a group
pub const GROUP_CAPACITY: usize = 151;

/// Maximum recipients of a broadcast list
pub const BROADCAST_CAPACITY: usize = 101;

/// Group member role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    User,
}

impl MemberRole {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "user" => Some(Self::User),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db())
    }
}

/// A current member of a group or broadcast; broadcasts carry no role
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub user_id: Uuid,
    pub role: Option<MemberRole>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_db_strings() {
        assert_eq!(MemberRole::from_db("admin"), Some(MemberRole::Admin));
        assert_eq!(MemberRole::from_db("owner"), None);
        assert_eq!(MemberRole::User.to_string(), "user");
    }
}
