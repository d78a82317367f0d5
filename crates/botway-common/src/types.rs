use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a message came from: a private chat or a group chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LauncherType {
    Person,
    Group,
}

impl fmt::Display for LauncherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LauncherType::Person => write!(f, "person"),
            LauncherType::Group => write!(f, "group"),
        }
    }
}

impl LauncherType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "person" => Some(LauncherType::Person),
            "group" => Some(LauncherType::Group),
            _ => None,
        }
    }
}

/// Canonical session key: `"{launcher_type}_{launcher_id}"`.
pub fn session_key(launcher_type: LauncherType, launcher_id: &str) -> String {
    format!("{launcher_type}_{launcher_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_format() {
        assert_eq!(session_key(LauncherType::Person, "42"), "person_42");
        assert_eq!(session_key(LauncherType::Group, "g1"), "group_g1");
    }

    #[test]
    fn launcher_type_round_trips_through_display() {
        for lt in [LauncherType::Person, LauncherType::Group] {
            assert_eq!(LauncherType::parse(&lt.to_string()), Some(lt));
        }
    }
}
