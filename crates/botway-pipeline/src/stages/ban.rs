use async_trait::async_trait;
use botway_common::{LauncherType, Result};
use botway_config::{AccessControlMode, PipelineConfig};

use crate::query::Query;
use crate::stage::{Stage, StageOutput, StageResult};

/// Access control gate. Entry forms:
/// `"{launcher_type}_*"` (any session of that type),
/// `"{launcher_type}_{launcher_id}"` (exact session),
/// `"*_{id}"` (matches either the sender or the launcher id).
pub struct BanSessionCheckStage {
    mode: AccessControlMode,
    entries: Vec<String>,
}

impl BanSessionCheckStage {
    pub fn new() -> Self {
        Self {
            mode: AccessControlMode::Blacklist,
            entries: Vec::new(),
        }
    }
}

impl Default for BanSessionCheckStage {
    fn default() -> Self {
        Self::new()
    }
}

fn entry_matches(
    entry: &str,
    launcher_type: LauncherType,
    launcher_id: &str,
    sender_id: &str,
) -> bool {
    if let Some(id) = entry.strip_prefix("*_") {
        return id == sender_id || id == launcher_id;
    }
    let type_prefix = format!("{launcher_type}_");
    if let Some(rest) = entry.strip_prefix(&type_prefix) {
        return rest == "*" || rest == launcher_id;
    }
    false
}

#[async_trait]
impl Stage for BanSessionCheckStage {
    fn name(&self) -> &'static str {
        "BanSessionCheck"
    }

    async fn initialize(&mut self, config: &PipelineConfig) -> Result<()> {
        let ac = &config.trigger.access_control;
        self.mode = ac.mode;
        self.entries = match ac.mode {
            AccessControlMode::Whitelist => ac.whitelist.clone(),
            AccessControlMode::Blacklist => ac.blacklist.clone(),
        };
        Ok(())
    }

    async fn process(&self, query: Query, _stage_name: &str) -> Result<StageOutput> {
        let listed = self.entries.iter().any(|entry| {
            entry_matches(
                entry,
                query.launcher_type,
                &query.launcher_id,
                &query.sender_id,
            )
        });
        let admitted = listed == (self.mode == AccessControlMode::Whitelist);

        if admitted {
            Ok(StageOutput::Single(StageResult::cont(query)))
        } else {
            let notice = format!(
                "Ignore message according to access control: {}",
                query.session_key()
            );
            Ok(StageOutput::Single(
                StageResult::interrupt(query).with_console_notice(notice),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_entries_match_their_session_only() {
        assert!(entry_matches("person_42", LauncherType::Person, "42", "42"));
        assert!(!entry_matches("person_42", LauncherType::Person, "43", "43"));
        assert!(!entry_matches("person_42", LauncherType::Group, "42", "42"));
    }

    #[test]
    fn wildcard_within_type_matches_any_id() {
        assert!(entry_matches("group_*", LauncherType::Group, "g1", "u1"));
        assert!(!entry_matches("group_*", LauncherType::Person, "g1", "u1"));
    }

    #[test]
    fn id_wildcard_matches_sender_or_launcher() {
        // Group message: launcher is the group, sender is the user.
        assert!(entry_matches("*_u9", LauncherType::Group, "g1", "u9"));
        assert!(entry_matches("*_g1", LauncherType::Group, "g1", "u9"));
        assert!(!entry_matches("*_other", LauncherType::Group, "g1", "u9"));
    }
}
