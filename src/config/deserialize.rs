// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Handles shorthand command entries and the explicit shift step list.

use nonempty::NonEmpty;
use serde::Deserialize;
use std::time::Duration;

use crate::service::CommandSpec;

/// A command is either a bare string or `{command, timeout}`.
pub fn deserialize_command<'de, D>(deserializer: D) -> Result<CommandSpec, D::Error>
where
    D: serde::Deserializer<'de>,
{
    CommandEntry::deserialize(deserializer).map(CommandEntry::into_spec)
}

pub fn deserialize_command_option<'de, D>(deserializer: D) -> Result<Option<CommandSpec>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<CommandEntry> = Option::deserialize(deserializer)?;
    Ok(opt.map(CommandEntry::into_spec))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StepEntry {
    pub weight: u32,
    #[serde(with = "humantime_serde")]
    pub hold: Duration,
}

pub fn deserialize_steps<'de, D>(deserializer: D) -> Result<NonEmpty<StepEntry>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let steps: Vec<StepEntry> = Vec::deserialize(deserializer)?;
    NonEmpty::from_vec(steps)
        .ok_or_else(|| serde::de::Error::custom("at least one shift step is required"))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandEntry {
    Simple(String),
    Detailed(CommandSpec),
}

impl CommandEntry {
    fn into_spec(self) -> CommandSpec {
        match self {
            CommandEntry::Simple(command) => CommandSpec {
                command,
                timeout: None,
            },
            CommandEntry::Detailed(spec) => spec,
        }
    }
}
