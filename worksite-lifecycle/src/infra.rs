//! Build the shell commands for a workspace's infra and agent entries.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use worksite_core::{ProjectDefinition, Workspace};
use worksite_exec::{OutputMode, ShellCommand};

use crate::error::LifecycleError;

/// Variables exported to every command run for a workspace.
pub fn workspace_env(ws: &Workspace, project_root: &Path) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("WORKSITE_PROJECT".to_string(), ws.project.0.clone()),
        ("WORKSITE_NAME".to_string(), ws.name.0.clone()),
        ("WORKSITE_PATH".to_string(), ws.path.display().to_string()),
        (
            "WORKSITE_PROJECT_ROOT".to_string(),
            project_root.display().to_string(),
        ),
    ])
}

/// `command` rooted at the workspace with its environment exported.
pub fn workspace_command(
    ws: &Workspace,
    project_root: &Path,
    command: impl Into<String>,
    timeout: Option<Duration>,
    output: OutputMode,
) -> ShellCommand {
    ShellCommand::new(command, &ws.path)
        .envs(workspace_env(ws, project_root))
        .timeout(timeout)
        .output(output)
}

/// Look up the infra entry `name` (`start`, `stop`, `test`, ...).
pub fn infra_command<'d>(
    definition: &'d ProjectDefinition,
    name: &str,
) -> Result<&'d str, LifecycleError> {
    definition
        .infra_command(name)
        .ok_or_else(|| LifecycleError::UnknownInfraCommand {
            project: definition.name.clone(),
            command: name.to_string(),
            available: definition.infra.keys().cloned().collect(),
        })
}

pub fn agent_command(
    definition: &ProjectDefinition,
    readonly: bool,
) -> Result<&str, LifecycleError> {
    let agent = definition.agent.as_ref();
    let command = if readonly {
        agent.and_then(|a| a.readonly.as_deref())
    } else {
        agent.map(|a| a.primary.as_str())
    };
    command.ok_or_else(|| LifecycleError::MissingAgentCommand {
        project: definition.name.clone(),
        readonly,
    })
}
