//! worksite core library: domain types, YAML codec, project catalog,
//! lock-guarded registry persistence, settings and the error taxonomy.
//!
//! - [`types`]: newtypes, registry documents, project definitions
//! - [`codec`]: YAML encode/decode with distinct syntax vs schema failures
//! - [`catalog`]: resolve projects by name or directory, load definitions
//! - [`registry`]: the cross-process transactional store
//! - [`settings`]: user settings with env/CLI layering
//! - [`error`]: [`ConfigError`], [`RegistryError`], [`ErrorKind`]

pub mod catalog;
pub mod codec;
pub mod error;
pub mod paths;
pub mod registry;
pub mod settings;
pub mod types;

pub use error::{ConfigError, ErrorKind, RegistryError};
pub use registry::{RegistryLock, RegistryStore};
pub use settings::Settings;
pub use types::{
    AgentCommands, Project, ProjectDefinition, ProjectName, Registry, Workspace, WorkspaceName,
};
