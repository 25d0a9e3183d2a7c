use std::collections::HashSet;

use log::debug;
use serde_yaml::Value;
use thiserror::Error;

use super::model::KubeConfig;
use crate::error::{ForgeError, Result};

/// Structural problems found in a kubeconfig that decoded cleanly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("missing required field '{field}'")]
    MissingField { field: String },

    #[error("context '{context}' references unknown cluster '{cluster}'")]
    DanglingClusterRef { context: String, cluster: String },

    #[error("context '{context}' references unknown user '{user}'")]
    DanglingUserRef { context: String, user: String },

    #[error("current-context '{name}' does not name a context")]
    DanglingCurrentContext { name: String },
}

fn missing(field: impl Into<String>) -> StructuralError {
    StructuralError::MissingField {
        field: field.into(),
    }
}

fn is_blank(yaml: &str) -> bool {
    yaml.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#') || line == "---"
    })
}

/// Decodes a kubeconfig document. Empty input yields an empty config.
pub fn decode(yaml: &str) -> Result<KubeConfig> {
    if is_blank(yaml) {
        return Ok(KubeConfig::default());
    }

    let value: Value = serde_yaml::from_str(yaml)?;
    if value.is_null() {
        return Ok(KubeConfig::default());
    }
    Ok(serde_yaml::from_value(value)?)
}

pub fn encode(config: &KubeConfig) -> Result<String> {
    serde_yaml::to_string(config).map_err(|e| ForgeError::SerializeYaml(e.to_string()))
}

/// Checks names and cross references.
pub fn validate_structure(config: &KubeConfig) -> std::result::Result<(), StructuralError> {
    let mut cluster_names = HashSet::new();
    for (index, cluster) in config.clusters.iter().enumerate() {
        if cluster.name.trim().is_empty() {
            return Err(missing(format!("clusters[{}].name", index)));
        }
        if cluster.cluster.server.trim().is_empty() {
            return Err(missing(format!("clusters[{}].cluster.server", index)));
        }
        cluster_names.insert(cluster.name.as_str());
    }

    let mut user_names = HashSet::new();
    for (index, user) in config.users.iter().enumerate() {
        if user.name.trim().is_empty() {
            return Err(missing(format!("users[{}].name", index)));
        }
        user_names.insert(user.name.as_str());
    }

    let mut context_names = HashSet::new();
    for (index, context) in config.contexts.iter().enumerate() {
        if context.name.trim().is_empty() {
            return Err(missing(format!("contexts[{}].name", index)));
        }
        let details = &context.context;
        if details.cluster.is_empty() {
            return Err(missing(format!("contexts[{}].context.cluster", index)));
        }
        if details.user.is_empty() {
            return Err(missing(format!("contexts[{}].context.user", index)));
        }
        if !cluster_names.contains(details.cluster.as_str()) {
            return Err(StructuralError::DanglingClusterRef {
                context: context.name.clone(),
                cluster: details.cluster.clone(),
            });
        }
        if !user_names.contains(details.user.as_str()) {
            return Err(StructuralError::DanglingUserRef {
                context: context.name.clone(),
                user: details.user.clone(),
            });
        }
        context_names.insert(context.name.as_str());
    }

    if let Some(current) = config.current_context_name() {
        if !context_names.contains(current) {
            return Err(StructuralError::DanglingCurrentContext {
                name: current.to_string(),
            });
        }
    }

    Ok(())
}

/// Decodes and validates; the only way a document becomes trusted.
pub fn decode_validated(yaml: &str) -> Result<KubeConfig> {
    let config = decode(yaml)?;
    validate_structure(&config)?;
    debug!(
        "Validated kubeconfig: {} clusters, {} contexts, {} users",
        config.clusters.len(),
        config.contexts.len(),
        config.users.len()
    );
    Ok(config)
}
