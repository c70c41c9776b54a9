// Spawn request validation
// Runs in the client before a request is sent, so a bad request never
// reaches the launcher.

use crate::config::types::{
    ClonerError, NetworkConfig, Result, SandboxConfig, MAX_INTERFACE_NAME_LEN,
};

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate a sandbox configuration; errors are fatal, warnings are logged.
pub fn validate_sandbox_config(config: &SandboxConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    if let Some(root) = &config.chroot_dir {
        if !root.is_absolute() {
            result.add_error(format!("chroot_dir must be absolute: {}", root.display()));
        } else if !root.is_dir() {
            result.add_error(format!("chroot_dir is not a directory: {}", root.display()));
        }
    }

    if let Some(network) = &config.network {
        validate_network(network, &mut result);
    }

    if !config.skip_sandbox_except.is_empty() {
        result.add_warning(format!(
            "skip_sandbox_except is set ({}); only these layers will run. DO NOT USE IN PRODUCTION",
            config
                .skip_sandbox_except
                .iter()
                .map(|l| l.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    for warning in &result.warnings {
        log::warn!("{}", warning);
    }

    if !result.is_valid() {
        return Err(ClonerError::Config(format!(
            "Invalid sandbox config:\n{}",
            result.errors.join("\n")
        )));
    }

    Ok(result)
}

fn validate_network(network: &NetworkConfig, result: &mut ValidationResult) {
    for (field, name) in [
        ("host_veth_name", &network.host_veth_name),
        ("child_veth_name", &network.child_veth_name),
    ] {
        if name.is_empty() {
            result.add_error(format!("{} must not be empty", field));
        } else if name.len() > MAX_INTERFACE_NAME_LEN {
            result.add_error(format!(
                "{} {:?} is {} bytes; the kernel allows at most {}",
                field,
                name,
                name.len(),
                MAX_INTERFACE_NAME_LEN
            ));
        } else if name.contains('/') || name.chars().any(char::is_whitespace) {
            result.add_error(format!("{} {:?} contains invalid characters", field, name));
        }
    }

    if network.host_veth_name == network.child_veth_name {
        result.add_error("host and child veth names must differ".to_string());
    }

    let host = network.host_ipv4_address.octets();
    let child = network.child_ipv4_address.octets();
    if host[..3] != child[..3] {
        result.add_error(format!(
            "host {} and child {} are not in the same /{} block",
            network.host_ipv4_address,
            network.child_ipv4_address,
            NetworkConfig::PREFIX_LEN
        ));
    }
    if host == child {
        result.add_error("host and child addresses must differ".to_string());
    }
    if !network.child_ipv4_address.is_private() {
        result.add_warning(format!(
            "child address {} is not in a private range",
            network.child_ipv4_address
        ));
    }
}
