// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! TOML form of an installation request.
//!
//! ```toml
//! [authority]
//! realm = "EXAMPLE.COM"
//! host_name = "ipa.example.com"
//! dm_password = "Secret123"
//!
//! [external]
//! csr_file = "/root/ipa.csr"
//!
//! [timeouts]
//! port_wait_secs = 300
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{ports, InstallationRequest};
use crate::error::{InstallError, Result};

/// Complete installer file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallerFile {
    /// Identity of the authority being installed.
    pub authority: AuthoritySection,

    /// Clone source, when installing a replica of an existing authority.
    #[serde(default)]
    pub clone: Option<CloneSection>,

    /// Two-phase installs signed by an external CA.
    #[serde(default)]
    pub external: ExternalSection,

    /// Filesystem locations.
    #[serde(default)]
    pub paths: PathsSection,

    /// Timeouts.
    #[serde(default)]
    pub timeouts: TimeoutsSection,
}

/// `[authority]`
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthoritySection {
    /// Realm name; upper-cased on conversion.
    pub realm: String,
    /// Fully-qualified host name of this machine.
    pub host_name: String,
    /// Directory manager password.
    pub dm_password: String,
    /// Defaults to the directory manager password.
    #[serde(default)]
    pub admin_password: Option<String>,
    /// Port of the authority's directory server.
    #[serde(default = "default_ds_port")]
    pub ds_port: u16,
    /// Defaults to `O=<REALM>`.
    #[serde(default)]
    pub subject_base: Option<String>,
}

impl std::fmt::Debug for AuthoritySection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthoritySection")
            .field("realm", &self.realm)
            .field("host_name", &self.host_name)
            .field("ds_port", &self.ds_port)
            .field("subject_base", &self.subject_base)
            .finish_non_exhaustive()
    }
}

/// `[clone]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloneSection {
    /// PKCS#12 bundle exported from the master.
    pub pkcs12: PathBuf,
    /// Host name of the master authority.
    pub master_host: String,
}

/// `[external]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalSection {
    /// Write the CSR here and stop (first phase).
    #[serde(default)]
    pub csr_file: Option<PathBuf>,
    /// Signed CA certificate (second phase).
    #[serde(default)]
    pub signed_cert: Option<PathBuf>,
    /// Chain of the external CA (second phase).
    #[serde(default)]
    pub cert_chain: Option<PathBuf>,
}

/// `[paths]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsSection {
    /// Recreate the RA agent database.
    #[serde(default = "default_true")]
    pub create_ra_agent_db: bool,
    /// RA agent database directory.
    #[serde(default)]
    pub ra_agent_db: Option<PathBuf>,
    /// Scratch database for the CA agent credentials.
    #[serde(default)]
    pub ca_agent_db: Option<PathBuf>,
    /// Parent directory of the authority instance.
    #[serde(default)]
    pub instance_root: Option<PathBuf>,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            create_ra_agent_db: true,
            ra_agent_db: None,
            ca_agent_db: None,
            instance_root: None,
        }
    }
}

/// `[timeouts]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutsSection {
    /// Ceiling on waiting for the authority port after a restart.
    #[serde(default = "default_port_wait")]
    pub port_wait_secs: u64,
    /// HTTP request timeout against the authority.
    #[serde(default = "default_request_timeout")]
    pub request_secs: u64,
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            port_wait_secs: default_port_wait(),
            request_secs: default_request_timeout(),
        }
    }
}

fn default_ds_port() -> u16 {
    ports::DEFAULT_DS
}

fn default_true() -> bool {
    true
}

fn default_port_wait() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    30
}

impl InstallerFile {
    /// Parse an installer file from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or missing required fields.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| InstallError::config(format!("Invalid TOML: {e}")))
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| InstallError::config(format!("TOML serialize: {e}")))
    }

    /// Read and parse an installer file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            InstallError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        tracing::debug!("Loaded installer file from {}", path.display());
        Self::from_toml(&content)
    }

    /// Validate the file for completeness and consistency.
    ///
    /// # Errors
    ///
    /// Returns every problem found, joined into one configuration error.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.authority.realm.trim().is_empty() {
            errors.push("authority.realm is required".to_string());
        }
        if self.authority.host_name.trim().is_empty() {
            errors.push("authority.host_name is required".to_string());
        } else if !self.authority.host_name.contains('.') {
            errors.push("authority.host_name must be fully qualified".to_string());
        }
        if self.authority.dm_password.is_empty() {
            errors.push("authority.dm_password is required".to_string());
        }
        if self.authority.ds_port == 0 {
            errors.push("authority.ds_port must be > 0".to_string());
        }

        if let Some(clone) = &self.clone {
            if clone.master_host.trim().is_empty() {
                errors.push("clone.master_host is required".to_string());
            }
        }

        let external = &self.external;
        if external.signed_cert.is_some() != external.cert_chain.is_some() {
            errors.push("external.signed_cert and external.cert_chain must be given together".to_string());
        }
        if external.csr_file.is_some() && external.signed_cert.is_some() {
            errors.push("external.csr_file cannot be combined with external.signed_cert".to_string());
        }
        if self.clone.is_some() && (external.csr_file.is_some() || external.signed_cert.is_some()) {
            errors.push("a clone cannot be signed by an external CA".to_string());
        }

        if self.timeouts.port_wait_secs == 0 {
            errors.push("timeouts.port_wait_secs must be > 0".to_string());
        }
        if self.timeouts.request_secs == 0 {
            errors.push("timeouts.request_secs must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(InstallError::config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }

    /// Validate and convert into an [`InstallationRequest`].
    pub fn into_request(self) -> Result<InstallationRequest> {
        self.validate()?;

        let authority = self.authority;
        let mut builder = InstallationRequest::builder()
            .realm(authority.realm)
            .host_name(authority.host_name)
            .dm_password(authority.dm_password)
            .ds_port(authority.ds_port)
            .port_wait(Duration::from_secs(self.timeouts.port_wait_secs))
            .timeout(Duration::from_secs(self.timeouts.request_secs));

        if let Some(password) = authority.admin_password {
            builder = builder.admin_password(password);
        }
        if let Some(base) = authority.subject_base {
            builder = builder.subject_base(base);
        }
        if let Some(clone) = self.clone {
            builder = builder.clone_from(clone.pkcs12, clone.master_host);
        }
        if let Some(csr_file) = self.external.csr_file {
            builder = builder.csr_file(csr_file);
        }
        if let (Some(cert), Some(chain)) = (self.external.signed_cert, self.external.cert_chain) {
            builder = builder.signed_cert(cert, chain);
        }
        if !self.paths.create_ra_agent_db {
            builder = builder.keep_ra_agent_db();
        }
        if let Some(dir) = self.paths.ra_agent_db {
            builder = builder.ra_agent_db(dir);
        }
        if let Some(dir) = self.paths.ca_agent_db {
            builder = builder.ca_agent_db(dir);
        }
        if let Some(dir) = self.paths.instance_root {
            builder = builder.instance_root(dir);
        }

        builder.build().map_err(InstallError::config)
    }
}
