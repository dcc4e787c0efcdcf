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

//! Host capabilities used by the installer.
//!
//! The installer never touches the operating system, the certificate
//! databases or the directory server directly. It calls three traits:
//!
//! - [`SystemCapabilities`]: processes, files, accounts, services and ports
//! - [`TrustDatabase`]: an NSS-style certificate and key database
//! - [`DirectoryService`]: LDAP entry creation and modification
//!
//! Host implementations live in the submodules: [`HostCapabilities`] runs
//! real processes, [`CertutilDatabase`] drives `certutil`/`pk12util`, and
//! [`LdapModifyDirectory`] feeds LDIF to `ldapmodify`. Tests substitute
//! recording fakes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pki_ca_install::capabilities::{
//!     CertutilDatabase, HostCapabilities, SystemCapabilities, ToolCommand, TrustDatabase,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let host = Arc::new(HostCapabilities::new());
//! let out = host.run(ToolCommand::new("/usr/bin/id").arg("-u")).await?;
//! println!("uid {}", out.stdout.trim());
//!
//! let db = CertutilDatabase::new(host, "/etc/httpd/alias", "/etc/httpd/alias/pwdfile.txt");
//! let pem = db.export_certificate("ipaCert").await?;
//! # Ok(())
//! # }
//! ```

mod certutil;
mod host;
mod ldap;

pub use certutil::CertutilDatabase;
pub use host::HostCapabilities;
pub use ldap::LdapModifyDirectory;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;

use crate::config::ClientIdentity;
use crate::error::Result;

/// Placeholder printed in place of secret arguments.
const MASK: &str = "XXXXXXXX";

/// An external command to execute.
#[derive(Clone, Default)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    stdin: Option<Vec<u8>>,
    redact: Vec<String>,
    check: bool,
}

impl ToolCommand {
    /// Create a command; a non-zero exit is an error unless [`unchecked`](Self::unchecked).
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            check: true,
            ..Default::default()
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Feed bytes to the child's standard input.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Mask `secret` wherever it appears when the command is displayed.
    pub fn redact(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.redact.push(secret);
        }
        self
    }

    /// Report the exit status instead of failing on non-zero.
    pub fn unchecked(mut self) -> Self {
        self.check = false;
        self
    }

    /// Program to execute.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments, unmasked.
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Environment overrides.
    pub fn envs(&self) -> &[(String, String)] {
        &self.env
    }

    /// Standard input, if any.
    pub fn input(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    /// Returns true if a non-zero exit is an error.
    pub fn is_checked(&self) -> bool {
        self.check
    }

    /// Mask every redacted secret in `text`.
    pub fn mask(&self, text: &str) -> String {
        self.redact
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), MASK))
    }
}

impl std::fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        f.write_str(&self.mask(&line))
    }
}

impl std::fmt::Debug for ToolCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCommand")
            .field("command", &self.to_string())
            .field("stdin", &self.stdin.as_ref().map(|s| s.len()))
            .finish()
    }
}

/// Result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit status (-1 when killed by a signal).
    pub status: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ToolOutput {
    /// Returns true if the command exited with status 0.
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Service control operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    /// Start the service.
    Start,
    /// Stop the service.
    Stop,
    /// Restart the service.
    Restart,
    /// Stop the service from starting on boot.
    Disable,
}

impl ServiceAction {
    /// Verb understood by the service manager.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Disable => "disable",
        }
    }
}

/// Operating-system capabilities.
#[async_trait]
pub trait SystemCapabilities: Send + Sync {
    /// Run a command to completion.
    ///
    /// A checked command that exits non-zero fails with
    /// [`ExternalToolFailure`](crate::error::ErrorKind::ExternalToolFailure).
    async fn run(&self, command: ToolCommand) -> Result<ToolOutput>;

    /// Read a text file.
    async fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Create or truncate a file.
    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Returns true if the path exists.
    async fn path_exists(&self, path: &Path) -> bool;

    /// Copy a file.
    async fn copy_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Move a file.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Create a directory and its parents.
    async fn create_dir(&self, path: &Path) -> Result<()>;

    /// Remove a file.
    async fn remove_file(&self, path: &Path) -> Result<()>;

    /// Set Unix permission bits.
    async fn set_permissions(&self, path: &Path, mode: u32) -> Result<()>;

    /// Change owner and/or group.
    async fn set_owner(&self, path: &Path, user: Option<&str>, group: Option<&str>) -> Result<()>;

    /// Returns true if the system account exists.
    async fn user_exists(&self, user: &str) -> Result<bool>;

    /// Restore the default security context of a path.
    async fn restore_context(&self, path: &Path) -> Result<()>;

    /// Control a service.
    async fn service(&self, name: &str, action: ServiceAction) -> Result<()>;

    /// Returns true if the service starts on boot.
    async fn is_enabled(&self, name: &str) -> Result<bool>;

    /// Returns true if the service is running.
    async fn is_running(&self, name: &str) -> Result<bool>;

    /// Wait until something listens on `host:port`, up to `timeout`.
    async fn wait_for_port(&self, host: &str, port: u16, timeout: Duration) -> Result<()>;
}

/// Trust flags of a certificate database entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustFlags {
    /// Trusted CA for SSL, trusted for email and object signing (`CT,C,C`).
    CertificateAuthority,
    /// User certificate with a private key (`u,u,u`).
    User,
}

impl TrustFlags {
    /// Flag string as `certutil -t` expects it.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CertificateAuthority => "CT,C,C",
            Self::User => "u,u,u",
        }
    }
}

impl std::fmt::Display for TrustFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A certificate and key database.
#[async_trait]
pub trait TrustDatabase: Send + Sync {
    /// Create an empty database protected by the database password.
    async fn create_database(&self) -> Result<()>;

    /// Generate a key pair in the database and return the PEM CSR.
    async fn generate_key_pair_and_csr(&self, subject_dn: &str, key_bits: u32) -> Result<String>;

    /// Import a certificate (PEM or bare base64) under `nickname`.
    async fn import_certificate(&self, cert: &[u8], nickname: &str, trust: TrustFlags)
        -> Result<()>;

    /// Export a certificate as PEM.
    async fn export_certificate(&self, nickname: &str) -> Result<Vec<u8>>;

    /// Certificates that have a private key, as `(nickname, PEM)` pairs.
    async fn find_server_certificates(&self) -> Result<Vec<(String, Vec<u8>)>>;

    /// Change the trust flags of an entry.
    async fn set_trust(&self, nickname: &str, trust: TrustFlags) -> Result<()>;

    /// Nicknames of the issuers in the chain of `nickname`, excluding itself.
    async fn list_chain_nicknames(&self, nickname: &str) -> Result<Vec<String>>;

    /// Export a certificate and its private key for TLS client authentication.
    async fn export_client_identity(&self, nickname: &str) -> Result<ClientIdentity>;

    /// Export a certificate and key to a PKCS#12 file.
    async fn export_pkcs12(&self, nickname: &str, output: &Path, password_file: &Path)
        -> Result<()>;

    /// Import a PKCS#12 file whose password is in `password_file`.
    async fn import_pkcs12(&self, input: &Path, password_file: &Path) -> Result<()>;
}

/// Value of an LDAP attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LdapValue {
    /// UTF-8 text.
    Text(String),
    /// Binary data such as a DER certificate.
    Binary(Vec<u8>),
}

impl From<&str> for LdapValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for LdapValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for LdapValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(b)
    }
}

/// An LDAP entry to add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapEntry {
    /// Distinguished name.
    pub dn: String,
    /// Attributes in insertion order; repeated names are multi-valued.
    pub attributes: Vec<(String, LdapValue)>,
}

impl LdapEntry {
    /// Create an entry without attributes.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: Vec::new(),
        }
    }

    /// Add one attribute value.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<LdapValue>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    /// Values of an attribute.
    pub fn values(&self, name: &str) -> Vec<&LdapValue> {
        self.attributes
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
            .collect()
    }

    /// Render as an LDIF add record.
    pub fn to_ldif(&self) -> String {
        let mut ldif = format!("dn: {}\nchangetype: add\n", self.dn);
        for (name, value) in &self.attributes {
            ldif.push_str(&ldif_line(name, value));
        }
        ldif.push('\n');
        ldif
    }
}

/// One change of an LDAP modify operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LdapModification {
    /// Add values to an attribute.
    Add(String, Vec<LdapValue>),
    /// Replace all values of an attribute.
    Replace(String, Vec<LdapValue>),
}

/// Render an LDIF modify record.
pub fn modify_ldif(dn: &str, changes: &[LdapModification]) -> String {
    let mut ldif = format!("dn: {}\nchangetype: modify\n", dn);
    for change in changes {
        let (op, name, values) = match change {
            LdapModification::Add(name, values) => ("add", name, values),
            LdapModification::Replace(name, values) => ("replace", name, values),
        };
        ldif.push_str(&format!("{}: {}\n", op, name));
        for value in values {
            ldif.push_str(&ldif_line(name, value));
        }
        ldif.push_str("-\n");
    }
    ldif.push('\n');
    ldif
}

fn ldif_line(name: &str, value: &LdapValue) -> String {
    match value {
        LdapValue::Text(text) if is_ldif_safe(text) => format!("{}: {}\n", name, text),
        LdapValue::Text(text) => format!("{}:: {}\n", name, BASE64_STANDARD.encode(text)),
        LdapValue::Binary(bytes) => format!("{}:: {}\n", name, BASE64_STANDARD.encode(bytes)),
    }
}

/// RFC 2849 SAFE-STRING check.
fn is_ldif_safe(text: &str) -> bool {
    let bytes = text.as_bytes();
    match bytes.first() {
        None => true,
        Some(b' ' | b':' | b'<') => false,
        Some(_) => {
            bytes.last() != Some(&b' ')
                && bytes
                    .iter()
                    .all(|b| b.is_ascii() && *b != b'\0' && *b != b'\n' && *b != b'\r')
        }
    }
}

/// An LDAP directory.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Add an entry.
    async fn add_entry(&self, entry: &LdapEntry) -> Result<()>;

    /// Apply modifications to an entry.
    async fn modify(&self, dn: &str, changes: &[LdapModification]) -> Result<()>;

    /// Add `member_dn` to the `uniqueMember` values of a group.
    async fn add_group_member(&self, group_dn: &str, member_dn: &str) -> Result<()> {
        self.modify(
            group_dn,
            &[LdapModification::Add(
                "uniqueMember".to_string(),
                vec![LdapValue::from(member_dn)],
            )],
        )
        .await
    }
}
