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

//! Configuration types for the CA installer.
//!
//! [`InstallationRequest`] is the immutable description of one installation
//! attempt. It is built once from command-line flags or a configuration file
//! and then passed by reference to the planner and every step.
//! [`AuthorityEndpoints`] describes how to reach the authority's HTTP
//! interfaces during enrollment.

use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Fixed ports of the authority instance.
pub mod ports {
    /// Agent interface (TLS, client-certificate authenticated).
    pub const AGENT_SECURE: u16 = 9443;
    /// End-entity interface (TLS).
    pub const EE_SECURE: u16 = 9444;
    /// Administration interface (TLS).
    pub const ADMIN_SECURE: u16 = 9445;
    /// End-entity interface with client authentication.
    pub const EE_CLIENT_AUTH: u16 = 9446;
    /// Plain HTTP end-entity interface.
    pub const UNSECURE: u16 = 9180;
    /// Servlet container shutdown port.
    pub const TOMCAT_SERVER: u16 = 9701;
    /// Directory server backing the authority.
    pub const DEFAULT_DS: u16 = 7389;
}

/// Name of the authority instance directory under the instance root.
pub const PKI_INSTANCE_NAME: &str = "pki-ca";

/// System account that owns the authority instance.
pub const PKI_USER: &str = "pkiuser";

/// System account that owns the authority's directory server.
pub const PKI_DS_USER: &str = "pkisrv";

/// Default ceiling for waiting on the authority's port after a restart.
pub const DEFAULT_PORT_WAIT: Duration = Duration::from_secs(300);

/// Nickname of the CA signing certificate for a realm.
pub fn ca_nickname(realm: &str) -> String {
    format!("{} IPA CA", realm)
}

/// Convert a realm name into a directory suffix (`EXAMPLE.COM` -> `dc=example,dc=com`).
pub fn realm_to_suffix(realm: &str) -> String {
    realm
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| format!("dc={}", part.to_lowercase()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Clone source: an existing authority whose identity this instance imports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneSource {
    /// PKCS#12 bundle exported from the master authority.
    pub pkcs12_path: PathBuf,
    /// Host name of the master authority.
    pub master_host: String,
}

/// Immutable description of one installation attempt.
#[derive(Clone)]
pub struct InstallationRequest {
    /// Kerberos-style realm name, upper case.
    pub realm: String,

    /// Fully-qualified host name of this machine.
    pub host_name: String,

    /// Directory manager password.
    pub dm_password: String,

    /// Authority administrator password.
    pub admin_password: String,

    /// Port of the authority's directory server.
    pub ds_port: u16,

    /// Base subject for all certificates issued during installation.
    pub subject_base: String,

    /// Set when installing a clone of an existing authority.
    pub clone: Option<CloneSource>,

    /// Where to write the CSR in the first phase of an external-CA install.
    pub csr_file: Option<PathBuf>,

    /// Externally-signed CA certificate for the second phase.
    pub signed_cert_file: Option<PathBuf>,

    /// Chain of the external CA for the second phase.
    pub cert_chain_file: Option<PathBuf>,

    /// Whether to (re)create the RA agent certificate database.
    pub create_ra_agent_db: bool,

    /// Directory of the RA agent certificate database.
    pub ra_agent_db: PathBuf,

    /// Scratch certificate database holding the CA agent credentials.
    pub ca_agent_db: PathBuf,

    /// Parent directory of the authority instance.
    pub instance_root: PathBuf,

    /// Upper bound on waiting for the authority to listen after a restart.
    pub port_wait: Duration,

    /// How to reach the authority over HTTP.
    pub endpoints: AuthorityEndpoints,
}

impl std::fmt::Debug for InstallationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationRequest")
            .field("realm", &self.realm)
            .field("host_name", &self.host_name)
            .field("ds_port", &self.ds_port)
            .field("subject_base", &self.subject_base)
            .field("clone", &self.clone)
            .field("csr_file", &self.csr_file)
            .field("signed_cert_file", &self.signed_cert_file)
            .field("cert_chain_file", &self.cert_chain_file)
            .field("create_ra_agent_db", &self.create_ra_agent_db)
            .field("ra_agent_db", &self.ra_agent_db)
            .field("instance_root", &self.instance_root)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

impl InstallationRequest {
    /// Create a new request builder.
    pub fn builder() -> InstallationRequestBuilder {
        InstallationRequestBuilder::new()
    }

    /// Returns true if this installation clones an existing authority.
    pub fn is_clone(&self) -> bool {
        self.clone.is_some()
    }

    /// Directory of the authority instance (`<instance_root>/pki-ca`).
    pub fn instance_dir(&self) -> PathBuf {
        self.instance_root.join(PKI_INSTANCE_NAME)
    }

    /// Main configuration file of the authority instance.
    pub fn cs_cfg(&self) -> PathBuf {
        self.instance_dir().join("conf").join("CS.cfg")
    }

    /// Service certificate profile shipped with the authority.
    pub fn service_profile(&self) -> PathBuf {
        self.instance_dir()
            .join("profiles")
            .join("ca")
            .join("caIPAserviceCert.cfg")
    }

    /// Password file of the RA agent database.
    pub fn ra_agent_pwd(&self) -> PathBuf {
        self.ra_agent_db.join("pwdfile.txt")
    }

    /// Nickname of this realm's CA signing certificate.
    pub fn ca_nickname(&self) -> String {
        ca_nickname(&self.realm)
    }

    /// Subject DN of the CA signing certificate.
    pub fn ca_subject(&self) -> String {
        format!("CN=Certificate Authority,{}", self.subject_base)
    }

    /// Directory suffix derived from the realm.
    pub fn suffix(&self) -> String {
        realm_to_suffix(&self.realm)
    }
}

/// Builder for [`InstallationRequest`].
#[derive(Default)]
pub struct InstallationRequestBuilder {
    realm: Option<String>,
    host_name: Option<String>,
    dm_password: Option<String>,
    admin_password: Option<String>,
    ds_port: Option<u16>,
    subject_base: Option<String>,
    clone: Option<CloneSource>,
    csr_file: Option<PathBuf>,
    signed_cert_file: Option<PathBuf>,
    cert_chain_file: Option<PathBuf>,
    skip_ra_agent_db: bool,
    ra_agent_db: Option<PathBuf>,
    ca_agent_db: Option<PathBuf>,
    instance_root: Option<PathBuf>,
    port_wait: Option<Duration>,
    endpoints: Option<AuthorityEndpoints>,
    timeout: Option<Duration>,
}

impl InstallationRequestBuilder {
    /// Create a new request builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the realm. It is upper-cased on build.
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// Set the host name of this machine.
    pub fn host_name(mut self, host: impl Into<String>) -> Self {
        self.host_name = Some(host.into());
        self
    }

    /// Set the directory manager password.
    pub fn dm_password(mut self, password: impl Into<String>) -> Self {
        self.dm_password = Some(password.into());
        self
    }

    /// Set the authority administrator password.
    pub fn admin_password(mut self, password: impl Into<String>) -> Self {
        self.admin_password = Some(password.into());
        self
    }

    /// Set the directory server port.
    pub fn ds_port(mut self, port: u16) -> Self {
        self.ds_port = Some(port);
        self
    }

    /// Set the subject base.
    pub fn subject_base(mut self, base: impl Into<String>) -> Self {
        self.subject_base = Some(base.into());
        self
    }

    /// Install as a clone of `master_host` using its PKCS#12 bundle.
    pub fn clone_from(mut self, pkcs12_path: impl AsRef<Path>, master_host: impl Into<String>) -> Self {
        self.clone = Some(CloneSource {
            pkcs12_path: pkcs12_path.as_ref().to_path_buf(),
            master_host: master_host.into(),
        });
        self
    }

    /// Generate a CSR for an external CA and stop.
    pub fn csr_file(mut self, path: impl AsRef<Path>) -> Self {
        self.csr_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Finish an external-CA install with the signed certificate and chain.
    pub fn signed_cert(mut self, cert: impl AsRef<Path>, chain: impl AsRef<Path>) -> Self {
        self.signed_cert_file = Some(cert.as_ref().to_path_buf());
        self.cert_chain_file = Some(chain.as_ref().to_path_buf());
        self
    }

    /// Keep an existing RA agent database instead of creating one.
    pub fn keep_ra_agent_db(mut self) -> Self {
        self.skip_ra_agent_db = true;
        self
    }

    /// Set the RA agent database directory.
    pub fn ra_agent_db(mut self, dir: impl AsRef<Path>) -> Self {
        self.ra_agent_db = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set the scratch CA agent database directory.
    pub fn ca_agent_db(mut self, dir: impl AsRef<Path>) -> Self {
        self.ca_agent_db = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set the parent directory of the authority instance.
    pub fn instance_root(mut self, dir: impl AsRef<Path>) -> Self {
        self.instance_root = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set the ceiling for waiting on the authority port.
    pub fn port_wait(mut self, wait: Duration) -> Self {
        self.port_wait = Some(wait);
        self
    }

    /// Override the authority endpoints (defaults are derived from the host name).
    pub fn endpoints(mut self, endpoints: AuthorityEndpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Set the HTTP request timeout used for derived endpoints.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the request.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is missing, or if a signed
    /// certificate is given without its chain.
    pub fn build(self) -> Result<InstallationRequest, &'static str> {
        let realm = self.realm.ok_or("realm is required")?.to_uppercase();
        let host_name = self.host_name.ok_or("host_name is required")?;
        let dm_password = self.dm_password.ok_or("dm_password is required")?;
        let admin_password = self.admin_password.unwrap_or_else(|| dm_password.clone());

        if self.signed_cert_file.is_some() != self.cert_chain_file.is_some() {
            return Err("signed certificate and certificate chain must be given together");
        }
        if self.csr_file.is_some() && self.signed_cert_file.is_some() {
            return Err("csr_file cannot be combined with a signed certificate");
        }

        let endpoints = match self.endpoints {
            Some(endpoints) => endpoints,
            None => {
                let mut endpoints = AuthorityEndpoints::for_host(&host_name)
                    .map_err(|_| "host_name does not form a valid URL")?;
                if let Some(timeout) = self.timeout {
                    endpoints.timeout = timeout;
                }
                endpoints
            }
        };

        Ok(InstallationRequest {
            subject_base: self
                .subject_base
                .unwrap_or_else(|| format!("O={}", realm)),
            realm,
            host_name,
            dm_password,
            admin_password,
            ds_port: self.ds_port.unwrap_or(ports::DEFAULT_DS),
            clone: self.clone,
            csr_file: self.csr_file,
            signed_cert_file: self.signed_cert_file,
            cert_chain_file: self.cert_chain_file,
            create_ra_agent_db: !self.skip_ra_agent_db,
            ra_agent_db: self
                .ra_agent_db
                .unwrap_or_else(|| PathBuf::from("/etc/httpd/alias")),
            ca_agent_db: self
                .ca_agent_db
                .unwrap_or_else(|| std::env::temp_dir().join("pki-ca-agent")),
            instance_root: self
                .instance_root
                .unwrap_or_else(|| PathBuf::from("/var/lib")),
            port_wait: self.port_wait.unwrap_or(DEFAULT_PORT_WAIT),
            endpoints,
        })
    }
}

/// HTTP interfaces of the authority used during enrollment.
#[derive(Clone)]
pub struct AuthorityEndpoints {
    /// End-entity base URL (plain HTTP on the unsecure port).
    pub ee_url: Url,

    /// Agent base URL (TLS, client-certificate authenticated).
    pub agent_url: Url,

    /// Trust anchors for the agent interface.
    pub trust_anchors: TrustAnchors,

    /// Request timeout.
    pub timeout: Duration,
}

impl std::fmt::Debug for AuthorityEndpoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityEndpoints")
            .field("ee_url", &self.ee_url.as_str())
            .field("agent_url", &self.agent_url.as_str())
            .field("trust_anchors", &self.trust_anchors)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AuthorityEndpoints {
    /// Create endpoints from explicit base URLs.
    pub fn new(ee_url: impl AsRef<str>, agent_url: impl AsRef<str>) -> Result<Self, url::ParseError> {
        Ok(Self {
            ee_url: Url::parse(ee_url.as_ref())?,
            agent_url: Url::parse(agent_url.as_ref())?,
            trust_anchors: TrustAnchors::InsecureAcceptAny,
            timeout: Duration::from_secs(30),
        })
    }

    /// Default endpoints of a freshly installed authority on `host`.
    ///
    /// The agent interface presents a certificate issued by the authority
    /// being installed, which is not trusted by anything yet.
    pub fn for_host(host: &str) -> Result<Self, url::ParseError> {
        Self::new(
            format!("http://{}:{}", host, ports::UNSECURE),
            format!("https://{}:{}", host, ports::AGENT_SECURE),
        )
    }

    /// Use explicit CA certificates for the agent interface.
    pub fn with_trust_anchors(mut self, trust_anchors: TrustAnchors) -> Self {
        self.trust_anchors = trust_anchors;
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build a URL on the end-entity interface.
    pub fn build_ee_url(&self, path: &str) -> Url {
        let mut url = self.ee_url.clone();
        url.set_path(&format!("/ca/ee/ca/{}", path));
        url
    }

    /// Build a URL on the agent interface.
    pub fn build_agent_url(&self, path: &str) -> Url {
        let mut url = self.agent_url.clone();
        url.set_path(&format!("/ca/agent/ca/{}", path));
        url
    }
}

/// Client identity for TLS client certificate authentication.
#[derive(Clone)]
pub struct ClientIdentity {
    /// PEM-encoded certificate chain, client certificate first.
    pub cert_pem: Vec<u8>,

    /// PEM-encoded private key.
    pub key_pem: Vec<u8>,
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("cert_pem", &format!("{} bytes", self.cert_pem.len()))
            .finish_non_exhaustive()
    }
}

impl ClientIdentity {
    /// Create a new client identity from PEM-encoded data.
    pub fn new(cert_pem: impl Into<Vec<u8>>, key_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
        }
    }
}

/// Trust anchor configuration for server certificate verification.
#[derive(Clone)]
pub enum TrustAnchors {
    /// Use the built-in web PKI root store.
    WebPki,

    /// Use explicit CA certificates (PEM-encoded).
    Explicit(Vec<Vec<u8>>),

    /// Accept any server certificate.
    ///
    /// Default for the end-entity calls made before the authority chain is
    /// imported. Agent calls are anchored on that chain.
    InsecureAcceptAny,
}

impl std::fmt::Debug for TrustAnchors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WebPki => write!(f, "WebPki"),
            Self::Explicit(certs) => write!(f, "Explicit({} certs)", certs.len()),
            Self::InsecureAcceptAny => write!(f, "InsecureAcceptAny"),
        }
    }
}
