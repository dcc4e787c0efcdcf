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

//! The directory server instance that stores the authority's data.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::capabilities::{
    CertutilDatabase, DirectoryService, LdapEntry, LdapModification, LdapModifyDirectory,
    LdapValue, ServiceAction, SystemCapabilities, ToolCommand, TrustDatabase,
};
use crate::config::{ports, InstallationRequest, PKI_DS_USER};
use crate::error::{InstallError, Result};
use crate::sequencer::{schedule, ProgressHandler, StepFlow, StepRunner, StepSequencer};
use crate::state::{SharedStateStore, StateValue, CA_DS_UNIT};

/// Server identifier of the authority's directory instance.
pub const DS_SERVER_ID: &str = "PKI-IPA";

/// Progress description of the directory install.
pub const DS_INSTALL_DESCRIPTION: &str = "Configuring directory server for the CA";

/// Estimated cost of the directory install.
pub const DS_INSTALL_COST: u32 = 30;

const DS_SERVICE: &str = "dirsrv@PKI-IPA";
const DS_GROUP: &str = "dirsrv";
const DS_SERVER_ROOT: &str = "/usr/lib64/dirsrv";
const DS_CONFIG_DIR: &str = "/etc/dirsrv/slapd-PKI-IPA";
const SERVER_CERT_NICKNAME: &str = "Server-Cert";

const USERADD: &str = "/usr/sbin/useradd";
const SETUP_DS: &str = "/usr/sbin/setup-ds.pl";
const DS_NEWINST: &str = "/usr/bin/ds_newinst.pl";
const REMOVE_DS: &str = "/usr/sbin/remove-ds.pl";

const SSL3_CIPHERS: &str = "-rsa_null_md5,+rsa_rc4_128_md5,+rsa_rc4_40_md5,+rsa_rc2_40_md5,\
+rsa_des_sha,+rsa_fips_des_sha,+rsa_3des_sha,+rsa_fips_3des_sha,+fortezza,\
+fortezza_rc4_128_sha,+fortezza_null,+tls_rsa_export1024_with_rc4_56_sha,\
+tls_rsa_export1024_with_des_cbc_sha";

/// Steps of the directory install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsStep {
    /// Create the system account owning the instance.
    CreateUser,
    /// Create the instance from an INF template.
    CreateInstance,
    /// Restart the instance.
    Restart,
}

impl DsStep {
    /// Name reported in progress output and failures.
    pub fn name(self) -> &'static str {
        match self {
            Self::CreateUser => "creating directory server user",
            Self::CreateInstance => "creating directory server instance",
            Self::Restart => "restarting directory server",
        }
    }
}

/// Installer of the authority's directory server.
pub struct CaDirectoryInstance {
    realm: String,
    host_name: String,
    dm_password: String,
    ds_port: u16,
    pkcs12: Option<(PathBuf, PathBuf)>,
    sys: Arc<dyn SystemCapabilities>,
    state: SharedStateStore,
    ds_db: Arc<dyn TrustDatabase>,
    directory: Arc<dyn DirectoryService>,
    nickname: String,
    server_cert: Option<Vec<u8>>,
}

impl std::fmt::Debug for CaDirectoryInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaDirectoryInstance")
            .field("realm", &self.realm)
            .field("host_name", &self.host_name)
            .field("ds_port", &self.ds_port)
            .field("pkcs12", &self.pkcs12)
            .field("nickname", &self.nickname)
            .finish_non_exhaustive()
    }
}

impl CaDirectoryInstance {
    /// Create an installer for the directory of `request`'s authority.
    pub fn new(
        request: &InstallationRequest,
        sys: Arc<dyn SystemCapabilities>,
        state: SharedStateStore,
    ) -> Self {
        let config_dir = Path::new(DS_CONFIG_DIR);
        let ds_db = Arc::new(CertutilDatabase::new(
            sys.clone(),
            config_dir,
            config_dir.join("pwdfile.txt"),
        ));
        let directory = Arc::new(LdapModifyDirectory::new(
            sys.clone(),
            "127.0.0.1",
            ports::DEFAULT_DS,
            request.dm_password.clone(),
        ));

        Self {
            realm: request.realm.clone(),
            host_name: request.host_name.clone(),
            dm_password: request.dm_password.clone(),
            ds_port: request.ds_port,
            pkcs12: None,
            sys,
            state,
            ds_db,
            directory,
            nickname: SERVER_CERT_NICKNAME.to_string(),
            server_cert: None,
        }
    }

    /// Take the server certificate from a PKCS#12 bundle and its pin file.
    pub fn with_pkcs12(mut self, pkcs12: impl AsRef<Path>, pin_file: impl AsRef<Path>) -> Self {
        self.pkcs12 = Some((pkcs12.as_ref().to_path_buf(), pin_file.as_ref().to_path_buf()));
        self
    }

    /// Use a different certificate database for the instance.
    pub fn with_database(mut self, db: Arc<dyn TrustDatabase>) -> Self {
        self.ds_db = db;
        self
    }

    /// Use a different directory connection for [`enable_ssl`](Self::enable_ssl).
    pub fn with_directory(mut self, directory: Arc<dyn DirectoryService>) -> Self {
        self.directory = directory;
        self
    }

    /// Nickname of the server certificate.
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// PEM server certificate loaded from the bundle.
    pub fn server_cert(&self) -> Option<&[u8]> {
        self.server_cert.as_deref()
    }

    /// Run the three install steps.
    pub async fn install<P: ProgressHandler>(&mut self, sequencer: &StepSequencer<P>) -> Result<()> {
        let steps = schedule(
            [DsStep::CreateUser, DsStep::CreateInstance, DsStep::Restart]
                .into_iter()
                .map(|step| (step.name(), step)),
        );
        sequencer
            .run(&steps, DS_INSTALL_DESCRIPTION, DS_INSTALL_COST, self)
            .await?;
        Ok(())
    }

    /// The INF answer file for `setup-ds.pl`.
    pub(crate) fn render_inf(&self) -> String {
        format!(
            "\n[General]\n\
             FullMachineName=   {fqdn}\n\
             SuiteSpotUserID=   {user}\n\
             SuiteSpotGroup=    {group}\n\
             ServerRoot=    {root}\n\
             [slapd]\n\
             ServerPort=   {port}\n\
             ServerIdentifier=   {serverid}\n\
             Suffix=   {suffix}\n\
             RootDN=   cn=Directory Manager\n\
             RootDNPwd= {password}\n",
            fqdn = self.host_name,
            user = PKI_DS_USER,
            group = DS_GROUP,
            root = DS_SERVER_ROOT,
            port = self.ds_port,
            serverid = DS_SERVER_ID,
            suffix = crate::config::realm_to_suffix(&self.realm),
            password = self.dm_password,
        )
    }

    async fn create_user(&self) -> Result<()> {
        let exists = self.sys.user_exists(PKI_DS_USER).await?;
        self.state.backup(CA_DS_UNIT, "user_exists", exists)?;

        if exists {
            tracing::debug!("ds user {} exists", PKI_DS_USER);
            return Ok(());
        }

        tracing::debug!("adding ds user {}", PKI_DS_USER);
        self.sys
            .run(ToolCommand::new(USERADD).args([
                "-g",
                DS_GROUP,
                "-c",
                "PKI DS System User",
                "-d",
                "/var/lib/dirsrv",
                "-s",
                "/sbin/nologin",
                "-M",
                "-r",
                PKI_DS_USER,
            ]))
            .await?;
        tracing::debug!("done adding user");
        Ok(())
    }

    async fn create_instance(&self) -> Result<()> {
        self.state.backup(CA_DS_UNIT, "serverid", DS_SERVER_ID)?;
        self.state
            .backup(CA_DS_UNIT, "enabled", self.sys.is_enabled(DS_SERVICE).await?)?;
        self.state
            .backup(CA_DS_UNIT, "running", self.sys.is_running(DS_SERVICE).await?)?;

        let inf = self.render_inf();
        let inf_file = std::env::temp_dir().join(format!(
            "pki-ca-install-{}.inf",
            hex::encode(rand::random::<[u8; 8]>())
        ));
        tracing::debug!("writing inf template");
        tracing::debug!("{}", without_password(&inf));
        self.sys.write_file(&inf_file, inf.as_bytes()).await?;
        self.sys.set_permissions(&inf_file, 0o600).await?;

        let inf_path = inf_file.to_string_lossy().into_owned();
        let command = if self.sys.path_exists(Path::new(SETUP_DS)).await {
            tracing::debug!("calling setup-ds.pl");
            ToolCommand::new(SETUP_DS).args(["--silent", "--logfile", "-", "-f", inf_path.as_str()])
        } else {
            tracing::debug!("calling ds_newinst.pl");
            ToolCommand::new(DS_NEWINST).arg(inf_path.as_str())
        };

        let result = self.sys.run(command).await;
        if let Err(e) = self.sys.remove_file(&inf_file).await {
            tracing::debug!("Could not remove {}: {}", inf_file.display(), e);
        }
        result?;

        tracing::debug!("completed creating ds instance");
        Ok(())
    }

    /// Restart the instance and check that it came up.
    pub async fn restart_instance(&self) -> Result<()> {
        self.sys.service(DS_SERVICE, ServiceAction::Restart).await?;
        if !self.sys.is_running(DS_SERVICE).await? {
            return Err(InstallError::external_tool(
                "dirsrv",
                "Failed to restart the directory server. See the installation log for details.",
            ));
        }
        Ok(())
    }

    /// Load the server certificate from the PKCS#12 bundle, if one was given.
    ///
    /// # Errors
    ///
    /// Returns [`PreconditionMissing`](crate::error::ErrorKind::PreconditionMissing)
    /// if the bundle holds no certificate with a private key.
    pub async fn load_pkcs12(&mut self) -> Result<()> {
        let Some((pkcs12, pin_file)) = self.pkcs12.clone() else {
            return Ok(());
        };

        let password_file = Path::new(DS_CONFIG_DIR).join("pwdfile.txt");
        let password = hex::encode(rand::random::<[u8; 10]>());
        self.sys.write_file(&password_file, password.as_bytes()).await?;
        self.sys.set_permissions(&password_file, 0o600).await?;
        self.ds_db.create_database().await?;
        self.ds_db.import_pkcs12(&pkcs12, &pin_file).await?;

        let mut server_certs = self.ds_db.find_server_certificates().await?;
        if server_certs.is_empty() {
            return Err(InstallError::precondition_missing(format!(
                "Could not find a suitable server cert in import in {}",
                pkcs12.display()
            )));
        }

        // Only one server certificate is used.
        let (nickname, cert) = server_certs.swap_remove(0);
        tracing::info!("Using server certificate '{}'", nickname);
        self.nickname = nickname;
        self.server_cert = Some(cert);
        Ok(())
    }

    /// Turn on TLS in the running instance.
    pub async fn enable_ssl(&self) -> Result<()> {
        self.directory
            .modify(
                "cn=encryption,cn=config",
                &[
                    LdapModification::Replace(
                        "nsSSLClientAuth".to_string(),
                        vec![LdapValue::from("allowed")],
                    ),
                    LdapModification::Replace(
                        "nsSSL3Ciphers".to_string(),
                        vec![LdapValue::from(SSL3_CIPHERS)],
                    ),
                ],
            )
            .await?;

        self.directory
            .modify(
                "cn=config",
                &[
                    LdapModification::Add(
                        "nsslapd-security".to_string(),
                        vec![LdapValue::from("on")],
                    ),
                    LdapModification::Add(
                        "nsslapd-secureport".to_string(),
                        vec![LdapValue::from((ports::DEFAULT_DS + 1).to_string())],
                    ),
                ],
            )
            .await?;

        let entry = LdapEntry::new("cn=RSA,cn=encryption,cn=config")
            .attr("objectclass", "top")
            .attr("objectclass", "nsEncryptionModule")
            .attr("cn", "RSA")
            .attr("nsSSLPersonalitySSL", self.nickname.as_str())
            .attr("nsSSLToken", "internal (software)")
            .attr("nsSSLActivation", "on");
        self.directory.add_entry(&entry).await
    }

    /// Remove the instance, undoing what the recorded state says was changed.
    pub async fn uninstall(&self) -> Result<()> {
        if self.state.has_state(CA_DS_UNIT) {
            tracing::info!("Unconfiguring CA directory server");
        }

        let enabled = self.state.restore(CA_DS_UNIT, "enabled")?;
        let serverid = self.state.restore(CA_DS_UNIT, "serverid")?;
        self.state.restore(CA_DS_UNIT, "running")?;

        if enabled.as_ref().and_then(StateValue::as_bool) == Some(false) {
            self.sys.service(DS_SERVICE, ServiceAction::Disable).await?;
        }

        if let Some(serverid) = serverid.as_ref().and_then(StateValue::as_str) {
            let out = self
                .sys
                .run(
                    ToolCommand::new(REMOVE_DS)
                        .args(["-i".to_string(), format!("slapd-{}", serverid)])
                        .unchecked(),
                )
                .await?;
            if !out.success() {
                tracing::error!("failed to remove ds instance {}: {}", serverid, out.stderr.trim());
            }
        }

        self.state.restore(CA_DS_UNIT, "user_exists")?;
        Ok(())
    }
}

#[async_trait]
impl StepRunner<DsStep> for CaDirectoryInstance {
    async fn run_step(&mut self, action: &DsStep) -> Result<StepFlow> {
        match action {
            DsStep::CreateUser => self.create_user().await?,
            DsStep::CreateInstance => self.create_instance().await?,
            DsStep::Restart => self.restart_instance().await?,
        }
        Ok(StepFlow::Continue)
    }
}

fn without_password(inf: &str) -> String {
    inf.lines()
        .filter(|line| !line.trim_start().starts_with("RootDNPwd="))
        .collect::<Vec<_>>()
        .join("\n")
}
