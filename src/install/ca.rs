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

//! The certificate authority installer.
//!
//! [`CaInstance`] performs the steps planned by [`crate::signing::plan`].
//! It owns the enrollment state of the RA agent while a run is in progress
//! and records undo state in the shared store under [`CA_UNIT`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use der::Encode;

use super::{InstallOutcome, RESUME_COMMAND};
use crate::capabilities::{
    CertutilDatabase, DirectoryService, LdapEntry, LdapModifyDirectory, ServiceAction,
    SystemCapabilities, ToolCommand, TrustDatabase, TrustFlags,
};
use crate::config::{
    ports, AuthorityEndpoints, InstallationRequest, TrustAnchors, PKI_INSTANCE_NAME, PKI_USER,
};
use crate::directive::{read_directive, read_preop_pin, set_directives, update_file};
use crate::enrollment::EnrollmentClient;
use crate::error::{InstallError, Result};
use crate::sequencer::{ProgressHandler, SequenceOutcome, StepFlow, StepRunner, StepSequencer};
use crate::signing::{plan, CaStep, PlanFacts, CA_INSTALL_COST, CA_INSTALL_DESCRIPTION};
use crate::state::{SharedStateStore, StateValue, CA_UNIT};
use crate::trust::{import_ca_chain, CA_AGENT_NICKNAME};
use crate::types::{pem_encode, CaChain, EnrollmentSession, IssuedCertificate};

/// Service unit of the authority instance.
pub const CA_SERVICE: &str = "pki-cad@pki-ca";

const PERL: &str = "/usr/bin/perl";
const PKICREATE: &str = "/usr/bin/pkicreate";
const PKISILENT: &str = "/usr/bin/pkisilent";
const PKIREMOVE: &str = "/usr/bin/pkiremove";
const USERADD: &str = "/usr/sbin/useradd";

const CA_BASE_DN: &str = "o=ipaca";
const CA_DOMAIN_NAME: &str = "IPA";
const RA_USER: &str = "ipara";
const RA_AGENT_GROUPS: [&str; 2] = ["Certificate Manager Agents", "Registration Manager Agents"];
const HTTPD_USER: &str = "apache";

const SHARE_DIR: &str = "/usr/share/ipa";
const HTTPD_CONFD: &str = "/etc/httpd/conf.d";
const PROXY_CONF: &str = "ipa-pki-proxy.conf";

const SAVED_CA_PKCS12: &str = "/root/tmp-ca.p12";
const CA_PKCS12: &str = "/root/cacert.p12";
const CA_AGENT_PKCS12: &str = "/root/ca-agent.p12";

const NSS_DB_FILES: [&str; 3] = ["cert8.db", "key3.db", "secmod.db"];
const DEFAULT_SERVER_CERT_SET: &str = "1,2,3,4,5,6,7,8";
const PROFILE_SUBJECT_TEMPLATE: &str = "OU=pki-ipa, O=IPA";

/// Installer of the certificate authority instance.
pub struct CaInstance {
    request: InstallationRequest,
    sys: Arc<dyn SystemCapabilities>,
    state: SharedStateStore,
    ra_db: Arc<dyn TrustDatabase>,
    agent_db: Arc<dyn TrustDatabase>,
    directory: Arc<dyn DirectoryService>,
    chain: Option<CaChain>,
    session: Option<EnrollmentSession>,
    ra_request_id: Option<String>,
    ra_certificate: Option<IssuedCertificate>,
}

impl std::fmt::Debug for CaInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaInstance")
            .field("request", &self.request)
            .field("session", &self.session)
            .field("ra_request_id", &self.ra_request_id)
            .finish_non_exhaustive()
    }
}

impl CaInstance {
    /// Create an installer using the NSS tools and `ldapmodify` on the host.
    pub fn new(
        request: InstallationRequest,
        sys: Arc<dyn SystemCapabilities>,
        state: SharedStateStore,
    ) -> Self {
        let ra_db = Arc::new(CertutilDatabase::new(
            sys.clone(),
            &request.ra_agent_db,
            request.ra_agent_pwd(),
        ));
        let agent_db = Arc::new(CertutilDatabase::new(
            sys.clone(),
            &request.ca_agent_db,
            agent_password_file(&request),
        ));
        let directory = Arc::new(LdapModifyDirectory::new(
            sys.clone(),
            &request.host_name,
            request.ds_port,
            request.dm_password.clone(),
        ));

        Self {
            request,
            sys,
            state,
            ra_db,
            agent_db,
            directory,
            chain: None,
            session: None,
            ra_request_id: None,
            ra_certificate: None,
        }
    }

    /// Use a different RA agent database.
    pub fn with_ra_database(mut self, db: Arc<dyn TrustDatabase>) -> Self {
        self.ra_db = db;
        self
    }

    /// Use a different CA agent database.
    pub fn with_agent_database(mut self, db: Arc<dyn TrustDatabase>) -> Self {
        self.agent_db = db;
        self
    }

    /// Use a different directory for the RA agent entry.
    pub fn with_directory(mut self, directory: Arc<dyn DirectoryService>) -> Self {
        self.directory = directory;
        self
    }

    /// The request being installed.
    pub fn request(&self) -> &InstallationRequest {
        &self.request
    }

    /// Enrollment in progress, if any.
    pub fn session(&self) -> Option<&EnrollmentSession> {
        self.session.as_ref()
    }

    /// Endpoints for the agent interface.
    ///
    /// The server must chain to the authority certificates imported by the
    /// chain step; fails with `PreconditionMissing` before that step ran.
    pub fn agent_endpoints(&self) -> Result<AuthorityEndpoints> {
        let chain = self
            .chain
            .as_ref()
            .ok_or_else(|| InstallError::precondition_missing("CA chain was not imported"))?;

        let anchors = chain
            .iter()
            .map(|cert| -> Result<Vec<u8>> {
                Ok(pem_encode("CERTIFICATE", &cert.to_der()?).into_bytes())
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(self
            .request
            .endpoints
            .clone()
            .with_trust_anchors(TrustAnchors::Explicit(anchors)))
    }

    /// Request id of the enrolled RA certificate.
    pub fn ra_request_id(&self) -> Option<&str> {
        self.ra_request_id.as_deref()
    }

    /// The enrolled RA certificate.
    pub fn ra_certificate(&self) -> Option<&IssuedCertificate> {
        self.ra_certificate.as_ref()
    }

    /// Returns true once the instance directory exists.
    ///
    /// The externally-signed flow uses this to tell whether its first
    /// phase already ran.
    pub async fn is_installed(&self) -> bool {
        self.sys.path_exists(&self.request.instance_dir()).await
    }

    /// Plan and run the install.
    pub async fn install<P: ProgressHandler>(
        &mut self,
        sequencer: &StepSequencer<P>,
    ) -> Result<InstallOutcome> {
        let facts = PlanFacts {
            instance_exists: self.is_installed().await,
        };
        let steps = plan(&self.request, facts);

        match sequencer
            .run(&steps, CA_INSTALL_DESCRIPTION, CA_INSTALL_COST, self)
            .await?
        {
            SequenceOutcome::Completed => Ok(InstallOutcome::Completed),
            SequenceOutcome::Halted { step } => {
                let csr_file = self.request.csr_file.clone().ok_or_else(|| {
                    InstallError::precondition_missing(format!(
                        "step '{}' stopped the install without a CSR file",
                        step
                    ))
                })?;
                Ok(InstallOutcome::CsrPending {
                    csr_file,
                    resume_command: RESUME_COMMAND.to_string(),
                })
            }
        }
    }

    /// Remove the instance, undoing what the recorded state says was changed.
    pub async fn uninstall(&self) -> Result<()> {
        if self.state.has_state(CA_UNIT) {
            tracing::info!("Unconfiguring CA");
        }

        let enabled = self.state.restore(CA_UNIT, "enabled")?;
        if enabled.as_ref().and_then(StateValue::as_bool) == Some(false) {
            self.sys.service(CA_SERVICE, ServiceAction::Disable).await?;
        }

        let root = self.request.instance_root.to_string_lossy();
        let out = self
            .sys
            .run(
                ToolCommand::new(PKIREMOVE)
                    .arg(format!("-pki_instance_root={}", root))
                    .arg(format!("-pki_instance_name={}", PKI_INSTANCE_NAME))
                    .arg("--force")
                    .unchecked(),
            )
            .await?;
        if !out.success() {
            tracing::error!("failed to uninstall CA instance: {}", out.stderr.trim());
        }

        // The system account is never removed; the record is only consumed.
        self.state.restore(CA_UNIT, "user_exists")?;

        Ok(())
    }

    /// Write the CA certificate (PEM) to `location`, world-readable.
    pub async fn publish_ca_cert(&self, location: &Path) -> Result<()> {
        let cert = self
            .ra_db
            .export_certificate(&self.request.ca_nickname())
            .await?;
        self.sys.write_file(location, &cert).await?;
        self.sys.set_permissions(location, 0o444).await
    }

    /// Import the RA agent certificate of a master from a PKCS#12 file.
    ///
    /// Cloned authorities share the master's RA certificate. The bundle is
    /// protected by the directory manager password.
    pub async fn import_ra_cert(&self, pkcs12: &Path) -> Result<()> {
        let password_file = scratch_file(".pwd");
        self.sys
            .write_file(&password_file, self.request.dm_password.as_bytes())
            .await?;
        self.sys.set_permissions(&password_file, 0o600).await?;

        let result = self.ra_db.import_pkcs12(pkcs12, &password_file).await;

        if let Err(e) = self.sys.remove_file(&password_file).await {
            tracing::debug!("Could not remove {}: {}", password_file.display(), e);
        }
        result
    }

    /// Add the Subject Key Identifier extension to the service profile.
    ///
    /// Only the profile's stock policy list is changed; returns false when
    /// the list was customized and left alone.
    pub async fn enable_subject_key_identifier(&self) -> Result<bool> {
        let profile = self.request.service_profile();
        let setlist =
            read_directive(&*self.sys, &profile, "policyset.serverCertSet.list", "=").await?;

        if setlist.as_deref() != Some(DEFAULT_SERVER_CERT_SET) {
            tracing::debug!("Service profile policy list is customized, not adding SKI");
            return Ok(false);
        }

        set_directives(
            &*self.sys,
            &profile,
            &[
                ("policyset.serverCertSet.list", "1,2,3,4,5,6,7,8,10"),
                ("policyset.serverCertSet.10.constraint.class_id", "noConstraintImpl"),
                ("policyset.serverCertSet.10.constraint.name", "No Constraint"),
                (
                    "policyset.serverCertSet.10.default.class_id",
                    "subjectKeyIdentifierExtDefaultImpl",
                ),
                (
                    "policyset.serverCertSet.10.default.name",
                    "Subject Key Identifier Extension Default",
                ),
                ("policyset.serverCertSet.10.default.params.critical", "false"),
            ],
            "=",
        )
        .await?;
        Ok(true)
    }

    async fn create_user(&self) -> Result<()> {
        let exists = self.sys.user_exists(PKI_USER).await?;
        self.state.backup(CA_UNIT, "user_exists", exists)?;

        if exists {
            tracing::debug!("ca user {} exists", PKI_USER);
            return Ok(());
        }

        tracing::debug!("adding ca user {}", PKI_USER);
        let home = self.request.instance_root.to_string_lossy().into_owned();
        self.sys
            .run(ToolCommand::new(USERADD).args([
                "-c",
                "CA System User",
                "-d",
                home.as_str(),
                "-s",
                "/sbin/nologin",
                "-M",
                "-r",
                PKI_USER,
            ]))
            .await?;
        tracing::debug!("done adding user");
        Ok(())
    }

    async fn create_instance(&self) -> Result<()> {
        let mut args = Vec::new();
        flag(&mut args, "-pki_instance_root", self.request.instance_root.to_string_lossy());
        flag(&mut args, "-pki_instance_name", PKI_INSTANCE_NAME);
        flag(&mut args, "-subsystem_type", "ca");
        flag(&mut args, "-agent_secure_port", ports::AGENT_SECURE.to_string());
        flag(&mut args, "-ee_secure_port", ports::EE_SECURE.to_string());
        flag(&mut args, "-admin_secure_port", ports::ADMIN_SECURE.to_string());
        flag(&mut args, "-ee_secure_client_auth_port", ports::EE_CLIENT_AUTH.to_string());
        flag(&mut args, "-unsecure_port", ports::UNSECURE.to_string());
        flag(&mut args, "-tomcat_server_port", ports::TOMCAT_SERVER.to_string());
        flag(&mut args, "-redirect", "conf=/etc/pki-ca");
        flag(&mut args, "-redirect", "logs=/var/log/pki-ca");
        args.push("-enable_proxy".to_string());

        self.sys
            .run(
                ToolCommand::new(PKICREATE)
                    .args(args)
                    .env("PKI_HOSTNAME", &self.request.host_name),
            )
            .await?;
        Ok(())
    }

    /// The `pkisilent ConfigureCA` invocation for this request.
    pub(crate) fn configure_command(&self, preop_pin: &str) -> ToolCommand {
        let r = &self.request;
        let sb = &r.subject_base;

        let mut args = vec![PKISILENT.to_string(), "ConfigureCA".to_string()];
        flag(&mut args, "-cs_hostname", r.host_name.as_str());
        flag(&mut args, "-cs_port", ports::ADMIN_SECURE.to_string());
        flag(&mut args, "-client_certdb_dir", r.ca_agent_db.to_string_lossy());
        flag(&mut args, "-client_certdb_pwd", r.admin_password.as_str());
        flag(&mut args, "-preop_pin", preop_pin);
        flag(&mut args, "-domain_name", CA_DOMAIN_NAME);
        flag(&mut args, "-admin_user", "admin");
        flag(&mut args, "-admin_email", "root@localhost");
        flag(&mut args, "-admin_password", r.admin_password.as_str());
        flag(&mut args, "-agent_name", CA_AGENT_NICKNAME);
        flag(&mut args, "-agent_key_size", "2048");
        flag(&mut args, "-agent_key_type", "rsa");
        flag(&mut args, "-agent_cert_subject", format!("CN={},{}", CA_AGENT_NICKNAME, sb));
        flag(&mut args, "-ldap_host", r.host_name.as_str());
        flag(&mut args, "-ldap_port", r.ds_port.to_string());
        flag(&mut args, "-bind_dn", "cn=Directory Manager");
        flag(&mut args, "-bind_password", r.dm_password.as_str());
        flag(&mut args, "-base_dn", CA_BASE_DN);
        flag(&mut args, "-db_name", "ipaca");
        flag(&mut args, "-key_size", "2048");
        flag(&mut args, "-key_type", "rsa");
        flag(&mut args, "-key_algorithm", "SHA256withRSA");
        flag(&mut args, "-save_p12", "true");
        flag(&mut args, "-backup_pwd", r.admin_password.as_str());
        flag(&mut args, "-subsystem_name", CA_UNIT);
        flag(&mut args, "-token_name", "internal");
        flag(&mut args, "-ca_subsystem_cert_subject_name", format!("CN=CA Subsystem,{}", sb));
        flag(&mut args, "-ca_ocsp_cert_subject_name", format!("CN=OCSP Subsystem,{}", sb));
        flag(&mut args, "-ca_server_cert_subject_name", format!("CN={},{}", r.host_name, sb));
        flag(&mut args, "-ca_audit_signing_cert_subject_name", format!("CN=CA Audit,{}", sb));
        flag(&mut args, "-ca_sign_cert_subject_name", r.ca_subject());

        if let Some(csr) = &r.csr_file {
            flag(&mut args, "-external", "true");
            flag(&mut args, "-ext_csr_file", csr.to_string_lossy());
        } else if let (Some(cert), Some(chain)) = (&r.signed_cert_file, &r.cert_chain_file) {
            flag(&mut args, "-external", "true");
            flag(&mut args, "-ext_ca_cert_file", cert.to_string_lossy());
            flag(&mut args, "-ext_ca_cert_chain_file", chain.to_string_lossy());
        } else {
            flag(&mut args, "-external", "false");
        }

        match &r.clone {
            Some(source) => {
                flag(&mut args, "-clone", "true");
                flag(&mut args, "-clone_p12_file", "ca.p12");
                flag(&mut args, "-clone_p12_password", r.dm_password.as_str());
                flag(&mut args, "-sd_hostname", source.master_host.as_str());
                flag(&mut args, "-sd_admin_port", "443");
                flag(&mut args, "-sd_admin_name", "admin");
                flag(&mut args, "-sd_admin_password", r.admin_password.as_str());
                flag(&mut args, "-clone_start_tls", "true");
                flag(&mut args, "-clone_uri", format!("https://{}:443", source.master_host));
            }
            None => flag(&mut args, "-clone", "false"),
        }

        ToolCommand::new(PERL)
            .args(args)
            .env("PKI_HOSTNAME", &r.host_name)
            .redact(&r.admin_password)
            .redact(&r.dm_password)
    }

    async fn configure_instance(&self) -> Result<StepFlow> {
        let preop_pin = read_preop_pin(&*self.sys, &self.request.cs_cfg()).await?;
        self.sys.create_dir(&self.request.ca_agent_db).await?;

        if let Some(source) = &self.request.clone {
            // The configuration wizard expects the bundle inside the instance.
            let target = self.request.instance_dir().join("alias").join("ca.p12");
            self.sys.copy_file(&source.pkcs12_path, &target).await?;
            self.sys
                .set_owner(&target, Some(PKI_USER), Some(PKI_USER))
                .await?;
        }

        self.sys.run(self.configure_command(&preop_pin)).await?;

        if let Some(csr) = &self.request.csr_file {
            tracing::info!(
                "The CSR for the external CA was written to {}",
                csr.display()
            );
            return Ok(StepFlow::Halt);
        }

        let saved = Path::new(SAVED_CA_PKCS12);
        if self.sys.path_exists(saved).await {
            self.sys.rename(saved, Path::new(CA_PKCS12)).await?;
        }

        tracing::debug!("completed creating ca instance");
        Ok(StepFlow::Continue)
    }

    async fn disable_nonces(&self) -> Result<()> {
        let cs_cfg = self.request.cs_cfg();
        update_file(
            &*self.sys,
            &cs_cfg,
            "ca.enableNonces=true",
            "ca.enableNonces=false",
        )
        .await?;
        self.sys
            .set_owner(&cs_cfg, Some(PKI_USER), Some(PKI_USER))
            .await
    }

    async fn write_agent_password(&self) -> Result<PathBuf> {
        let path = agent_password_file(&self.request);
        self.sys
            .write_file(&path, self.request.admin_password.as_bytes())
            .await?;
        self.sys.set_permissions(&path, 0o600).await?;
        Ok(path)
    }

    async fn create_agent_pkcs12(&self) -> Result<()> {
        let password_file = self.write_agent_password().await?;
        self.agent_db
            .export_pkcs12(CA_AGENT_NICKNAME, Path::new(CA_AGENT_PKCS12), &password_file)
            .await
    }

    async fn create_ra_agent_db(&self) -> Result<()> {
        let db = &self.request.ra_agent_db;
        let password_file = self.request.ra_agent_pwd();

        if self.sys.path_exists(&db.join("cert8.db")).await {
            let existing = NSS_DB_FILES
                .iter()
                .map(|name| db.join(name))
                .chain(std::iter::once(password_file.clone()));
            for path in existing {
                if self.sys.path_exists(&path).await {
                    let backup = PathBuf::from(format!("{}.orig", path.display()));
                    tracing::debug!("Backing up {} to {}", path.display(), backup.display());
                    self.sys.rename(&path, &backup).await?;
                }
            }
        }

        if !self.sys.path_exists(db).await {
            self.sys.create_dir(db).await?;
        }

        let password = hex::encode(rand::random::<[u8; 10]>());
        self.sys
            .write_file(&password_file, password.as_bytes())
            .await?;
        self.sys.set_permissions(&password_file, 0o400).await?;

        self.ra_db.create_database().await
    }

    async fn import_ca_chain(&mut self) -> Result<()> {
        let client = EnrollmentClient::new(self.request.endpoints.clone(), None)?;
        let chain = client.fetch_ca_chain().await?;

        let nicknames = import_ca_chain(
            &*self.ra_db,
            &chain,
            &self.request.ca_subject(),
            &self.request.realm,
        )
        .await?;
        tracing::debug!("Imported chain certificates: {}", nicknames.join(", "));

        self.chain = Some(chain);
        Ok(())
    }

    async fn fix_ra_permissions(&self) -> Result<()> {
        let db = &self.request.ra_agent_db;
        for name in NSS_DB_FILES {
            let path = db.join(name);
            self.sys.set_permissions(&path, 0o640).await?;
            self.sys
                .set_owner(&path, Some("root"), Some(HTTPD_USER))
                .await?;
        }
        self.sys
            .set_owner(&self.request.ra_agent_pwd(), Some(HTTPD_USER), Some(HTTPD_USER))
            .await
    }

    async fn setup_signing_profile(&self) -> Result<()> {
        let profile = self
            .request
            .instance_dir()
            .join("profiles")
            .join("ca")
            .join("caJarSigningCert.cfg");
        set_directives(&*self.sys, &profile, &[("auth.instance_id", "raCertAuth")], "=").await
    }

    async fn enable_crl_publishing(&self) -> Result<()> {
        let cs_cfg = self.request.cs_cfg();
        let publish_dir = self.request.instance_dir().join("publish");
        let publish_dir_str = publish_dir.to_string_lossy().into_owned();

        self.sys.create_dir(&publish_dir).await?;
        self.sys.set_permissions(&publish_dir, 0o755).await?;
        self.sys
            .set_owner(&publish_dir, Some(PKI_USER), Some(PKI_USER))
            .await?;

        let publisher = "ca.publish.publisher.instance.FileBaseCRLPublisher";
        let rule = "ca.publish.rule.instance.FileCrlRule";
        let directives = [
            // File publishing on, LDAP off.
            ("ca.publish.enable".to_string(), "true"),
            ("ca.publish.ldappublish.enable".to_string(), "false"),
            // DER-only file publisher.
            (
                "ca.publish.publisher.impl.FileBasedPublisher.class".to_string(),
                "com.netscape.cms.publish.publishers.FileBasedPublisher",
            ),
            (format!("{}.crlLinkExt", publisher), "bin"),
            (format!("{}.directory", publisher), publish_dir_str.as_str()),
            (format!("{}.latestCrlLink", publisher), "true"),
            (format!("{}.pluginName", publisher), "FileBasedPublisher"),
            (format!("{}.timeStamp", publisher), "LocalTime"),
            (format!("{}.zipCRLs", publisher), "false"),
            (format!("{}.zipLevel", publisher), "9"),
            (format!("{}.Filename.b64", publisher), "false"),
            (format!("{}.Filename.der", publisher), "true"),
            // Publishing rule.
            (format!("{}.enable", rule), "true"),
            (format!("{}.mapper", rule), "NoMap"),
            (format!("{}.pluginName", rule), "Rule"),
            (format!("{}.publisher", rule), "FileBaseCRLPublisher"),
            (format!("{}.type", rule), "crl"),
            // LDAP rules off.
            ("ca.publish.rule.instance.LdapCaCertRule.enable".to_string(), "false"),
            ("ca.publish.rule.instance.LdapCrlRule.enable".to_string(), "false"),
            ("ca.publish.rule.instance.LdapUserCertRule.enable".to_string(), "false"),
            ("ca.publish.rule.instance.LdapXCertRule.enable".to_string(), "false"),
        ];
        let directives: Vec<(&str, &str)> = directives
            .iter()
            .map(|(name, value)| (name.as_str(), *value))
            .collect();
        set_directives(&*self.sys, &cs_cfg, &directives, "=").await?;

        // An empty predicate is written as a bare `predicate=` line.
        let predicate = format!("{}.predicate=", rule);
        set_directives(&*self.sys, &cs_cfg, &[(predicate.as_str(), "")], "").await?;

        let crl_uri = format!("https://{}/ipa/crl/MasterCRL.bin", self.request.host_name);
        set_directives(
            &*self.sys,
            &self.request.service_profile(),
            &[(
                "policyset.serverCertSet.9.default.params.crlDistPointsPointName_0",
                crl_uri.as_str(),
            )],
            "=",
        )
        .await?;

        self.sys.restore_context(&publish_dir).await
    }

    async fn set_subject_base(&self) -> Result<()> {
        let profile = self.request.service_profile();
        match update_file(
            &*self.sys,
            &profile,
            PROFILE_SUBJECT_TEMPLATE,
            &self.request.subject_base,
        )
        .await
        {
            Ok(0) => tracing::warn!(
                "Subject template not found in {}, subject base not updated",
                profile.display()
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!("Updating subject_base in CA template failed: {}", e),
        }
        Ok(())
    }

    async fn enable_on_boot(&self) -> Result<()> {
        let enabled = self.sys.is_enabled(CA_SERVICE).await?;
        self.state.backup(CA_UNIT, "enabled", enabled)
    }

    /// Restart the instance. Timing out on the port wait fails the step.
    async fn restart(&self) -> Result<()> {
        self.sys.service(CA_SERVICE, ServiceAction::Restart).await?;
        self.sys
            .wait_for_port("localhost", ports::UNSECURE, self.request.port_wait)
            .await
    }

    async fn request_ra_certificate(&mut self) -> Result<()> {
        let client = EnrollmentClient::new(self.request.endpoints.clone(), None)?;
        let subject = format!("CN=IPA RA,{}", self.request.subject_base);

        let mut session = client.request_certificate(&*self.ra_db, &subject).await?;
        session.issued_chain = self.chain.clone();
        self.session = Some(session);
        Ok(())
    }

    async fn issue_ra_certificate(&mut self) -> Result<()> {
        self.write_agent_password().await?;

        // The agent database holds the authority chain but does not trust it.
        for nickname in self.agent_db.list_chain_nicknames(CA_AGENT_NICKNAME).await? {
            self.agent_db
                .set_trust(&nickname, TrustFlags::CertificateAuthority)
                .await?;
        }

        let identity = self.agent_db.export_client_identity(CA_AGENT_NICKNAME).await?;
        let client = EnrollmentClient::new(self.agent_endpoints()?, Some(&identity))?;

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| InstallError::precondition_missing("RA certificate was not requested"))?;
        client.issue_certificate(session, &*self.ra_db).await
    }

    async fn configure_ra_agent(&mut self) -> Result<()> {
        let session = self
            .session
            .take()
            .ok_or_else(|| InstallError::precondition_missing("RA certificate was not requested"))?;
        let request_id = session.require_request_id()?.to_string();
        let certificate = session.require_certificate()?.clone();

        let entry = ra_agent_entry(
            &request_id,
            certificate.to_der()?,
            &self.request.subject_base,
        );
        self.directory.add_entry(&entry).await?;

        for group in RA_AGENT_GROUPS {
            let group_dn = format!("cn={},ou=groups,{}", group, CA_BASE_DN);
            self.directory.add_group_member(&group_dn, &entry.dn).await?;
        }

        self.ra_request_id = Some(request_id);
        self.ra_certificate = Some(certificate);
        Ok(())
    }

    async fn configure_http_proxy(&self) -> Result<()> {
        self.sys
            .copy_file(
                &Path::new(SHARE_DIR).join(PROXY_CONF),
                &Path::new(HTTPD_CONFD).join(PROXY_CONF),
            )
            .await
    }
}

#[async_trait]
impl StepRunner<CaStep> for CaInstance {
    async fn run_step(&mut self, action: &CaStep) -> Result<StepFlow> {
        match action {
            CaStep::CreateUser => self.create_user().await?,
            CaStep::CreateInstance => self.create_instance().await?,
            CaStep::ConfigureInstance => return self.configure_instance().await,
            CaStep::DisableNonces => self.disable_nonces().await?,
            CaStep::CreateAgentPkcs12 => self.create_agent_pkcs12().await?,
            CaStep::CreateRaAgentDb => self.create_ra_agent_db().await?,
            CaStep::ImportCaChain => self.import_ca_chain().await?,
            CaStep::FixRaPermissions => self.fix_ra_permissions().await?,
            CaStep::SetupSigningProfile => self.setup_signing_profile().await?,
            CaStep::EnableCrlPublishing => self.enable_crl_publishing().await?,
            CaStep::SetSubjectBase => self.set_subject_base().await?,
            CaStep::EnableSubjectKeyIdentifier => {
                self.enable_subject_key_identifier().await?;
            }
            CaStep::EnableOnBoot => self.enable_on_boot().await?,
            CaStep::Restart => self.restart().await?,
            CaStep::RequestRaCertificate => self.request_ra_certificate().await?,
            CaStep::IssueRaCertificate => self.issue_ra_certificate().await?,
            CaStep::ConfigureRaAgent => self.configure_ra_agent().await?,
            CaStep::ConfigureHttpProxy => self.configure_http_proxy().await?,
        }
        Ok(StepFlow::Continue)
    }
}

/// Directory entry registering the RA as an agent of the authority.
pub(crate) fn ra_agent_entry(request_id: &str, cert_der: Vec<u8>, subject_base: &str) -> LdapEntry {
    let mut entry = LdapEntry::new(format!("uid={},ou=People,{}", RA_USER, CA_BASE_DN));
    for class in ["top", "person", "organizationalPerson", "inetOrgPerson", "cmsuser"] {
        entry = entry.attr("objectClass", class);
    }
    entry
        .attr("uid", RA_USER)
        .attr("sn", RA_USER)
        .attr("cn", RA_USER)
        .attr("usertype", "agentType")
        .attr("userstate", "1")
        .attr("userCertificate", cert_der)
        .attr(
            "description",
            format!(
                "2;{};CN=Certificate Authority,{};CN=IPA RA,{}",
                request_id, subject_base, subject_base
            ),
        )
}

fn agent_password_file(request: &InstallationRequest) -> PathBuf {
    request.ca_agent_db.join("pwdfile.txt")
}

fn scratch_file(suffix: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "pki-ca-install-{}{}",
        hex::encode(rand::random::<[u8; 8]>()),
        suffix
    ))
}

fn flag(args: &mut Vec<String>, name: &str, value: impl Into<String>) {
    args.push(name.to_string());
    args.push(value.into());
}
