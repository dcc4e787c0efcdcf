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

//! Installing a clone of an existing authority on a replica.

use std::path::PathBuf;
use std::sync::Arc;

use super::{CaDirectoryInstance, CaInstance, InstallOutcome, CA_SERVICE, DS_SERVER_ID};
use crate::capabilities::{ServiceAction, SystemCapabilities};
use crate::config::InstallationRequest;
use crate::error::{InstallError, Result};
use crate::sequencer::{ProgressHandler, StepSequencer};
use crate::state::SharedStateStore;

/// Replica information prepared on the master.
#[derive(Clone)]
pub struct ReplicaConfig {
    /// Unpacked replica file directory.
    pub dir: PathBuf,
    /// Realm name.
    pub realm: String,
    /// Fully-qualified host name of the replica.
    pub host_name: String,
    /// Directory manager password.
    pub dirman_password: String,
    /// Host name of the master authority.
    pub master_host: String,
    /// Certificate subject base, `O=<REALM>` when unset.
    pub subject_base: Option<String>,
    /// Install the authority now rather than only describing it.
    pub setup_ca: bool,
}

impl std::fmt::Debug for ReplicaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaConfig")
            .field("dir", &self.dir)
            .field("realm", &self.realm)
            .field("host_name", &self.host_name)
            .field("master_host", &self.master_host)
            .field("subject_base", &self.subject_base)
            .field("setup_ca", &self.setup_ca)
            .finish_non_exhaustive()
    }
}

impl ReplicaConfig {
    /// CA bundle exported from the master.
    pub fn ca_pkcs12(&self) -> PathBuf {
        self.dir.join("cacert.p12")
    }

    /// Request describing the cloned authority.
    pub fn request(&self, postinstall: bool) -> Result<InstallationRequest> {
        let mut builder = InstallationRequest::builder()
            .realm(&self.realm)
            .host_name(&self.host_name)
            .dm_password(&self.dirman_password)
            .admin_password(&self.dirman_password)
            .clone_from(self.ca_pkcs12(), &self.master_host);
        if let Some(subject_base) = &self.subject_base {
            builder = builder.subject_base(subject_base);
        }
        // After the fact the web server database already exists.
        if postinstall {
            builder = builder.keep_ra_agent_db();
        }
        builder.build().map_err(InstallError::config)
    }
}

/// What [`install_replica_ca`] did.
#[derive(Debug)]
pub enum ReplicaOutcome {
    /// The master has no dogtag authority; nothing to clone.
    SelfSigned,
    /// The authority was described but not installed.
    Deferred(InstallationRequest),
    /// The clone and its directory server were installed.
    Installed(InstallationRequest),
}

/// Install a clone of the master's authority on this replica.
///
/// With `postinstall` set the replica is already running and its web
/// server certificate database is kept.
pub async fn install_replica_ca<P: ProgressHandler>(
    config: &ReplicaConfig,
    postinstall: bool,
    sys: Arc<dyn SystemCapabilities>,
    state: SharedStateStore,
    sequencer: &StepSequencer<P>,
) -> Result<ReplicaOutcome> {
    if !sys.path_exists(&config.ca_pkcs12()).await {
        tracing::debug!("No {} in replica file", config.ca_pkcs12().display());
        return Ok(ReplicaOutcome::SelfSigned);
    }

    let request = config.request(postinstall)?;
    if !config.setup_ca {
        return Ok(ReplicaOutcome::Deferred(request));
    }

    let mut ca = CaInstance::new(request.clone(), sys.clone(), state.clone());
    if ca.is_installed().await {
        return Err(InstallError::precondition_missing(
            "A CA is already configured on this system.",
        ));
    }

    let mut ds = CaDirectoryInstance::new(&request, sys.clone(), state);
    let dogtag_pkcs12 = config.dir.join("dogtagcert.p12");
    if sys.path_exists(&dogtag_pkcs12).await {
        ds = ds.with_pkcs12(dogtag_pkcs12, config.dir.join("dirsrv_pin.txt"));
    }
    ds.install(sequencer).await?;
    ds.load_pkcs12().await?;
    ds.enable_ssl().await?;
    ds.restart_instance().await?;

    match ca.install(sequencer).await? {
        InstallOutcome::Completed => {}
        pending @ InstallOutcome::CsrPending { .. } => {
            return Err(InstallError::precondition_missing(format!(
                "clone install stopped early: {:?}",
                pending
            )));
        }
    }

    // The authority must stop before its directory does and start after it.
    tracing::info!("Restarting the directory and certificate servers");
    let ds_service = format!("dirsrv@{}", DS_SERVER_ID);
    sys.service(CA_SERVICE, ServiceAction::Stop).await?;
    sys.service(&ds_service, ServiceAction::Stop).await?;
    sys.service(&ds_service, ServiceAction::Start).await?;
    sys.service(CA_SERVICE, ServiceAction::Start).await?;

    Ok(ReplicaOutcome::Installed(request))
}
