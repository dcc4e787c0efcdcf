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

//! [`TrustDatabase`] over the NSS command-line tools.
//!
//! Every operation shells out through [`SystemCapabilities::run`], so the
//! same code runs against the host or against a recording fake.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use super::{SystemCapabilities, ToolCommand, TrustDatabase, TrustFlags};
use crate::config::ClientIdentity;
use crate::error::{InstallError, Result};
use crate::tls::split_pem_bundle;

const CERTUTIL: &str = "/usr/bin/certutil";
const PK12UTIL: &str = "/usr/bin/pk12util";
const OPENSSL: &str = "/usr/bin/openssl";

/// An NSS certificate database directory with its password file.
#[derive(Clone)]
pub struct CertutilDatabase {
    sys: Arc<dyn SystemCapabilities>,
    dir: PathBuf,
    password_file: PathBuf,
}

impl std::fmt::Debug for CertutilDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertutilDatabase")
            .field("dir", &self.dir)
            .field("password_file", &self.password_file)
            .finish_non_exhaustive()
    }
}

impl CertutilDatabase {
    /// Use the database in `dir`, unlocked with the password in `password_file`.
    pub fn new(
        sys: Arc<dyn SystemCapabilities>,
        dir: impl AsRef<Path>,
        password_file: impl AsRef<Path>,
    ) -> Self {
        Self {
            sys,
            dir: dir.as_ref().to_path_buf(),
            password_file: password_file.as_ref().to_path_buf(),
        }
    }

    /// Database directory.
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Password file of the database.
    pub fn password_file(&self) -> &Path {
        &self.password_file
    }

    fn certutil(&self) -> ToolCommand {
        ToolCommand::new(CERTUTIL)
            .arg("-d")
            .arg(self.dir.to_string_lossy())
            .arg("-f")
            .arg(self.password_file.to_string_lossy())
    }

    fn scratch_path(&self, suffix: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "pki-ca-install-{}{}",
            hex::encode(rand::random::<[u8; 8]>()),
            suffix
        ))
    }

    async fn discard(&self, path: &Path) {
        if let Err(e) = self.sys.remove_file(path).await {
            tracing::debug!("Could not remove {}: {}", path.display(), e);
        }
    }
}

#[async_trait]
impl TrustDatabase for CertutilDatabase {
    async fn create_database(&self) -> Result<()> {
        self.sys.run(self.certutil().arg("-N")).await?;
        Ok(())
    }

    async fn generate_key_pair_and_csr(&self, subject_dn: &str, key_bits: u32) -> Result<String> {
        let noise = self.scratch_path(".noise");
        let seed: Vec<u8> = (0..128).map(|_| rand::random::<u8>()).collect();
        self.sys.write_file(&noise, &seed).await?;

        let result = self
            .sys
            .run(self.certutil().args([
                "-R".to_string(),
                "-k".to_string(),
                "rsa".to_string(),
                "-g".to_string(),
                key_bits.to_string(),
                "-s".to_string(),
                subject_dn.to_string(),
                "-z".to_string(),
                noise.to_string_lossy().into_owned(),
                "-a".to_string(),
            ]))
            .await;
        self.discard(&noise).await;

        Ok(result?.stdout)
    }

    async fn import_certificate(
        &self,
        cert: &[u8],
        nickname: &str,
        trust: TrustFlags,
    ) -> Result<()> {
        self.sys
            .run(
                self.certutil()
                    .args(["-A", "-t", trust.as_str(), "-n", nickname, "-a"])
                    .stdin(cert.to_vec()),
            )
            .await?;
        Ok(())
    }

    async fn export_certificate(&self, nickname: &str) -> Result<Vec<u8>> {
        let out = self
            .sys
            .run(self.certutil().args(["-L", "-n", nickname, "-a"]))
            .await?;
        Ok(out.stdout.into_bytes())
    }

    async fn find_server_certificates(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let listing = self.sys.run(self.certutil().arg("-L")).await?;

        let mut found = Vec::new();
        for (nickname, flags) in parse_certificate_list(&listing.stdout) {
            if flags.split(',').any(|f| f.contains('u')) {
                let pem = self.export_certificate(&nickname).await?;
                found.push((nickname, pem));
            }
        }
        Ok(found)
    }

    async fn set_trust(&self, nickname: &str, trust: TrustFlags) -> Result<()> {
        self.sys
            .run(self.certutil().args(["-M", "-t", trust.as_str(), "-n", nickname]))
            .await?;
        Ok(())
    }

    async fn list_chain_nicknames(&self, nickname: &str) -> Result<Vec<String>> {
        let out = self
            .sys
            .run(self.certutil().args(["-O", "-n", nickname]))
            .await?;
        Ok(parse_chain_nicknames(&out.stdout, nickname))
    }

    async fn export_client_identity(&self, nickname: &str) -> Result<ClientIdentity> {
        let bundle = self.scratch_path(".p12");
        let password_file = self.password_file.to_string_lossy().into_owned();

        let result = async {
            self.sys
                .run(ToolCommand::new(PK12UTIL).args([
                    "-n".to_string(),
                    nickname.to_string(),
                    "-o".to_string(),
                    bundle.to_string_lossy().into_owned(),
                    "-d".to_string(),
                    self.dir.to_string_lossy().into_owned(),
                    "-k".to_string(),
                    password_file.clone(),
                    "-w".to_string(),
                    password_file.clone(),
                ]))
                .await?;

            let pem = self
                .sys
                .run(ToolCommand::new(OPENSSL).args([
                    "pkcs12".to_string(),
                    "-in".to_string(),
                    bundle.to_string_lossy().into_owned(),
                    "-nodes".to_string(),
                    "-passin".to_string(),
                    format!("file:{}", password_file),
                ]))
                .await?;

            let (cert_pem, key_pem) = split_pem_bundle(pem.stdout.as_bytes())?;
            Ok::<_, InstallError>(ClientIdentity::new(cert_pem, key_pem))
        }
        .await;

        self.discard(&bundle).await;
        result
    }

    async fn export_pkcs12(
        &self,
        nickname: &str,
        output: &Path,
        password_file: &Path,
    ) -> Result<()> {
        self.sys
            .run(ToolCommand::new(PK12UTIL).args([
                "-n".to_string(),
                nickname.to_string(),
                "-o".to_string(),
                output.to_string_lossy().into_owned(),
                "-d".to_string(),
                self.dir.to_string_lossy().into_owned(),
                "-k".to_string(),
                self.password_file.to_string_lossy().into_owned(),
                "-w".to_string(),
                password_file.to_string_lossy().into_owned(),
            ]))
            .await?;
        Ok(())
    }

    async fn import_pkcs12(&self, input: &Path, password_file: &Path) -> Result<()> {
        if !self.sys.path_exists(input).await {
            return Err(InstallError::precondition_missing(format!(
                "PKCS#12 file {} not found",
                input.display()
            )));
        }
        self.sys
            .run(ToolCommand::new(PK12UTIL).args([
                "-d".to_string(),
                self.dir.to_string_lossy().into_owned(),
                "-i".to_string(),
                input.to_string_lossy().into_owned(),
                "-k".to_string(),
                self.password_file.to_string_lossy().into_owned(),
                "-w".to_string(),
                password_file.to_string_lossy().into_owned(),
            ]))
            .await?;
        Ok(())
    }
}

/// Parse `certutil -L` output into `(nickname, trust flags)` pairs.
pub(crate) fn parse_certificate_list(listing: &str) -> Vec<(String, String)> {
    listing
        .lines()
        .filter_map(|line| {
            let line = line.trim_end();
            let (nickname, flags) = line.rsplit_once(char::is_whitespace)?;
            let nickname = nickname.trim();
            // Header and blank lines have no comma-separated trust column.
            if nickname.is_empty() || flags.matches(',').count() != 2 {
                return None;
            }
            Some((nickname.to_string(), flags.to_string()))
        })
        .collect()
}

/// Parse `certutil -O` output into the issuer nicknames of `leaf`.
pub(crate) fn parse_chain_nicknames(output: &str, leaf: &str) -> Vec<String> {
    let Ok(pattern) = Regex::new(r#"^\s*"(.*)" \[.*"#) else {
        return Vec::new();
    };

    output
        .lines()
        .filter_map(|line| pattern.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|nick| nick != leaf && !nick.starts_with("Builtin"))
        .collect()
}
