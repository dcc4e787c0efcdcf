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

//! [`DirectoryService`] that pipes LDIF into `ldapmodify`.

use std::sync::Arc;

use async_trait::async_trait;

use super::{modify_ldif, DirectoryService, LdapEntry, LdapModification, SystemCapabilities, ToolCommand};
use crate::error::Result;

const LDAPMODIFY: &str = "/usr/bin/ldapmodify";

/// Bind DN of the directory manager.
pub const DIRECTORY_MANAGER: &str = "cn=Directory Manager";

/// Directory reached with simple bind as the directory manager.
#[derive(Clone)]
pub struct LdapModifyDirectory {
    sys: Arc<dyn SystemCapabilities>,
    uri: String,
    bind_dn: String,
    password: String,
}

impl std::fmt::Debug for LdapModifyDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapModifyDirectory")
            .field("uri", &self.uri)
            .field("bind_dn", &self.bind_dn)
            .finish_non_exhaustive()
    }
}

impl LdapModifyDirectory {
    /// Bind to `ldap://host:port` as the directory manager.
    pub fn new(
        sys: Arc<dyn SystemCapabilities>,
        host: &str,
        port: u16,
        password: impl Into<String>,
    ) -> Self {
        Self {
            sys,
            uri: format!("ldap://{}:{}", host, port),
            bind_dn: DIRECTORY_MANAGER.to_string(),
            password: password.into(),
        }
    }

    /// LDAP URI of the directory.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    async fn apply(&self, ldif: String) -> Result<()> {
        tracing::debug!("Applying LDIF to {}", self.uri);
        self.sys
            .run(
                ToolCommand::new(LDAPMODIFY)
                    .args([
                        "-x",
                        "-H",
                        self.uri.as_str(),
                        "-D",
                        self.bind_dn.as_str(),
                        "-w",
                        self.password.as_str(),
                    ])
                    .redact(self.password.clone())
                    .stdin(ldif),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DirectoryService for LdapModifyDirectory {
    async fn add_entry(&self, entry: &LdapEntry) -> Result<()> {
        self.apply(entry.to_ldif()).await
    }

    async fn modify(&self, dn: &str, changes: &[LdapModification]) -> Result<()> {
        self.apply(modify_ldif(dn, changes)).await
    }
}
