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

//! Editing of `name=value` configuration files such as `CS.cfg` and
//! certificate profiles.
//!
//! The text functions are pure; the file functions read and write through
//! [`SystemCapabilities`].

use std::path::Path;

use regex::Regex;

use crate::capabilities::SystemCapabilities;
use crate::error::{InstallError, Result};

fn directive_rest<'a>(line: &'a str, directive: &str, separator: &str) -> Option<&'a str> {
    let rest = line.trim_start().strip_prefix(directive)?;
    if rest.is_empty() || separator.is_empty() || rest.trim_start().starts_with(separator) {
        Some(rest)
    } else {
        None
    }
}

/// Set `directive` to `value`, replacing every existing occurrence or
/// appending one if there is none.
pub fn set_directive(text: &str, directive: &str, value: &str, separator: &str) -> String {
    let replacement = format!("{}{}{}", directive, separator, value);
    let mut found = false;

    let mut lines: Vec<String> = text
        .lines()
        .map(|line| {
            if directive_rest(line, directive, separator).is_some() {
                found = true;
                replacement.clone()
            } else {
                line.to_string()
            }
        })
        .collect();

    if !found {
        lines.push(replacement);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Value of the first occurrence of `directive`, unquoted and trimmed.
pub fn get_directive(text: &str, directive: &str, separator: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let rest = directive_rest(line, directive, separator)?;
        let value = if separator.is_empty() {
            rest
        } else {
            rest.trim_start().strip_prefix(separator)?
        };
        Some(value.trim().trim_matches('"').to_string())
    })
}

/// The `preop.pin` of an unconfigured authority instance.
pub fn preop_pin(cs_cfg: &str) -> Option<String> {
    let pattern = Regex::new(r"preop\.pin=(.*)").ok()?;
    cs_cfg
        .lines()
        .find_map(|line| pattern.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Apply several directives to a file in one rewrite.
pub async fn set_directives(
    sys: &dyn SystemCapabilities,
    path: &Path,
    directives: &[(&str, &str)],
    separator: &str,
) -> Result<()> {
    let mut text = read_config(sys, path).await?;
    for (directive, value) in directives {
        text = set_directive(&text, directive, value, separator);
    }
    sys.write_file(path, text.as_bytes()).await
}

/// Read one directive from a file.
pub async fn read_directive(
    sys: &dyn SystemCapabilities,
    path: &Path,
    directive: &str,
    separator: &str,
) -> Result<Option<String>> {
    let text = read_config(sys, path).await?;
    Ok(get_directive(&text, directive, separator))
}

/// Replace every occurrence of `original` with `replacement`.
///
/// Returns the number of replacements made.
pub async fn update_file(
    sys: &dyn SystemCapabilities,
    path: &Path,
    original: &str,
    replacement: &str,
) -> Result<usize> {
    let text = read_config(sys, path).await?;
    let count = text.matches(original).count();
    if count > 0 {
        sys.write_file(path, text.replace(original, replacement).as_bytes())
            .await?;
    }
    Ok(count)
}

/// Read the `preop.pin` from an instance's `CS.cfg`.
pub async fn read_preop_pin(sys: &dyn SystemCapabilities, cs_cfg: &Path) -> Result<String> {
    let text = read_config(sys, cs_cfg).await?;
    preop_pin(&text).ok_or_else(|| {
        InstallError::precondition_missing(format!(
            "Unable to find preop.pin in {}. Is your CA already configured?",
            cs_cfg.display()
        ))
    })
}

async fn read_config(sys: &dyn SystemCapabilities, path: &Path) -> Result<String> {
    if !sys.path_exists(path).await {
        return Err(InstallError::precondition_missing(format!(
            "Configuration file {} not found",
            path.display()
        )));
    }
    sys.read_to_string(path).await
}
