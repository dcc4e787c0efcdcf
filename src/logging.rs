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

//! Logging setup for the installer binary.
//!
//! The library only emits `tracing` events; this module wires them to a
//! `tracing_subscriber` formatter writing to stderr or to a log file.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::Level;

use crate::error::{InstallError, Result};

/// Where and how much to log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Most verbose level emitted.
    pub level: Level,
    /// Append to this file instead of writing to stderr.
    pub log_file: Option<PathBuf>,
    /// Emit one JSON object per event.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_file: None,
            json: false,
        }
    }
}

impl LogConfig {
    /// Level from the usual `-v`/`-q` command-line flags.
    ///
    /// `quiet` wins over any number of `-v`.
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        let level = if quiet {
            Level::ERROR
        } else {
            match verbose {
                0 => Level::INFO,
                1 => Level::DEBUG,
                _ => Level::TRACE,
            }
        };

        Self {
            level,
            ..Self::default()
        }
    }

    /// Log to `path`.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Switch to JSON output.
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails if the log file cannot be opened or a subscriber is already set.
pub fn init(config: &LogConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(config.level)
        .with_target(false);

    let result = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    InstallError::config(format!("Failed to open log file {}: {}", path.display(), e))
                })?;
            let builder = builder.with_ansi(false).with_writer(Mutex::new(file));
            if config.json {
                builder.json().try_init()
            } else {
                builder.try_init()
            }
        }
        None => {
            let builder = builder.with_writer(std::io::stderr);
            if config.json {
                builder.json().try_init()
            } else {
                builder.try_init()
            }
        }
    };

    result.map_err(|e| InstallError::config(format!("Failed to initialize logging: {e}")))
}
