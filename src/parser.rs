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

//! Parser for the authority's legacy "variable dump" responses.
//!
//! The agent pages answer with script-like text instead of a structured
//! document. Each logical entry is a block:
//!
//! ```text
//! defList = new Object();
//! defList.defId = "sn_cn";
//! defList.defConstraint = "readonly";
//! defList.defVal = "IPA RA";
//! ```
//!
//! A request review page is a series of `defList` blocks; the page returned
//! after approval is a series of `outputList` blocks (`outputId` /
//! `outputVal`). Parsing never fails: unrecognised or malformed lines are
//! skipped and unmatched names or values are dropped, so callers must check
//! for the keys they need.
//!
//! Lines are folded through a small accumulator holding a pending name, a
//! pending value and a `suppressed` flag. A pair is committed as soon as both
//! slots are filled. In `defList` blocks a `readonly` constraint suppresses
//! the field: it clears the pending value, withdraws a pair that the same
//! definition already committed, and makes the next value line discard both
//! slots. The result is that a read-only field is never reported, whichever
//! order its lines arrive in.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// The two block shapes the authority emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Request definition block (`defList`): fields of a pending request.
    DefList,
    /// Output block (`outputList`): results of an issued request.
    OutputList,
}

impl BlockKind {
    /// Prefix of the line that opens a new block.
    fn start_marker(self) -> &'static str {
        match self {
            Self::DefList => "defList = new Object",
            Self::OutputList => "outputList = new",
        }
    }

    fn id_prefix(self) -> &'static str {
        match self {
            Self::DefList => "defList.defId",
            Self::OutputList => "outputList.outputId",
        }
    }

    fn value_prefix(self) -> &'static str {
        match self {
            Self::DefList => "defList.defVal",
            Self::OutputList => "outputList.outputVal",
        }
    }

    fn constraint_prefix(self) -> Option<&'static str> {
        match self {
            Self::DefList => Some("defList.defConstraint"),
            Self::OutputList => None,
        }
    }

    /// Classify a single line of a response body.
    fn tokenize(self, line: &str) -> Token {
        let line = line.trim();

        if line.starts_with(self.start_marker()) {
            return Token::BlockStart;
        }
        if line.starts_with(self.id_prefix()) {
            return extract_value(line).map_or(Token::Ignored, Token::Name);
        }
        if line.starts_with(self.value_prefix()) {
            return extract_value(line).map_or(Token::Ignored, Token::Value);
        }
        if let Some(prefix) = self.constraint_prefix() {
            if line.starts_with(prefix) {
                return extract_value(line).map_or(Token::Ignored, Token::Constraint);
            }
        }
        Token::Ignored
    }
}

/// One classified line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    BlockStart,
    Name(String),
    Value(String),
    Constraint(String),
    Ignored,
}

/// Ordered field name to value mapping reconstructed from a response.
///
/// Fields appear in the order in which their name/value pair was completed.
/// Re-committing an existing name replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseDocument {
    entries: Vec<(String, String)>,
}

impl ResponseDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if the field is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Remove a field, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == name)?;
        Some(self.entries.remove(index).1)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no field was recognised.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Field names in order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// Consume the document into its ordered pairs.
    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.entries
    }
}

impl Serialize for ResponseDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Working state while folding lines into a document.
#[derive(Debug, Default)]
struct Accumulator {
    pending_name: Option<String>,
    pending_value: Option<String>,
    suppressed: bool,
    /// Field committed by the current definition, withdrawn if it turns out read-only.
    just_committed: Option<String>,
}

impl Accumulator {
    fn feed(&mut self, token: Token, doc: &mut ResponseDocument) {
        match token {
            Token::BlockStart => {
                *self = Self::default();
            }
            Token::Name(name) => {
                self.just_committed = None;
                self.pending_name = non_empty(name);
            }
            Token::Value(value) => {
                self.just_committed = None;
                if self.suppressed {
                    self.pending_name = None;
                    self.pending_value = None;
                    self.suppressed = false;
                } else {
                    self.pending_value = non_empty(value);
                }
            }
            Token::Constraint(constraint) => {
                if constraint == "readonly" {
                    self.suppressed = true;
                    self.pending_value = None;
                    if let Some(name) = self.just_committed.take() {
                        doc.remove(&name);
                    }
                }
            }
            Token::Ignored => {}
        }

        if self.pending_name.is_some() && self.pending_value.is_some() {
            if let (Some(name), Some(value)) = (self.pending_name.take(), self.pending_value.take()) {
                doc.insert(name.clone(), value);
                self.just_committed = Some(name);
            }
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Parse a response body of the given block kind.
pub fn parse(kind: BlockKind, body: &str) -> ResponseDocument {
    let mut doc = ResponseDocument::new();
    let mut acc = Accumulator::default();

    for line in body.lines() {
        acc.feed(kind.tokenize(line), &mut doc);
    }

    doc
}

/// Parse the fields of a pending request (`defList` blocks).
pub fn parse_def_list(body: &str) -> ResponseDocument {
    parse(BlockKind::DefList, body)
}

/// Parse the outputs of an issued request (`outputList` blocks).
pub fn parse_output_list(body: &str) -> ResponseDocument {
    parse(BlockKind::OutputList, body)
}

/// Value of the first line that starts with `prefix`.
///
/// Used for top-level assignments such as `requestId = "7";`.
pub fn find_value(body: &str, prefix: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find(|line| line.starts_with(prefix))
        .and_then(extract_value)
}

/// Extract the right-hand side of a `name = "value";` assignment.
///
/// Quote characters and trailing semicolons are removed and escaped
/// newlines are unescaped. Returns `None` when the line has no `=`.
pub fn extract_value(line: &str) -> Option<String> {
    let (_, raw) = line.split_once('=')?;
    let raw = raw.trim().trim_end_matches(';').trim_end();
    let unquoted: String = raw.chars().filter(|c| *c != '"').collect();
    Some(unescape(&unquoted))
}

/// Replace literal `\n` and `\r` escape sequences with the characters they name.
///
/// Text without escape sequences is returned unchanged, and each sequence is
/// replaced exactly once.
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some('n') => {
                    chars.next();
                    out.push('\n');
                    continue;
                }
                Some('r') => {
                    chars.next();
                    out.push('\r');
                    continue;
                }
                _ => {}
            }
        }
        out.push(c);
    }

    out
}
