// Copyright 2025 trackrec authors
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

use thiserror::Error;

/// Errors produced while encoding or decoding binary records.
///
/// All decode paths fail closed: a tag mismatch, version mismatch,
/// truncated stream, or over-limit size aborts the record and leaves no
/// partial state behind.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected tag: expected '{}', found '{}'", tag_str(*expected), tag_str(*found))]
    TagMismatch { expected: u64, found: u64 },

    #[error("unknown tag '{}'", tag_str(*found))]
    UnknownTag { found: u64 },

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u64),

    #[error("truncated stream")]
    Truncated,

    #[error("{what} exceeds limit: {size} > {limit}")]
    SizeLimit {
        what: &'static str,
        size: u64,
        limit: u64,
    },

    #[error("malformed record: {0}")]
    Malformed(&'static str),

    #[error("camera calibration JSON: {0}")]
    Calibration(#[from] serde_json::Error),
}

/// Renders an 8-byte ASCII tag for error messages, falling back to hex for
/// non-printable bytes.
pub(crate) fn tag_str(tag: u64) -> String {
    let bytes = tag.to_le_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        String::from_utf8_lossy(&bytes).into_owned()
    } else {
        format!("{tag:#018x}")
    }
}
