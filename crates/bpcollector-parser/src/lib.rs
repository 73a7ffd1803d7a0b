// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Decodes a Breakpad crash submission body into annotations and dumps.
//!
//! Accepts two payload shapes on the wire: plain multipart form fields, or a
//! single `extra` field holding a JSON object. Both shapes may additionally
//! carry binary dump parts. A `Content-Encoding: gzip` body is inflated
//! before multipart decoding begins.

use bpcollector_types::{CrashAnnotations, DumpEntry, DumpSet, PayloadKind};
use bytes::Bytes;
use std::io::Read;
use thiserror::Error;

/// Maximum length, in bytes, of a single annotation value before it is
/// truncated and a note recorded.
pub const DEFAULT_MAX_ANNOTATION_SIZE: usize = 1024 * 1024;

/// Reserved alphabet for annotation names.
fn is_reserved_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'
}

/// Reserved alphabet for dump names. Stricter than annotation names: no dot,
/// no dash, since dump names are rewritten directly into object-store paths
/// (see `bpcollector-storage`'s `ObjectPaths::for_dump`).
fn is_valid_dump_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// A parse failure, each variant mapping to a distinct wire reason string
/// surfaced to the client via `X-Collector-Reason`.
#[derive(Debug, Error)]
pub enum ParseError {
    /// No usable `Content-Length`/size information was available.
    #[error("missing content length")]
    NoContentLength,
    /// `Content-Type` was missing or not `multipart/form-data`.
    #[error("unsupported content type")]
    BadContentType,
    /// The multipart boundary could not be extracted or the body did not
    /// parse as valid multipart/form-data.
    #[error("malformed multipart boundary or body")]
    BadBoundary,
    /// `Content-Encoding: gzip` was set but the body did not inflate.
    #[error("invalid gzip payload")]
    BadGzip,
    /// The payload parsed but contained no usable annotations.
    #[error("no annotations present")]
    NoAnnotations,
    /// The payload exceeded the configured size limit.
    #[error("payload too large")]
    TooLarge,
}

impl ParseError {
    /// The wire reason string sent in `X-Collector-Reason`.
    pub fn reason(&self) -> &'static str {
        match self {
            ParseError::NoContentLength => "no_content_length",
            ParseError::BadContentType => "bad_content_type",
            ParseError::BadBoundary => "bad_boundary",
            ParseError::BadGzip => "bad_gzip",
            ParseError::NoAnnotations => "no_annotations",
            ParseError::TooLarge => "too_large",
        }
    }
}

/// The decoded contents of a crash submission body, ready for the submit
/// handler to augment with collector-added annotations and hand to the
/// throttler.
#[derive(Debug, Default)]
pub struct ParsedPayload {
    /// Sanitised annotation map.
    pub annotations: CrashAnnotations,
    /// Named binary dump buffers.
    pub dumps: DumpSet,
    /// Which payload shape produced `annotations`.
    pub payload_kind: PayloadKind,
    /// Whether the body was gzip-compressed on the wire.
    pub payload_compressed: bool,
    /// Notes recorded while sanitising (dropped fields, truncations).
    pub notes: Vec<String>,
}

/// Limits applied while parsing a single submission.
#[derive(Debug, Clone, Copy)]
pub struct ParseLimits {
    /// Maximum total body size, after decompression.
    pub max_crash_size: usize,
    /// Maximum size of a single annotation value before truncation.
    pub max_annotation_size: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_crash_size: 25 * 1024 * 1024,
            max_annotation_size: DEFAULT_MAX_ANNOTATION_SIZE,
        }
    }
}

/// Parse a crash submission body.
///
/// `content_type` must be the raw `Content-Type` header value;
/// `content_encoding` the raw `Content-Encoding` header value, if present.
pub async fn parse(
    body: Bytes,
    content_type: Option<&str>,
    content_encoding: Option<&str>,
    limits: ParseLimits,
) -> Result<ParsedPayload, ParseError> {
    let content_type = content_type.ok_or(ParseError::BadContentType)?;
    let boundary =
        multer::parse_boundary(content_type).map_err(|_| {
            if content_type.starts_with("multipart/form-data") {
                ParseError::BadBoundary
            } else {
                ParseError::BadContentType
            }
        })?;

    let payload_compressed = content_encoding
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);

    let body = if payload_compressed {
        inflate(&body)?
    } else {
        body
    };

    if body.len() > limits.max_crash_size {
        return Err(ParseError::TooLarge);
    }

    let stream = futures::stream::once(async move { Ok::<_, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut annotations = CrashAnnotations::new();
    let mut dumps = DumpSet::new();
    let mut notes = Vec::new();
    let mut extra_field: Option<Bytes> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(_) => return Err(ParseError::BadBoundary),
        };

        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        let filename = field.file_name().map(str::to_owned);
        let is_binary = filename.is_some();

        let data = field.bytes().await.map_err(|_| ParseError::BadBoundary)?;

        if name == "extra" && !is_binary {
            extra_field = Some(data);
            continue;
        }

        if is_binary {
            if !name.chars().all(is_valid_dump_name_char) || name.is_empty() {
                notes.push(format!("dropped_dump:{name}"));
                continue;
            }
            dumps.insert(
                name,
                DumpEntry {
                    bytes: data.to_vec(),
                    filename,
                },
            );
        } else {
            insert_annotation(&mut annotations, &mut notes, &name, &data, limits);
        }
    }

    let payload_kind = if let Some(extra) = extra_field {
        apply_json_extra(&extra, &mut annotations, &mut notes, limits);
        PayloadKind::Json
    } else {
        PayloadKind::Multipart
    };

    if annotations.is_empty() {
        return Err(ParseError::NoAnnotations);
    }

    Ok(ParsedPayload {
        annotations,
        dumps,
        payload_kind,
        payload_compressed,
        notes,
    })
}

fn apply_json_extra(
    extra: &[u8],
    annotations: &mut CrashAnnotations,
    notes: &mut Vec<String>,
    limits: ParseLimits,
) {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_slice::<serde_json::Value>(extra)
    else {
        notes.push("extra_field_not_json_object".to_owned());
        return;
    };
    for (key, value) in map {
        let value_str = match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        insert_annotation(annotations, notes, &key, value_str.as_bytes(), limits);
    }
}

fn insert_annotation(
    annotations: &mut CrashAnnotations,
    notes: &mut Vec<String>,
    name: &str,
    raw_value: &[u8],
    limits: ParseLimits,
) {
    if !name.chars().all(is_reserved_name_char) || name.is_empty() {
        notes.push(format!("dropped_annotation:{name}"));
        return;
    }

    let cleaned: Vec<u8> = raw_value.iter().copied().filter(|b| *b != 0).collect();
    let mut value = String::from_utf8_lossy(&cleaned).into_owned();

    if value.len() > limits.max_annotation_size {
        value.truncate(limits.max_annotation_size);
        notes.push(format!("truncated:{name}"));
    }

    annotations.insert(name.to_owned(), value);
}

fn inflate(body: &[u8]) -> Result<Bytes, ParseError> {
    let mut decoder = flate2::read::GzDecoder::new(body);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|_| ParseError::BadGzip)?;
    Ok(Bytes::from(out))
}
