// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Shared types passed between the parser, throttler, mover, and adapter
//! crates of the crash collector. No behavior lives here beyond small,
//! infallible constructors — the types are deliberately thin so each crate
//! that owns a processing stage can be tested independently of the others.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// A mapping from annotation name to string value.
///
/// Backed by a `BTreeMap` so that serialized raw-crash objects have
/// lexicographically sorted keys, matching the object-store contract.
pub type CrashAnnotations = BTreeMap<String, String>;

/// One dump's raw bytes plus the filename the client sent it under, if any.
///
/// The filename has no bearing on where the dump is stored (see
/// `bpcollector-storage`'s `ObjectPaths::for_dump`, which is keyed on the
/// dump *name*, not the filename) — it exists only to be recorded in the
/// `v1/dump_names/<id>` index, mirroring what the client uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpEntry {
    /// Raw dump bytes.
    pub bytes: Vec<u8>,
    /// Original filename from the multipart `Content-Disposition`, if the
    /// client sent one.
    pub filename: Option<String>,
}

impl DumpEntry {
    /// Construct an entry with no filename, for backends and tests that only
    /// care about the bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            filename: None,
        }
    }
}

/// A mapping from dump name to its bytes and original filename.
pub type DumpSet = BTreeMap<String, DumpEntry>;

/// Whether annotations were parsed from multipart form fields or recovered
/// from a single JSON-valued `extra` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    /// Plain multipart form fields.
    #[default]
    Multipart,
    /// A single `extra` field holding a JSON object.
    Json,
}

/// The verdict produced by the throttler for one crash submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThrottleVerdict {
    /// Save and publish.
    Accept,
    /// Save only; do not publish.
    Defer,
    /// Respond as if accepted but drop after responding.
    FakeAccept,
    /// Do not return an id; respond with a rejection body.
    Reject,
}

/// The outcome of evaluating the throttler's rule list, including which rule
/// decided the verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleDecision {
    /// The final verdict.
    pub verdict: ThrottleVerdict,
    /// Name of the rule that produced the verdict.
    pub rule_name: String,
    /// Sample percentage, present only for sampled-accept rules.
    pub sample_percent: Option<u8>,
}

impl ThrottleDecision {
    /// The ID-digit encoding this verdict is assigned: `0` for accept-and-publish
    /// paths, `1` for save-only paths. `Reject` never reaches ID assignment.
    pub fn id_digit(&self) -> u8 {
        match self.verdict {
            ThrottleVerdict::Accept | ThrottleVerdict::FakeAccept => 0,
            ThrottleVerdict::Defer => 1,
            ThrottleVerdict::Reject => 0,
        }
    }
}

/// The in-memory aggregate passed from the submit handler through the
/// hand-off queue to a crash-mover worker.
#[derive(Debug, Clone)]
pub struct CrashReport {
    /// 36-char identifier, see `bpcollector-id`.
    pub id: String,
    /// Annotation key/value pairs, including collector-added fields.
    pub annotations: CrashAnnotations,
    /// Named binary dump buffers.
    pub dumps: DumpSet,
    /// When the submission was received.
    pub received_at: DateTime<Utc>,
    /// Whether annotations came from form fields or a JSON `extra` blob.
    pub payload_kind: PayloadKind,
    /// Whether the original request body was gzip-compressed.
    pub payload_compressed: bool,
    /// Ordered notes describing actions the collector took while handling
    /// this report (dropped fields, truncations, retries).
    pub notes: Vec<String>,
    /// The throttle decision made for this report.
    pub throttle: ThrottleDecision,
}

impl CrashReport {
    /// Append a note to this report's collector-notes trail.
    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    /// Whether this report should be published after a successful save.
    pub fn should_publish(&self) -> bool {
        matches!(self.throttle.verdict, ThrottleVerdict::Accept)
    }
}

/// The terminal state a crash-mover worker reaches for one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoverOutcome {
    /// Saved and (if applicable) published successfully.
    Done,
    /// Dropped after storage retries were exhausted.
    DroppedSave,
    /// Saved, but publish retries were exhausted.
    DroppedPublish,
}

/// Result of a single adapter's `verify()` call, surfaced by `GET /__heartbeat__`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VerifyCheck {
    /// Human-readable name of the checked dependency, e.g. `"storage"`.
    pub name: String,
    /// Whether the check succeeded.
    pub ok: bool,
    /// Error detail, present only when `ok` is false.
    pub detail: Option<String>,
}

/// Aggregate of every adapter's verify result.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct VerifyReport {
    /// One entry per configured adapter.
    pub checks: Vec<VerifyCheck>,
}

impl VerifyReport {
    /// True if every check in the report succeeded.
    pub fn all_ok(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_digit_matches_verdict() {
        let accept = ThrottleDecision {
            verdict: ThrottleVerdict::Accept,
            rule_name: "r".into(),
            sample_percent: None,
        };
        assert_eq!(accept.id_digit(), 0);

        let defer = ThrottleDecision {
            verdict: ThrottleVerdict::Defer,
            rule_name: "r".into(),
            sample_percent: None,
        };
        assert_eq!(defer.id_digit(), 1);
    }

    #[test]
    fn should_publish_only_on_accept() {
        let mut report = sample_report(ThrottleVerdict::Defer);
        assert!(!report.should_publish());
        report.throttle.verdict = ThrottleVerdict::Accept;
        assert!(report.should_publish());
    }

    #[test]
    fn verify_report_all_ok() {
        let mut report = VerifyReport::default();
        assert!(report.all_ok());
        report.checks.push(VerifyCheck {
            name: "storage".into(),
            ok: true,
            detail: None,
        });
        assert!(report.all_ok());
        report.checks.push(VerifyCheck {
            name: "publish".into(),
            ok: false,
            detail: Some("timeout".into()),
        });
        assert!(!report.all_ok());
    }

    fn sample_report(verdict: ThrottleVerdict) -> CrashReport {
        CrashReport {
            id: "0".repeat(36),
            annotations: CrashAnnotations::new(),
            dumps: DumpSet::new(),
            received_at: Utc::now(),
            payload_kind: PayloadKind::Multipart,
            payload_compressed: false,
            notes: Vec::new(),
            throttle: ThrottleDecision {
                verdict,
                rule_name: "test".into(),
                sample_percent: None,
            },
        }
    }
}
