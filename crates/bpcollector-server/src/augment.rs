//! Collector-added annotations populated after throttling and id assignment,
//! before a [`bpcollector_types::CrashReport`] is handed to the mover.

use bpcollector_parser::ParsedPayload;
use bpcollector_types::{CrashReport, ThrottleDecision};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Multipart field name that carries the primary minidump, used to populate
/// `MinidumpSha256Hash`.
pub struct AugmentConfig<'a> {
    /// `BREAKPAD_DUMP_FIELD`, defaulting to `upload_file_minidump`.
    pub dump_field: &'a str,
}

/// Build the final [`CrashReport`] from a parsed payload, a throttle
/// decision, and an already-assigned id. Populates every collector-added
/// annotation named in the data model: `uuid`, `submitted_timestamp`,
/// `timestamp`, `type_tag`, `dump_checksums`, `MinidumpSha256Hash`,
/// `payload`, `payload_compressed`, `collector_notes`.
pub fn build_report(
    mut parsed: ParsedPayload,
    throttle: ThrottleDecision,
    id: String,
    received_at: DateTime<Utc>,
    config: &AugmentConfig<'_>,
) -> CrashReport {
    let mut checksums = BTreeMap::new();
    for (name, entry) in &parsed.dumps {
        checksums.insert(name.clone(), hex_sha256(&entry.bytes));
    }
    let minidump_hash = parsed
        .dumps
        .get(config.dump_field)
        .map(|entry| hex_sha256(&entry.bytes))
        .unwrap_or_default();

    parsed.annotations.insert("uuid".to_owned(), id.clone());
    parsed
        .annotations
        .insert("submitted_timestamp".to_owned(), received_at.to_rfc3339());
    parsed.annotations.insert(
        "timestamp".to_owned(),
        format!("{:.6}", received_at.timestamp() as f64 + received_at.timestamp_subsec_micros() as f64 / 1_000_000.0),
    );
    parsed.annotations.insert("type_tag".to_owned(), "bp".to_owned());
    parsed.annotations.insert(
        "dump_checksums".to_owned(),
        serde_json::to_string(&checksums).unwrap_or_default(),
    );
    parsed
        .annotations
        .insert("MinidumpSha256Hash".to_owned(), minidump_hash);
    parsed.annotations.insert(
        "payload".to_owned(),
        serde_json::to_value(parsed.payload_kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default(),
    );
    parsed.annotations.insert(
        "payload_compressed".to_owned(),
        if parsed.payload_compressed { "1" } else { "0" }.to_owned(),
    );
    parsed.annotations.insert(
        "collector_notes".to_owned(),
        serde_json::to_string(&parsed.notes).unwrap_or_default(),
    );

    CrashReport {
        id,
        annotations: parsed.annotations,
        dumps: parsed.dumps,
        received_at,
        payload_kind: parsed.payload_kind,
        payload_compressed: parsed.payload_compressed,
        notes: parsed.notes,
        throttle,
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
