// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Generates and validates the crash identifier: 8-4-4-4-6 lower-case hex of
//! random bytes, followed by a `YYMMDD` collection date and a single digit
//! encoding the throttle verdict (`0` for an accept-and-publish path, `1` for
//! save-only). A downstream consumer that sees only the id can recover the
//! collection date and whether publish was requested without reading the
//! stored object.

use chrono::{DateTime, Datelike, Utc};
use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;

static ID_SHAPE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(
        r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{6}[0-9]{2}(0[1-9]|1[0-2])(0[1-9]|[12][0-9]|3[01])[01]$",
    )
    .unwrap()
});

/// Returns true if `candidate` already has the collector's identifier shape,
/// meaning a client-supplied `uuid` annotation can be reused verbatim.
pub fn matches_shape(candidate: &str) -> bool {
    ID_SHAPE.is_match(candidate)
}

/// Generate a fresh identifier for a crash received at `received_at`, with
/// `verdict_digit` (`0` or `1`) encoding whether the crash will be published.
///
/// The random prefix always uses a fresh 13 bytes from an `OsRng`-backed
/// thread RNG; the date and verdict suffix are always the collector's own
/// values, even when reusing a client-supplied id's random prefix via
/// [`adopt_or_generate`].
pub fn generate(received_at: DateTime<Utc>, verdict_digit: u8) -> String {
    let mut bytes = [0u8; 13];
    rand::thread_rng().fill_bytes(&mut bytes);
    format_id(&bytes, received_at, verdict_digit)
}

/// Reuse the random prefix of `client_uuid` if it already has the collector's
/// identifier shape; otherwise generate a fresh identifier. In both cases the
/// date and verdict digit are always overwritten to the collector's own
/// values — the client never dictates routing.
pub fn adopt_or_generate(
    client_uuid: Option<&str>,
    received_at: DateTime<Utc>,
    verdict_digit: u8,
) -> String {
    match client_uuid {
        Some(candidate) if matches_shape(candidate) => {
            let prefix = &candidate[..30]; // "xxxxxxxx-xxxx-xxxx-xxxx-xxxxxx"
            format!(
                "{prefix}{}",
                date_and_verdict_suffix(received_at, verdict_digit)
            )
        }
        _ => generate(received_at, verdict_digit),
    }
}

fn format_id(bytes: &[u8; 13], received_at: DateTime<Utc>, verdict_digit: u8) -> String {
    let hex = hex_encode(bytes);
    format!(
        "{}-{}-{}-{}-{}{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..26],
        date_and_verdict_suffix(received_at, verdict_digit)
    )
}

fn date_and_verdict_suffix(received_at: DateTime<Utc>, verdict_digit: u8) -> String {
    format!(
        "{:02}{:02}{:02}{}",
        received_at.year() % 100,
        received_at.month(),
        received_at.day(),
        verdict_digit
    )
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
