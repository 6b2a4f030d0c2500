//! Byte framing of the backup event.
//!
//! A backup payload is three UTF-8 fields joined by the ASCII unit separator
//! (0x1F): the keyspace glob, the table (or `*`) and the execution instant in
//! RFC 3339 with second precision.

use chrono::{DateTime, SecondsFormat, Utc};
use snapmesh_gossip::EventPayload;
use thiserror::Error;

/// Separator between payload fields.
pub const FIELD_SEPARATOR: char = '\u{1F}';

/// Errors decoding or building a backup payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// Fewer than three fields.
    #[error("malformed backup payload: expected 3 fields, found {found}")]
    Malformed {
        /// Number of fields found.
        found: usize,
    },

    /// The payload is not UTF-8.
    #[error("backup payload is not valid UTF-8")]
    NotUtf8,

    /// The execution instant is not RFC 3339.
    #[error("invalid execution time {value:?}: {source}")]
    TimeParse {
        /// Raw field.
        value: String,
        /// Parser error.
        #[source]
        source: chrono::ParseError,
    },

    /// A field contains the separator and would not survive framing.
    #[error("{field} must not contain the 0x1F separator")]
    SeparatorInField {
        /// Offending field.
        field: &'static str,
    },
}

/// Parameters of a cluster-wide backup, decided once by the requesting agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPayload {
    /// Shell glob matched against non-system keyspaces.
    pub keyspace_glob: String,
    /// Table name, or `*` for whole keyspaces.
    pub table: String,
    /// Instant every agent fires the snapshot at.
    pub execute_at: DateTime<Utc>,
}

impl BackupPayload {
    /// Builds a payload, refusing fields that contain the separator.
    pub fn new(
        keyspace_glob: impl Into<String>,
        table: impl Into<String>,
        execute_at: DateTime<Utc>,
    ) -> Result<Self, PayloadError> {
        let keyspace_glob = keyspace_glob.into();
        let table = table.into();
        if keyspace_glob.contains(FIELD_SEPARATOR) {
            return Err(PayloadError::SeparatorInField {
                field: "keyspace glob",
            });
        }
        if table.contains(FIELD_SEPARATOR) {
            return Err(PayloadError::SeparatorInField { field: "table" });
        }
        Ok(Self {
            keyspace_glob,
            table,
            execute_at,
        })
    }

    /// Parses the wire form. Fields past the third are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        let text = std::str::from_utf8(bytes).map_err(|_| PayloadError::NotUtf8)?;
        let fields: Vec<&str> = text.split(FIELD_SEPARATOR).collect();
        if fields.len() < 3 {
            return Err(PayloadError::Malformed {
                found: fields.len(),
            });
        }
        let execute_at = DateTime::parse_from_rfc3339(fields[2])
            .map_err(|source| PayloadError::TimeParse {
                value: fields[2].to_string(),
                source,
            })?
            .with_timezone(&Utc);
        Ok(Self {
            keyspace_glob: fields[0].to_string(),
            table: fields[1].to_string(),
            execute_at,
        })
    }
}

impl EventPayload for BackupPayload {
    fn encode(&self) -> Vec<u8> {
        format!(
            "{}{sep}{}{sep}{}",
            self.keyspace_glob,
            self.table,
            self.execute_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            sep = FIELD_SEPARATOR
        )
        .into_bytes()
    }
}

/// Payload with no content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmptyPayload;

impl EventPayload for EmptyPayload {
    fn encode(&self) -> Vec<u8> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};
    use proptest::prelude::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 18, h, m, s).unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let payload = BackupPayload::new("app_*", "users", at(11, 6, 20)).unwrap();
        assert_eq!(
            payload.encode(),
            b"app_*\x1fusers\x1f2024-03-18T11:06:20Z".to_vec()
        );
    }

    #[test]
    fn test_decode_accepts_offsets() {
        let payload = BackupPayload::decode(b"ks\x1f*\x1f2024-03-18T12:06:20+01:00").unwrap();
        assert_eq!(payload.execute_at, at(11, 6, 20));
        assert_eq!(payload.table, "*");
    }

    #[test]
    fn test_decode_too_few_fields() {
        assert!(matches!(
            BackupPayload::decode(b"ks\x1f*"),
            Err(PayloadError::Malformed { found: 2 })
        ));
        assert!(matches!(
            BackupPayload::decode(b""),
            Err(PayloadError::Malformed { found: 1 })
        ));
    }

    #[test]
    fn test_decode_bad_time() {
        let err = BackupPayload::decode(b"ks\x1f*\x1fnext tuesday").unwrap_err();
        assert!(matches!(err, PayloadError::TimeParse { ref value, .. } if value == "next tuesday"));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        assert!(matches!(
            BackupPayload::decode(&[0xff, 0x1f, 0x2a, 0x1f]),
            Err(PayloadError::NotUtf8)
        ));
    }

    #[test]
    fn test_separator_in_field_rejected() {
        assert!(matches!(
            BackupPayload::new("a\u{1f}b", "*", at(0, 0, 0)),
            Err(PayloadError::SeparatorInField { field: "keyspace glob" })
        ));
        assert!(matches!(
            BackupPayload::new("a", "t\u{1f}", at(0, 0, 0)),
            Err(PayloadError::SeparatorInField { field: "table" })
        ));
    }

    #[test]
    fn test_empty_payload_has_no_bytes() {
        assert!(EmptyPayload.encode().is_empty());
    }

    proptest! {
        #[test]
        fn prop_round_trip_to_the_second(
            glob in "[a-z_*?]{1,16}",
            table in "[a-z_]{1,16}|\\*",
            secs in 0i64..4_000_000_000,
            nanos in 0u32..1_000_000_000,
        ) {
            let execute_at = Utc.timestamp_opt(secs, nanos).unwrap();
            let payload = BackupPayload::new(glob.clone(), table.clone(), execute_at).unwrap();
            let decoded = BackupPayload::decode(&payload.encode()).unwrap();
            prop_assert_eq!(decoded.keyspace_glob, glob);
            prop_assert_eq!(decoded.table, table);
            prop_assert_eq!(decoded.execute_at, execute_at.with_nanosecond(0).unwrap());
        }
    }
}
