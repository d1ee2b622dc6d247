//! Product records and their textual payload.
//!
//! Payload layout: `ID:<identifier>;LOT:<lot>;EXP:<expiry>;NOTE:<notes>`.
//! Inside a value `\` and `;` are escaped with a backslash, so any value
//! survives the round trip. Payloads holding the JSON object
//! `{"product_id", "lot_number", "expiration_date", "notes"}` are accepted
//! when decoding, for labels printed by earlier tooling.

use crate::barcode::error::{BarcodeError, BarcodeResult};
use serde::{Deserialize, Serialize};

const FIELD_KEYS: [&str; 4] = ["ID", "LOT", "EXP", "NOTE"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub identifier: String,
    pub lot: String,
    pub expiry: String,
    pub notes: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LegacyRecord {
    product_id: String,
    lot_number: String,
    expiration_date: String,
    notes: String,
}

impl From<LegacyRecord> for ProductRecord {
    fn from(legacy: LegacyRecord) -> Self {
        Self {
            identifier: legacy.product_id,
            lot: legacy.lot_number,
            expiry: legacy.expiration_date,
            notes: legacy.notes,
        }
    }
}

impl ProductRecord {
    pub fn new(
        identifier: impl Into<String>,
        lot: impl Into<String>,
        expiry: impl Into<String>,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            lot: lot.into(),
            expiry: expiry.into(),
            notes: notes.into(),
        }
    }

    fn values(&self) -> [&str; 4] {
        [&self.identifier, &self.lot, &self.expiry, &self.notes]
    }

    /// Serialize into the payload embedded in the barcode
    pub fn to_payload(&self) -> BarcodeResult<String> {
        if self.identifier.trim().is_empty() {
            return Err(BarcodeError::Encoding(
                "product identifier is required".to_string(),
            ));
        }

        let fields: Vec<String> = FIELD_KEYS
            .iter()
            .zip(self.values())
            .map(|(key, value)| format!("{key}:{}", escape(value)))
            .collect();
        Ok(fields.join(";"))
    }

    /// Parse a decoded payload. Every field must be present.
    pub fn from_payload(payload: &str) -> BarcodeResult<Self> {
        if payload.trim_start().starts_with('{') {
            return serde_json::from_str::<LegacyRecord>(payload)
                .map(Into::into)
                .map_err(|e| BarcodeError::Decode(format!("invalid JSON product record: {e}")));
        }

        let mut values: [Option<String>; 4] = Default::default();
        for segment in split_segments(payload)? {
            let (key, value) = segment.split_once(':').ok_or_else(|| {
                BarcodeError::Decode(format!("payload segment without a key: {segment:?}"))
            })?;
            let index = FIELD_KEYS
                .iter()
                .position(|k| *k == key.trim())
                .ok_or_else(|| BarcodeError::Decode(format!("unknown payload field {key:?}")))?;
            if values[index].replace(value.to_string()).is_some() {
                return Err(BarcodeError::Decode(format!("duplicate payload field {key:?}")));
            }
        }

        let [identifier, lot, expiry, notes] = values;
        let missing = |key: &str| BarcodeError::Decode(format!("payload is missing field {key}"));
        Ok(Self {
            identifier: identifier.ok_or_else(|| missing("ID"))?,
            lot: lot.ok_or_else(|| missing("LOT"))?,
            expiry: expiry.ok_or_else(|| missing("EXP"))?,
            notes: notes.ok_or_else(|| missing("NOTE"))?,
        })
    }
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ';') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Split on unescaped `;`, removing the escapes
fn split_segments(payload: &str) -> BarcodeResult<Vec<String>> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = payload.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => current.push(next),
                None => {
                    return Err(BarcodeError::Decode(
                        "payload ends with a dangling escape".to_string(),
                    ))
                }
            },
            ';' => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_layout() {
        let record = ProductRecord::new("P-100", "L42", "2026-12-31", "keep dry");
        assert_eq!(
            record.to_payload().unwrap(),
            "ID:P-100;LOT:L42;EXP:2026-12-31;NOTE:keep dry"
        );
    }

    #[test]
    fn test_separators_inside_values() {
        let record = ProductRecord::new("A;B", "x:y", "", r"back\slash;");
        let payload = record.to_payload().unwrap();
        assert_eq!(payload, r"ID:A\;B;LOT:x:y;EXP:;NOTE:back\\slash\;");
        assert_eq!(ProductRecord::from_payload(&payload).unwrap(), record);
    }

    #[test]
    fn test_identifier_required() {
        let record = ProductRecord::new("  ", "L1", "", "");
        assert!(matches!(record.to_payload(), Err(BarcodeError::Encoding(_))));
    }

    #[test]
    fn test_legacy_json_payload() {
        let payload = r#"{"product_id": "P1", "lot_number": "L1", "expiration_date": "2025-01-01", "notes": "n"}"#;
        let record = ProductRecord::from_payload(payload).unwrap();
        assert_eq!(record, ProductRecord::new("P1", "L1", "2025-01-01", "n"));
    }

    #[test]
    fn test_incomplete_payloads_are_rejected() {
        for payload in [
            "ID:P1;LOT:L1;EXP:2025",
            "ID:P1;LOT:L1;EXP:2025;NOTE:;ID:P2",
            "ID:P1;LOT:L1;EXP:2025;NOTE:;COLOR:red",
            "just some text",
            r"ID:P1;LOT:L1;EXP:x;NOTE:\",
            r#"{"product_id": "P1"}"#,
            "{not json",
        ] {
            assert!(
                matches!(ProductRecord::from_payload(payload), Err(BarcodeError::Decode(_))),
                "accepted {payload:?}"
            );
        }
    }

    #[test]
    fn test_field_order_is_free() {
        let record = ProductRecord::from_payload("NOTE:n;EXP:e;LOT:l;ID:i").unwrap();
        assert_eq!(record, ProductRecord::new("i", "l", "e", "n"));
    }
}
