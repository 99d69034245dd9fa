//! CSV parsing: whole payloads in, one row payload per data row out.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use rill_core::error::{PayloadError, ProcessorError};
use rill_core::payload::{decode_tagged, encode_tagged, Payload, PayloadRef};
use rill_core::processor::{Processor, ProcessorBase};

use crate::{opt_int, opt_str, ProcessError};

pub const DEFAULT_DELIMITER: &str = ",";
pub const DEFAULT_HEADER_LENGTH: i64 = 1;
pub const DEFAULT_SKIP_ROWS: i64 = 0;

/// One parsed CSV row: an ordered column → cell mapping, serialized to
/// JSON bytes on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CsvRowPayload {
    source: String,
    row: IndexMap<String, String>,
}

impl CsvRowPayload {
    pub const KIND: &'static str = "csv_row";

    pub fn new(source: impl Into<String>, row: IndexMap<String, String>) -> Self {
        Self {
            source: source.into(),
            row,
        }
    }

    pub fn row(&self) -> &IndexMap<String, String> {
        &self.row
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        decode_tagged(Self::KIND, bytes)
    }
}

impl Payload for CsvRowPayload {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn bytes(&self) -> Bytes {
        // A string-to-string map always serializes.
        serde_json::to_vec(&self.row)
            .map(Bytes::from)
            .unwrap_or_default()
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn set_source(&mut self, source: String) {
        self.source = source;
    }

    fn set_bytes(&mut self, bytes: Bytes) -> Result<(), PayloadError> {
        self.row = serde_json::from_slice(&bytes)?;
        Ok(())
    }

    fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        encode_tagged(Self::KIND, self)
    }
}

/// Splits CSV payloads into rows keyed by a synthesized header.
///
/// Properties: `delimiter` (default `","`), `headerlength` (default 1,
/// headers spanning several rows are concatenated), `skiprows` (default 0,
/// rows dropped before the header starts).
pub struct ParseCsv {
    base: ProcessorBase,
}

impl ParseCsv {
    pub const KIND: &'static str = "parse_csv";

    pub fn new() -> Self {
        let mut base = ProcessorBase::new(Self::KIND);
        base.properties_mut()
            .add(
                "delimiter",
                "the character or string to use as a delimiter",
                false,
            )
            .add("headerlength", "how many rows the header spans", false)
            .add(
                "skiprows",
                "how many rows to skip in each payload before processing",
                false,
            );
        Self { base }
    }

    pub fn boxed() -> Box<dyn Processor> {
        Box::new(Self::new())
    }
}

impl Default for ParseCsv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for ParseCsv {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProcessorBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn start(&mut self, cancel: CancellationToken) -> Result<(), ProcessorError> {
        let props = self.base.properties();
        let delimiter = opt_str(props, "delimiter", DEFAULT_DELIMITER)?;
        let headerlength = opt_int(props, "headerlength", DEFAULT_HEADER_LENGTH)?.max(0) as usize;
        let skiprows = opt_int(props, "skiprows", DEFAULT_SKIP_ROWS)?.max(0) as usize;

        let mut ctx = self.base.begin_start(&cancel, true)?;
        let worker = tokio::spawn(async move {
            while let Some(payload) = ctx.next().await {
                let parsed = parse_rows(&payload.bytes(), &delimiter, headerlength, skiprows);
                match parsed {
                    Ok(rows) => {
                        for row in rows {
                            let out: PayloadRef =
                                Arc::new(CsvRowPayload::new(payload.source().to_string(), row));
                            if !ctx.emit(out).await {
                                return;
                            }
                        }
                    }
                    Err(err) => ctx.fail(err, Some(payload)),
                }
            }
        });
        self.base.finish_start(worker);
        Ok(())
    }
}

/// Parse one CSV payload into ordered row maps.
///
/// The first `headerlength` rows after `skiprows` compose the header. Any
/// post-skip row with one field or less is not CSV; a data row whose width
/// differs from the header is a mismatch.
fn parse_rows(
    input: &[u8],
    delimiter: &str,
    headerlength: usize,
    skiprows: usize,
) -> Result<Vec<IndexMap<String, String>>, ProcessError> {
    let text = String::from_utf8_lossy(input);
    let mut header: Vec<String> = Vec::new();
    let mut rows = Vec::new();

    for (index, line) in text.lines().enumerate() {
        if index < skiprows {
            continue;
        }
        let values: Vec<&str> = line.split(delimiter).collect();
        if values.len() <= 1 {
            return Err(ProcessError::NotCsv);
        }
        if index < skiprows + headerlength {
            header.extend(values.iter().map(|v| v.to_string()));
            continue;
        }
        if header.len() != values.len() {
            return Err(ProcessError::HeaderMismatch);
        }
        let row: IndexMap<String, String> = header
            .iter()
            .cloned()
            .zip(values.iter().map(|v| v.to_string()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_rows_after_header() {
        let rows = parse_rows(b"name,age\nalice,30\nbob,25", ",", 1, 0).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name").unwrap(), "alice");
        assert_eq!(rows[0].get("age").unwrap(), "30");
        assert_eq!(rows[1].get("name").unwrap(), "bob");
    }

    #[test]
    fn single_field_rows_are_not_csv() {
        assert!(matches!(
            parse_rows(b"justoneword\nanother", ",", 1, 0),
            Err(ProcessError::NotCsv)
        ));
    }

    #[test]
    fn diverging_width_is_a_header_mismatch() {
        assert!(matches!(
            parse_rows(b"a,b\n1,2,3", ",", 1, 0),
            Err(ProcessError::HeaderMismatch)
        ));
    }

    #[test]
    fn skiprows_and_multi_row_headers() {
        let input = b"skip me, really\na,b\nc,d\n1,2,3,4";
        let rows = parse_rows(input, ",", 2, 1).unwrap();
        assert_eq!(rows.len(), 1);
        let keys: Vec<_> = rows[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "b", "c", "d"]);
        assert_eq!(rows[0].get("d").unwrap(), "4");
    }

    #[test]
    fn custom_delimiter() {
        let rows = parse_rows(b"x;y\n1;2", ";", 1, 0).unwrap();
        assert_eq!(rows[0].get("y").unwrap(), "2");
    }

    #[test]
    fn row_payload_preserves_column_order() {
        let rows = parse_rows(b"name,age\nalice,30", ",", 1, 0).unwrap();
        let payload = CsvRowPayload::new("a.csv", rows[0].clone());
        assert_eq!(&payload.bytes()[..], br#"{"name":"alice","age":"30"}"#);
        assert_eq!(payload.len(), payload.bytes().len());
    }

    #[test]
    fn row_payload_wire_round_trip() {
        let rows = parse_rows(b"name,age\nalice,30", ",", 1, 0).unwrap();
        let payload = CsvRowPayload::new("a.csv", rows[0].clone());
        let wire = payload.encode().unwrap();
        let restored = CsvRowPayload::decode(&wire).unwrap();
        assert_eq!(payload, restored);
        assert_eq!(restored.source(), "a.csv");
    }
}
