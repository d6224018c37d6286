//! NDJSON wire formats shared by `dump` and `push`.
//!
//! The dump side writes one Prometheus `SampleStream` per line (the "legacy"
//! shape, `[[<unix seconds>, "<value>"], ..]`). The push side accepts that
//! shape, the columnar import shape, or a whole query-response envelope, and
//! normalizes all of them to [`CanonicalRecord`] before anything is queued.

use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::error::{PromError, PromResult, RecordError};
use crate::http::SampleStream;

/// One series in the VictoriaMetrics `/api/v1/import` line format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    pub values: Vec<f64>,
    pub timestamps: Vec<i64>,
}

impl CanonicalRecord {
    /// Renders the record back into the legacy pair shape.
    pub fn to_legacy(&self) -> SampleStream {
        SampleStream {
            metric: self.metric.clone(),
            values: self
                .timestamps
                .iter()
                .zip(&self.values)
                .map(|(ts, value)| (*ts as f64 / 1000.0, format_sample_value(*value)))
                .collect(),
        }
    }

    fn validate(self) -> PromResult<Self> {
        if self.timestamps.len() != self.values.len() {
            return Err(PromError::decode(
                "columnar record",
                format!(
                    "{} timestamps but {} values",
                    self.timestamps.len(),
                    self.values.len()
                ),
            ));
        }
        check_values(&self.values)?;
        if self.timestamps.is_empty() {
            return Err(RecordError::ZeroTimestamp.into());
        }
        Ok(self)
    }
}

/// Every line shape `push` understands. The columnar form is tried first since
/// only it carries a `timestamps` array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireRecord {
    Columnar(CanonicalRecord),
    Legacy(SampleStream),
}

/// A full `/api/v1/query_range` response saved to disk, as exported by
/// managed Prometheus services.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub status: String,
    pub data: QueryResponseData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponseData {
    pub result_type: String,
    #[serde(default)]
    pub result: Vec<SampleStream>,
}

impl QueryResponse {
    pub fn parse(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn into_matrix(self) -> PromResult<Vec<SampleStream>> {
        if self.status != "success" {
            return Err(PromError::decode(
                "query response",
                format!("unexpected query response status in the file: {}", self.status),
            ));
        }
        if self.data.result_type != "matrix" {
            return Err(PromError::decode(
                "query response",
                format!(
                    "expect `matrix` result type, got: `{}`",
                    self.data.result_type
                ),
            ));
        }
        Ok(self.data.result)
    }
}

/// Writes each series as one JSON line.
pub fn write_series<W: Write>(out: &mut W, series: &[SampleStream]) -> io::Result<()> {
    for stream in series {
        serde_json::to_writer(&mut *out, stream)?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

/// Appends one canonical record plus trailing newline to an import body.
pub fn encode_canonical(buf: &mut Vec<u8>, record: &CanonicalRecord) -> serde_json::Result<()> {
    serde_json::to_writer(&mut *buf, record)?;
    buf.push(b'\n');
    Ok(())
}

/// Decodes one NDJSON line in either supported shape.
pub fn decode_line(line: &[u8]) -> PromResult<CanonicalRecord> {
    match serde_json::from_slice::<WireRecord>(line) {
        Ok(WireRecord::Columnar(record)) => record.validate(),
        Ok(WireRecord::Legacy(stream)) => normalize(stream),
        Err(_) => {
            // Untagged errors are opaque; re-parse as the common shape to
            // report what was actually wrong with the line.
            let message = match serde_json::from_slice::<SampleStream>(line) {
                Err(err) => err.to_string(),
                Ok(_) => "unrecognized record shape".to_string(),
            };
            Err(PromError::decode("line", message))
        }
    }
}

/// Converts a legacy series to canonical form, rejecting non-finite values
/// and empty series.
pub fn normalize(stream: SampleStream) -> PromResult<CanonicalRecord> {
    let mut timestamps = Vec::with_capacity(stream.values.len());
    let mut values = Vec::with_capacity(stream.values.len());
    for (ts, raw) in &stream.values {
        let value = parse_sample_value(raw)?;
        check_values(&[value])?;
        timestamps.push((ts * 1000.0).round() as i64);
        values.push(value);
    }
    if timestamps.is_empty() {
        return Err(RecordError::ZeroTimestamp.into());
    }
    Ok(CanonicalRecord {
        metric: stream.metric,
        values,
        timestamps,
    })
}

fn check_values(values: &[f64]) -> Result<(), RecordError> {
    for value in values {
        if value.is_infinite() {
            return Err(RecordError::InfValues);
        }
        if value.is_nan() {
            return Err(RecordError::NaNValues);
        }
    }
    Ok(())
}

/// Parses a sample value, accepting the `+Inf`/`-Inf`/`NaN` spellings
/// Prometheus emits.
pub fn parse_sample_value(raw: &str) -> PromResult<f64> {
    match raw {
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        other => other.parse::<f64>().map_err(|err| {
            PromError::decode("sample value", format!("failed to parse value {other:?}: {err}"))
        }),
    }
}

fn format_sample_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

/// Shortens a line for log output.
pub fn truncate_for_log(line: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(line);
    if text.chars().count() <= limit {
        return text.into_owned();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("...");
    out
}
