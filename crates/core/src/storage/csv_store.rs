use crate::domain::quote::QuoteRecord;
use anyhow::Context;
use std::path::Path;

/// One data row read back from a quotes CSV. Values are the raw cell text;
/// numerics come back string-typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRow {
    pub index: usize,
    pub fields: Vec<(String, String)>,
}

impl CsvRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == column)
            .map(|(_, v)| v.as_str())
    }
}

/// Writes `records` with a leading unnamed index column, replacing any
/// existing file. Columns are the union of record fields in first-seen order.
pub fn write_quotes_csv(path: &Path, records: &[QuoteRecord]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let mut columns: Vec<&str> = Vec::new();
    for record in records {
        for name in record.field_names() {
            if !columns.contains(&name) {
                columns.push(name);
            }
        }
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to open {} for writing", path.display()))?;

    let mut header = Vec::with_capacity(columns.len() + 1);
    header.push("");
    header.extend(columns.iter().copied());
    writer
        .write_record(&header)
        .context("failed to write CSV header")?;

    for (idx, record) in records.iter().enumerate() {
        let mut row = Vec::with_capacity(columns.len() + 1);
        row.push(idx.to_string());
        for column in &columns {
            row.push(record.get(column).map(|v| v.to_string()).unwrap_or_default());
        }
        writer
            .write_record(&row)
            .with_context(|| format!("failed to write CSV row {idx}"))?;
    }

    writer.flush().context("failed to flush CSV writer")?;
    tracing::info!(path = %path.display(), rows = records.len(), columns = columns.len(), "quotes written to CSV");
    Ok(())
}

pub fn read_quotes_csv(path: &Path) -> anyhow::Result<Vec<CsvRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("failed to read CSV header from {}", path.display()))?
        .clone();
    let has_index = headers.get(0) == Some("");
    let skip = usize::from(has_index);

    let mut out = Vec::new();
    for (pos, result) in reader.records().enumerate() {
        let record =
            result.with_context(|| format!("malformed CSV row {pos} in {}", path.display()))?;

        let index = if has_index {
            record
                .get(0)
                .and_then(|s| s.trim().parse::<usize>().ok())
                .unwrap_or(pos)
        } else {
            pos
        };

        let fields = headers
            .iter()
            .zip(record.iter())
            .skip(skip)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        out.push(CsvRow { index, fields });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::normalize::normalize;
    use crate::domain::quote::FieldValue;
    use serde_json::json;

    fn sample_quote() -> QuoteRecord {
        let v = json!({
            "symbol": "AAPL",
            "name": "Apple Inc.",
            "price": 189.84,
            "changesPercentage": -0.1732,
            "marketCap": 2_952_000_000_000_i64,
            "exchange": "NASDAQ",
            "volume": 54_000_000,
            "eps": 6.13,
            "pe": null,
            "earningsAnnouncement": "2024-01-25T21:00:00.000+0000",
            "timestamp": 1_705_700_000
        });
        let serde_json::Value::Object(obj) = v else { unreachable!() };
        normalize(&QuoteRecord::from_json_object(obj)).unwrap()
    }

    #[test]
    fn writes_header_with_unnamed_index_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quote.csv");
        write_quotes_csv(&path, &[sample_quote()]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with(",symbol,name,price,"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("0,AAPL,Apple Inc.,189.84,"));
        assert!(row.contains("2024-01-25 21:00:00+00:00"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn round_trip_keeps_field_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("quote.csv");
        let quote = sample_quote();
        write_quotes_csv(&path, &[quote.clone()]).unwrap();

        let rows = read_quotes_csv(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].index, 0);
        assert_eq!(rows[0].fields.len(), quote.len());
        for (name, value) in quote.iter() {
            assert_eq!(rows[0].get(name), Some(value.to_string().as_str()), "field {name}");
        }
        assert_eq!(rows[0].get("pe"), Some(""));
    }

    #[test]
    fn overwrites_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quote.csv");
        write_quotes_csv(&path, &[sample_quote(), sample_quote()]).unwrap();

        let msft: QuoteRecord = [("symbol", FieldValue::Text("MSFT".into()))]
            .into_iter()
            .collect();
        write_quotes_csv(&path, &[msft]).unwrap();

        let rows = read_quotes_csv(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields, vec![("symbol".to_string(), "MSFT".to_string())]);
    }

    #[test]
    fn union_of_columns_across_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quote.csv");
        let a: QuoteRecord = [("symbol", FieldValue::Text("A".into())), ("price", FieldValue::Int(1))]
            .into_iter()
            .collect();
        let b: QuoteRecord = [("symbol", FieldValue::Text("B".into())), ("name", FieldValue::Text("Bee, Inc.".into()))]
            .into_iter()
            .collect();
        write_quotes_csv(&path, &[a, b]).unwrap();

        let rows = read_quotes_csv(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name"), Some(""));
        assert_eq!(rows[1].index, 1);
        assert_eq!(rows[1].get("price"), Some(""));
        assert_eq!(rows[1].get("name"), Some("Bee, Inc."));
    }
}
