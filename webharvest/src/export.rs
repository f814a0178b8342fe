//! Dataset serialization: CSV, Excel (SpreadsheetML 2003), and JSON.
//!
//! All exports are deterministic: columns in rule-declaration order,
//! missing values as empty string (CSV/Excel) or `null` (JSON), invalid
//! values as their retained raw string. Export never mutates the dataset
//! and may be called repeatedly.

use chrono::Utc;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::config::ExportFormat;
use crate::dataset::Dataset;
use crate::errors::HarvestError;
use crate::model::FieldValue;

impl Dataset {
    /// Serializes to RFC 4180 CSV with a header row.
    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        write_csv_row(&mut out, self.schema().iter().map(String::as_str));
        for record in self.records() {
            let cells: Vec<String> = self
                .schema()
                .iter()
                .map(|field| record.field_string(field))
                .collect();
            write_csv_row(&mut out, cells.iter().map(String::as_str));
        }
        out
    }

    /// Serializes to a SpreadsheetML 2003 XML workbook.
    ///
    /// Plain XML, one worksheet; opens in Excel and LibreOffice without a
    /// binary container. Numeric fields export as Number cells.
    #[must_use]
    pub fn to_excel(&self) -> String {
        let mut out = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <Workbook xmlns=\"urn:schemas-microsoft-com:office:spreadsheet\"\n \
             xmlns:ss=\"urn:schemas-microsoft-com:office:spreadsheet\">\n \
             <Worksheet ss:Name=\"records\">\n  <Table>\n",
        );

        out.push_str("   <Row>");
        for field in self.schema() {
            let _ = write!(
                out,
                "<Cell><Data ss:Type=\"String\">{}</Data></Cell>",
                xml_escape(field)
            );
        }
        out.push_str("</Row>\n");

        for record in self.records() {
            out.push_str("   <Row>");
            for field in self.schema() {
                match record.get(field) {
                    Some(FieldValue::Number(n)) => {
                        let _ = write!(out, "<Cell><Data ss:Type=\"Number\">{n}</Data></Cell>");
                    }
                    value => {
                        let text = value.map_or_else(String::new, FieldValue::export_string);
                        let _ = write!(
                            out,
                            "<Cell><Data ss:Type=\"String\">{}</Data></Cell>",
                            xml_escape(&text)
                        );
                    }
                }
            }
            out.push_str("</Row>\n");
        }

        out.push_str("  </Table>\n </Worksheet>\n</Workbook>\n");
        out
    }

    /// Serializes to a JSON array of objects with keys in schema order.
    ///
    /// # Errors
    ///
    /// Returns `HarvestError::Serialization` if encoding fails.
    pub fn to_json(&self) -> Result<String, HarvestError> {
        let rows: Vec<serde_json::Map<String, serde_json::Value>> = self
            .records()
            .iter()
            .map(|record| {
                self.schema()
                    .iter()
                    .map(|field| {
                        let value = record
                            .get(field)
                            .map_or(serde_json::Value::Null, FieldValue::json_value);
                        (field.clone(), value)
                    })
                    .collect()
            })
            .collect();
        Ok(serde_json::to_string_pretty(&rows)?)
    }

    /// Serializes to the chosen format.
    ///
    /// # Errors
    ///
    /// Returns `HarvestError::Serialization` if JSON encoding fails.
    pub fn serialize(&self, format: ExportFormat) -> Result<String, HarvestError> {
        match format {
            ExportFormat::Csv => Ok(self.to_csv()),
            ExportFormat::Excel => Ok(self.to_excel()),
            ExportFormat::Json => self.to_json(),
        }
    }

    /// Writes the chosen serialization to a caller-specified path, creating
    /// parent directories.
    ///
    /// # Errors
    ///
    /// Returns `HarvestError::Io` on filesystem failure and
    /// `HarvestError::Serialization` on encoding failure.
    pub fn write_to_path(&self, path: &Path, format: ExportFormat) -> Result<(), HarvestError> {
        let payload = self.serialize(format)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, payload)?;
        Ok(())
    }
}

fn write_csv_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
    let mut first = true;
    for cell in cells {
        if !first {
            out.push(',');
        }
        first = false;
        if needs_quotes(cell) {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(cell);
        }
    }
    out.push('\n');
}

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Derives a collision-free export filename by inserting a UTC timestamp
/// before the extension (`<stem>_<YYYYmmdd_HHMMSS>.<ext>`).
#[must_use]
pub fn timestamped_path(path: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("export");
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}_{stamp}.{ext}"),
        None => format!("{stem}_{stamp}"),
    };
    path.with_file_name(name)
}
