//! Decoding of the comma-separated list and legend files.
//!
//! Quoted fields may contain commas, doubled quotes and line breaks. Blank lines are
//! ignored and a leading byte-order mark is dropped.

use chrono::{DateTime, NaiveDate};

use crate::{CoreError, NewCategory, SnapshotRow, COUNTRY_ROW_COLUMNS, LEGEND_ROW_COLUMNS};

/// A raw record together with the line it starts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRecord {
    pub line: usize,
    pub fields: Vec<String>,
}

pub fn parse_records(text: &str) -> Result<Vec<CsvRecord>, CoreError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut dirty = false;
    let mut line = 1usize;
    let mut record_line = 1usize;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' => {
                in_quotes = true;
                dirty = true;
            }
            ',' => {
                fields.push(std::mem::take(&mut field));
                dirty = true;
            }
            '\r' if matches!(chars.peek(), Some(&'\n') | None) => {}
            '\n' => {
                if dirty {
                    fields.push(std::mem::take(&mut field));
                    records.push(CsvRecord {
                        line: record_line,
                        fields: std::mem::take(&mut fields),
                    });
                }
                dirty = false;
                line += 1;
                record_line = line;
            }
            _ => {
                field.push(c);
                dirty = true;
            }
        }
    }

    if in_quotes {
        return Err(CoreError::UnterminatedQuote { line: record_line });
    }
    if dirty {
        fields.push(field);
        records.push(CsvRecord {
            line: record_line,
            fields,
        });
    }
    Ok(records)
}

/// Decode a per-country list: `url, category_code, category_description, date_added, source, notes`.
///
/// The header row is skipped. A row with the wrong number of columns or an unreadable
/// date fails the whole file.
pub fn parse_country_rows(text: &str) -> Result<Vec<SnapshotRow>, CoreError> {
    parse_records(text)?
        .into_iter()
        .skip(1)
        .map(|record| {
            let line = record.line;
            let [url, category_code, _description, date_added, source, notes] =
                <[String; COUNTRY_ROW_COLUMNS]>::try_from(record.fields).map_err(|fields| {
                    CoreError::MalformedRow {
                        line,
                        expected: COUNTRY_ROW_COLUMNS,
                        found: fields.len(),
                    }
                })?;
            let date_added = parse_date_added(&date_added).ok_or_else(|| CoreError::InvalidDate {
                line,
                value: date_added.clone(),
            })?;
            Ok(SnapshotRow {
                line,
                url,
                category_code,
                date_added,
                source,
                notes,
            })
        })
        .collect()
}

/// Decode the category legend: `description, code, old_codes, long_description`.
pub fn parse_legend(text: &str) -> Result<Vec<NewCategory>, CoreError> {
    parse_records(text)?
        .into_iter()
        .skip(1)
        .map(|record| {
            let line = record.line;
            let [description, code, old_codes, long_description] =
                <[String; LEGEND_ROW_COLUMNS]>::try_from(record.fields).map_err(|fields| {
                    CoreError::MalformedRow {
                        line,
                        expected: LEGEND_ROW_COLUMNS,
                        found: fields.len(),
                    }
                })?;
            let long_description = long_description.trim();
            Ok(NewCategory {
                code: code.trim().to_string(),
                description: description.trim().to_string(),
                long_description: (!long_description.is_empty())
                    .then(|| long_description.to_string()),
                old_codes: old_codes.split_whitespace().map(str::to_string).collect(),
            })
        })
        .collect()
}

fn parse_date_added(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|ts| ts.date_naive()))
}
