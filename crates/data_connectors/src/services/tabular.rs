//! CSV and spreadsheet decoding into [`Table`].
//!
//! Bodies are decoded completely before a table is returned; any malformed
//! record fails the whole read.

use crate::error::{ConnectorError, ConnectorResult};
use crate::models::{Row, SheetSelector, Table, TabularFormat, TabularOptions};

use calamine::{Data, DataType, Reader};
use csv::ReaderBuilder;
use serde_json::Value as JsonValue;
use std::io::Cursor;

/// Decode a body in the requested format.
pub fn parse(
    format: TabularFormat,
    body: Vec<u8>,
    options: &TabularOptions,
) -> ConnectorResult<Table> {
    match format {
        TabularFormat::Csv => parse_csv(&body, options),
        TabularFormat::Spreadsheet => parse_spreadsheet(body, options),
    }
}

/// Decode delimited text.
pub fn parse_csv(body: &[u8], options: &TabularOptions) -> ConnectorResult<Table> {
    let delimiter = single_byte(options.delimiter, "delimiter")?;
    let quote = single_byte(options.quote, "quote")?;

    // Flexible so that skipped preamble rows do not fix the record width
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .quote(quote)
        .flexible(true)
        .from_reader(body);

    let mut records = reader.records().skip(options.skip_rows);

    let columns = match (options.has_headers, records.next()) {
        (true, Some(header)) => header_names(header?.iter()),
        (true, None) => return Err(ConnectorError::parse("No columns to parse from CSV body")),
        (false, Some(first)) => {
            let first = first?;
            let columns = positional_names(first.len());
            let mut rows = vec![first.iter().map(|f| text_cell(f, options)).collect::<Row>()];
            return finish_headerless(columns, &mut rows, records, options)
                .map(|columns| Table::new(columns, rows));
        }
        (false, None) => Vec::new(),
    };

    let mut rows: Vec<Row> = Vec::new();
    for (line, record) in records.enumerate() {
        if options.max_rows.is_some_and(|max| rows.len() >= max) {
            break;
        }
        let record = record?;
        if record.len() > columns.len() {
            return Err(ConnectorError::parse(format!(
                "Expected {} fields in data row {}, saw {}",
                columns.len(),
                line + 1,
                record.len()
            )));
        }
        let mut row: Row = record.iter().map(|f| text_cell(f, options)).collect();
        row.resize(columns.len(), JsonValue::Null);
        rows.push(row);
    }

    Ok(Table::new(columns, rows))
}

/// Read the remaining headerless records, widening columns as needed.
fn finish_headerless<I>(
    mut columns: Vec<String>,
    rows: &mut Vec<Row>,
    records: I,
    options: &TabularOptions,
) -> ConnectorResult<Vec<String>>
where
    I: Iterator<Item = Result<csv::StringRecord, csv::Error>>,
{
    for record in records {
        if options.max_rows.is_some_and(|max| rows.len() >= max) {
            break;
        }
        let record = record?;
        if record.len() > columns.len() {
            columns = positional_names(record.len());
        }
        rows.push(record.iter().map(|f| text_cell(f, options)).collect());
    }
    if let Some(max) = options.max_rows {
        rows.truncate(max);
    }
    for row in rows.iter_mut() {
        row.resize(columns.len(), JsonValue::Null);
    }
    Ok(columns)
}

/// Decode an Excel or OpenDocument workbook.
pub fn parse_spreadsheet(body: Vec<u8>, options: &TabularOptions) -> ConnectorResult<Table> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(body))?;
    let sheet_names = workbook.sheet_names();

    let sheet = match &options.sheet {
        SheetSelector::Index(idx) => sheet_names.get(*idx).cloned().ok_or_else(|| {
            ConnectorError::not_found(format!(
                "Worksheet index {idx} out of range ({} sheets)",
                sheet_names.len()
            ))
        })?,
        SheetSelector::Name(name) => {
            if !sheet_names.contains(name) {
                return Err(ConnectorError::not_found(format!(
                    "Worksheet '{name}' not found (available: {})",
                    sheet_names.join(", ")
                )));
            }
            name.clone()
        }
    };

    let range = workbook.worksheet_range(&sheet)?;
    let mut cells = range.rows().skip(options.skip_rows);

    let columns = if options.has_headers {
        match cells.next() {
            Some(header) => header_names(header.iter().map(|c| c.to_string())),
            None => return Err(ConnectorError::parse(format!("Worksheet '{sheet}' is empty"))),
        }
    } else {
        positional_names(range.width())
    };

    let limit = options.max_rows.unwrap_or(usize::MAX);
    let rows: Vec<Row> = cells
        .take(limit)
        .map(|row| {
            let mut out: Row = row.iter().map(|c| data_cell(c, options)).collect();
            out.resize(columns.len(), JsonValue::Null);
            out
        })
        .collect();

    tracing::debug!(
        sheet = %sheet,
        rows = rows.len(),
        columns = columns.len(),
        "Decoded worksheet"
    );
    Ok(Table::new(columns, rows))
}

fn single_byte(c: char, what: &str) -> ConnectorResult<u8> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        Err(ConnectorError::invalid_argument(
            format!("CSV {what} must be a single ASCII character, got '{c}'"),
            None,
        ))
    }
}

/// Column names from a header row; blanks become `Unnamed: <idx>`.
fn header_names<S: AsRef<str>>(fields: impl Iterator<Item = S>) -> Vec<String> {
    fields
        .enumerate()
        .map(|(idx, name)| {
            let name = name.as_ref().trim();
            if name.is_empty() {
                format!("Unnamed: {idx}")
            } else {
                name.to_string()
            }
        })
        .collect()
}

fn positional_names(width: usize) -> Vec<String> {
    (0..width).map(|i| i.to_string()).collect()
}

fn text_cell(text: &str, options: &TabularOptions) -> JsonValue {
    if options.is_null(text) {
        return JsonValue::Null;
    }
    if !options.infer_types {
        return JsonValue::String(text.to_string());
    }
    infer_value(text)
}

/// Typed value for numeric or boolean text, else the text itself.
fn infer_value(text: &str) -> JsonValue {
    let trimmed = text.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return JsonValue::Number(v.into());
    }
    if let Ok(v) = trimmed.parse::<f64>() {
        if v.is_finite() {
            if let Some(n) = serde_json::Number::from_f64(v) {
                return JsonValue::Number(n);
            }
        }
    }
    match trimmed {
        "true" | "True" | "TRUE" => JsonValue::Bool(true),
        "false" | "False" | "FALSE" => JsonValue::Bool(false),
        _ => JsonValue::String(text.to_string()),
    }
}

fn data_cell(cell: &Data, options: &TabularOptions) -> JsonValue {
    match cell {
        Data::Empty | Data::Error(_) => JsonValue::Null,
        Data::Int(v) => JsonValue::Number((*v).into()),
        // Workbooks store every number as a float
        Data::Float(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
            JsonValue::Number((*v as i64).into())
        }
        Data::Float(v) => {
            serde_json::Number::from_f64(*v).map(JsonValue::Number).unwrap_or(JsonValue::Null)
        }
        Data::Bool(v) => JsonValue::Bool(*v),
        Data::String(s) if options.is_null(s) => JsonValue::Null,
        Data::String(s) => JsonValue::String(s.clone()),
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_datetime()
            .map(|dt| JsonValue::String(dt.to_string()))
            .unwrap_or_else(|| JsonValue::String(cell.to_string())),
        other => JsonValue::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_csv_with_header_and_inference() {
        let body = b"id,name,score,active\n1,alpha,2.5,true\n2,,NULL,false\n";
        let table = parse_csv(body, &TabularOptions::default()).unwrap();

        assert_eq!(table.column_names(), vec!["id", "name", "score", "active"]);
        assert_eq!(table.rows[0], vec![json!(1), json!("alpha"), json!(2.5), json!(true)]);
        assert_eq!(table.rows[1], vec![json!(2), JsonValue::Null, JsonValue::Null, json!(false)]);
    }

    #[test]
    fn test_csv_options_passthrough() {
        let body = b"exported by etl\nid|code\n1|007\n2|008\n3|009\n";
        let options = TabularOptions::default()
            .with_delimiter('|')
            .with_skip_rows(1)
            .with_max_rows(2)
            .without_type_inference();
        let table = parse_csv(body, &options).unwrap();

        assert_eq!(table.column_names(), vec!["id", "code"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.cell(0, "code"), Some(&json!("007")));
    }

    #[test]
    fn test_csv_headerless_uses_positions() {
        let body = b"a,1\nb,2,extra\n";
        let table = parse_csv(body, &TabularOptions::default().with_headers(false)).unwrap();

        assert_eq!(table.column_names(), vec!["0", "1", "2"]);
        assert_eq!(table.rows[0], vec![json!("a"), json!(1), JsonValue::Null]);
        assert_eq!(table.rows[1][2], json!("extra"));
    }

    #[test]
    fn test_csv_short_rows_are_padded() {
        let table = parse_csv(b"a,b,c\n1,2\n", &TabularOptions::default()).unwrap();
        assert_eq!(table.rows[0], vec![json!(1), json!(2), JsonValue::Null]);
    }

    #[test]
    fn test_csv_rejects_wide_rows() {
        let err = parse_csv(b"a,b\n1,2\n1,2,3\n", &TabularOptions::default()).unwrap_err();
        assert_eq!(err.category(), "Parse");
    }

    #[test]
    fn test_csv_rejects_invalid_utf8() {
        let body = [b'a', b',', b'b', b'\n', 0xff, 0xfe, b',', 0x80, b'\n'];
        let err = parse_csv(&body, &TabularOptions::default()).unwrap_err();
        assert_eq!(err.category(), "Parse");
    }

    #[test]
    fn test_csv_empty_body_is_parse_error() {
        let err = parse_csv(b"", &TabularOptions::default()).unwrap_err();
        assert_eq!(err.category(), "Parse");
    }

    #[test]
    fn test_non_ascii_delimiter_is_invalid_argument() {
        let options = TabularOptions::default().with_delimiter('§');
        assert!(parse_csv(b"a", &options).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_corrupt_spreadsheet_is_parse_error() {
        let err = parse(
            TabularFormat::Spreadsheet,
            b"definitely not a workbook".to_vec(),
            &TabularOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.category(), "Parse");
    }

    /// Two sheets: "Summary" first, then "Q3" with a preamble row, a header
    /// row and three dated records.
    fn quarterly_workbook() -> Vec<u8> {
        use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};

        let mut workbook = Workbook::new();
        let date_format = Format::new().set_num_format("yyyy-mm-dd");

        let summary = workbook.add_worksheet().set_name("Summary").unwrap();
        summary.write_string(0, 0, "total").unwrap();
        summary.write_number(1, 0, 42).unwrap();

        let q3 = workbook.add_worksheet().set_name("Q3").unwrap();
        q3.write_string(0, 0, "exported by etl").unwrap();
        for (col, name) in ["id", "name", "signed_on"].into_iter().enumerate() {
            q3.write_string(1, col as u16, name).unwrap();
        }
        for (idx, (name, day)) in [("ann", 1), ("bob", 15), ("NULL", 30)].into_iter().enumerate() {
            let row = idx as u32 + 2;
            let date = ExcelDateTime::from_ymd(2024, 7, day).unwrap();
            q3.write_number(row, 0, idx as f64 + 1.0).unwrap();
            q3.write_string(row, 1, name).unwrap();
            q3.write_datetime_with_format(row, 2, &date, &date_format).unwrap();
        }

        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn test_spreadsheet_sheet_by_name() {
        let options = TabularOptions::default().with_sheet_name("Q3").with_skip_rows(1);
        let table = parse_spreadsheet(quarterly_workbook(), &options).unwrap();

        assert_eq!(table.column_names(), vec!["id", "name", "signed_on"]);
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.rows[0], vec![json!(1), json!("ann"), json!("2024-07-01 00:00:00")]);
        assert_eq!(table.cell(1, "signed_on"), Some(&json!("2024-07-15 00:00:00")));
        assert!(table.cell(2, "name").unwrap().is_null());
    }

    #[test]
    fn test_spreadsheet_sheet_by_index() {
        let table = parse_spreadsheet(quarterly_workbook(), &TabularOptions::default()).unwrap();
        assert_eq!(table.column_names(), vec!["total"]);
        assert_eq!(table.rows, vec![vec![json!(42)]]);

        let options = TabularOptions::default().with_sheet_index(1).with_skip_rows(1);
        let table = parse_spreadsheet(quarterly_workbook(), &options).unwrap();
        assert_eq!(table.column_names(), vec!["id", "name", "signed_on"]);
    }

    #[test]
    fn test_spreadsheet_row_limits_and_headerless() {
        let options =
            TabularOptions::default().with_sheet_name("Q3").with_skip_rows(1).with_max_rows(2);
        let table = parse_spreadsheet(quarterly_workbook(), &options).unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.cell(1, "name"), Some(&json!("bob")));

        let options = TabularOptions::default()
            .with_sheet_name("Q3")
            .with_headers(false)
            .with_skip_rows(2);
        let table = parse_spreadsheet(quarterly_workbook(), &options).unwrap();
        assert_eq!(table.column_names(), vec!["0", "1", "2"]);
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.rows[0][1], json!("ann"));
    }

    #[test]
    fn test_spreadsheet_missing_sheet_is_not_found() {
        let options = TabularOptions::default().with_sheet_name("Q4");
        assert!(parse_spreadsheet(quarterly_workbook(), &options).unwrap_err().is_not_found());

        let options = TabularOptions::default().with_sheet_index(5);
        assert!(parse_spreadsheet(quarterly_workbook(), &options).unwrap_err().is_not_found());
    }

    #[test]
    fn test_infer_value() {
        assert_eq!(infer_value("42"), json!(42));
        assert_eq!(infer_value(" -3.5 "), json!(-3.5));
        assert_eq!(infer_value("inf"), json!("inf"));
        assert_eq!(infer_value("FALSE"), json!(false));
        assert_eq!(infer_value("2024-01-01"), json!("2024-01-01"));
    }

    #[test]
    fn test_data_cell_conversion() {
        let options = TabularOptions::default();
        assert_eq!(data_cell(&Data::Int(7), &options), json!(7));
        assert_eq!(data_cell(&Data::Float(1.5), &options), json!(1.5));
        assert_eq!(data_cell(&Data::Float(3.0), &options), json!(3));
        assert_eq!(data_cell(&Data::Bool(true), &options), json!(true));
        assert_eq!(data_cell(&Data::Empty, &options), JsonValue::Null);
        assert_eq!(data_cell(&Data::String("NULL".into()), &options), JsonValue::Null);
        assert_eq!(data_cell(&Data::String("x".into()), &options), json!("x"));
    }
}
