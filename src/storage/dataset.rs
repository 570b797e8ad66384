//! Base training set loader.
//!
//! Reads a headered CSV. One column holds the `0`/`1` label; every other
//! column becomes a feature. Numeric cells become numbers, `true`/`false`
//! become booleans, anything else is text. Empty cells are treated as absent.

use crate::models::{FeatureValue, Features};
use crate::training::{Dataset, LabeledRow};
use crate::{Error, Result};
use std::io::Read;
use std::path::Path;

/// Loads a CSV file into a [`Dataset`].
///
/// # Errors
///
/// Returns [`Error::StorageFailure`] if the file cannot be read, or
/// [`Error::InvalidInput`] if the label column is missing or holds a value
/// other than `0`/`1`.
pub fn load_csv(path: impl AsRef<Path>, label_column: &str) -> Result<Dataset> {
    let path = path.as_ref();
    let reader = csv::Reader::from_path(path)
        .map_err(|e| Error::storage("open_dataset", format!("{}: {e}", path.display())))?;
    let dataset = read_rows(reader, label_column)?;
    tracing::info!(
        path = %path.display(),
        rows = dataset.len(),
        positives = dataset.positives(),
        "Loaded base dataset"
    );
    Ok(dataset)
}

/// Loads CSV from any reader.
///
/// # Errors
///
/// Same as [`load_csv`].
pub fn load_csv_from<R: Read>(input: R, label_column: &str) -> Result<Dataset> {
    read_rows(csv::Reader::from_reader(input), label_column)
}

fn read_rows<R: Read>(mut reader: csv::Reader<R>, label_column: &str) -> Result<Dataset> {
    let headers = reader
        .headers()
        .map_err(|e| Error::storage("read_dataset_header", e))?
        .clone();
    let label_index = headers
        .iter()
        .position(|h| h.trim() == label_column)
        .ok_or_else(|| {
            Error::InvalidInput(format!("dataset has no label column '{label_column}'"))
        })?;

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| Error::storage("read_dataset_row", e))?;
        let mut features = Features::new();
        let mut label = None;
        for (i, (name, cell)) in headers.iter().zip(record.iter()).enumerate() {
            if i == label_index {
                label = Some(parse_label(cell, line + 2)?);
            } else if !cell.trim().is_empty() {
                features.insert(name.trim().to_string(), FeatureValue::parse_cell(cell));
            }
        }
        let label = label.ok_or_else(|| {
            Error::InvalidInput(format!("row {} has no label value", line + 2))
        })?;
        rows.push(LabeledRow { features, label });
    }

    Ok(Dataset::new(rows))
}

fn parse_label(cell: &str, line: usize) -> Result<u8> {
    match cell.trim().parse::<f64>() {
        Ok(v) if v == 0.0 => Ok(0),
        Ok(v) if (v - 1.0).abs() < f64::EPSILON => Ok(1),
        _ => Err(Error::InvalidInput(format!(
            "row {line}: label {cell:?} is not 0 or 1"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
Time,Amount,Gender,Online,Class
0,149.62,F,true,0
1,2.69,M,,0
2,378.66,F,false,1
";

    #[test]
    fn test_parses_cells_and_labels() {
        let dataset = load_csv_from(CSV.as_bytes(), "Class").expect("load");
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.positives(), 1);

        let first = &dataset.rows()[0].features;
        assert_eq!(first["Amount"], FeatureValue::Number(149.62));
        assert_eq!(first["Gender"], FeatureValue::Text("F".into()));
        assert_eq!(first["Online"], FeatureValue::Bool(true));
        assert!(!first.contains_key("Class"));

        assert!(!dataset.rows()[1].features.contains_key("Online"));
    }

    #[test]
    fn test_missing_label_column() {
        let result = load_csv_from(CSV.as_bytes(), "is_fraud");
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_non_binary_label() {
        let result = load_csv_from("Amount,Class\n1.0,2\n".as_bytes(), "Class");
        assert!(matches!(result, Err(Error::InvalidInput(msg)) if msg.contains("row 2")));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("creditcard.csv");
        std::fs::write(&path, CSV).expect("write");
        assert_eq!(load_csv(&path, "Class").expect("load").len(), 3);
    }

    #[test]
    fn test_missing_file_is_storage_failure() {
        let result = load_csv("/nonexistent/creditcard.csv", "Class");
        assert!(matches!(result, Err(Error::StorageFailure { .. })));
    }
}
