//! Table normalization: from an arbitrary uploaded table to the exact
//! matrix the model was trained on.
//!
//! Steps run in a fixed order: drop governance columns, drop the label,
//! keep numeric columns, check the contract, reorder to contract order,
//! replace infinities and fill missing values, then optionally standardize.
//! The result is all or nothing.

use crate::config::NormalizationConfig;
use crate::contract::FeatureContract;
use crate::error::{PipelineError, PipelineResult};
use crate::table::RawTable;
use ndarray::{Array2, ArrayViewMut1, Axis};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Cell values read as missing (pandas' default NA markers)
const MISSING_MARKERS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// Numeric matrix in contract column order
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMatrix {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl NormalizedMatrix {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    /// Row-major copy for serialization
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.values.rows().into_iter().map(|r| r.to_vec()).collect()
    }
}

/// Which columns were seen, dropped, detected and used
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Diagnostics {
    pub original_columns: Vec<String>,
    pub dropped_columns: Vec<String>,
    pub numeric_columns_detected: Vec<String>,
    pub used_columns: Vec<String>,
}

/// Output of a successful normalization
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub matrix: NormalizedMatrix,
    pub diagnostics: Diagnostics,
}

/// Applies the drop rules, contract projection and value sanitizing
#[derive(Debug, Clone)]
pub struct TableNormalizer {
    drop_columns: Vec<String>,
    label_column: String,
    standardize: bool,
}

impl TableNormalizer {
    pub fn new(drop_columns: Vec<String>, label_column: impl Into<String>) -> Self {
        Self {
            drop_columns,
            label_column: label_column.into(),
            standardize: false,
        }
    }

    pub fn from_config(config: &NormalizationConfig) -> Self {
        Self::new(config.drop_columns.clone(), config.label_column.clone())
            .with_standardize(config.standardize)
    }

    /// Standardize every feature on the request's own rows as the last step
    pub fn with_standardize(mut self, standardize: bool) -> Self {
        self.standardize = standardize;
        self
    }

    /// Normalize `table` to `contract`.
    ///
    /// With `fill_missing` false the model owns imputation: infinities still
    /// become NaN but are left in place.
    pub fn normalize(
        &self,
        table: &RawTable,
        contract: &FeatureContract,
        fill_missing: bool,
    ) -> PipelineResult<Normalized> {
        if table.n_rows() == 0 {
            return Err(PipelineError::EmptyInput);
        }
        let original_columns = table.columns().to_vec();

        // 1-2. governance columns, then the label
        let mut dropped_columns: Vec<String> = self
            .drop_columns
            .iter()
            .filter(|c| table.column_index(c).is_some())
            .cloned()
            .collect();
        if table.column_index(&self.label_column).is_some()
            && !dropped_columns.contains(&self.label_column)
        {
            dropped_columns.push(self.label_column.clone());
        }

        // 3. numeric columns among the rest, in table order
        let mut numeric: HashMap<&str, Vec<f64>> = HashMap::new();
        let mut numeric_columns_detected = Vec::new();
        for (index, name) in original_columns.iter().enumerate() {
            if dropped_columns.contains(name) {
                continue;
            }
            if let Some(values) = parse_numeric_column(table.column_values(index)) {
                numeric.insert(name.as_str(), values);
                numeric_columns_detected.push(name.clone());
            }
        }

        // 4. every contract column must be numeric and present
        let missing: Vec<String> = contract
            .columns()
            .iter()
            .filter(|c| !numeric.contains_key(c.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            debug!(missing = ?missing, detected = ?numeric_columns_detected, "Contract columns missing");
            return Err(PipelineError::ColumnMismatch {
                missing,
                numeric_detected: numeric_columns_detected,
            });
        }

        // 5. project and permute into contract order
        let rows = table.n_rows();
        let mut values = Array2::<f64>::zeros((rows, contract.len()));
        for (j, name) in contract.columns().iter().enumerate() {
            let column = &numeric[name.as_str()];
            for (i, &v) in column.iter().enumerate() {
                values[[i, j]] = v;
            }
        }

        // 6. infinities are missing; fill with this request's medians
        values.mapv_inplace(|v| if v.is_infinite() { f64::NAN } else { v });
        if fill_missing {
            for (name, column) in contract.columns().iter().zip(values.axis_iter_mut(Axis(1))) {
                fill_with_median(name, column);
            }
        }

        // 7. optional standardization, fit on this request only
        if self.standardize {
            for column in values.axis_iter_mut(Axis(1)) {
                standardize_column(column);
            }
        }

        Ok(Normalized {
            matrix: NormalizedMatrix {
                columns: contract.columns().to_vec(),
                values,
            },
            diagnostics: Diagnostics {
                original_columns,
                dropped_columns,
                numeric_columns_detected,
                used_columns: contract.columns().to_vec(),
            },
        })
    }
}

/// Parse every cell as a number; `None` if any non-missing cell is not one
fn parse_numeric_column<'a>(cells: impl Iterator<Item = &'a str>) -> Option<Vec<f64>> {
    cells.map(parse_cell).collect()
}

fn parse_cell(cell: &str) -> Option<f64> {
    if MISSING_MARKERS.contains(&cell) {
        return Some(f64::NAN);
    }
    cell.parse::<f64>().ok()
}

/// Median of the finite values, `None` when there are none
pub fn median(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut finite: Vec<f64> = values.filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_by(f64::total_cmp);
    let mid = finite.len() / 2;
    if finite.len() % 2 == 0 {
        Some((finite[mid - 1] + finite[mid]) / 2.0)
    } else {
        Some(finite[mid])
    }
}

fn fill_with_median(name: &str, mut column: ArrayViewMut1<'_, f64>) {
    if column.iter().all(|v| v.is_finite()) {
        return;
    }
    let fill = median(column.iter().copied()).unwrap_or_else(|| {
        warn!(column = %name, "Column has no finite values, filling with 0");
        0.0
    });
    column.mapv_inplace(|v| if v.is_finite() { v } else { fill });
}

/// Zero mean, unit population variance; constant columns only get centered
fn standardize_column(mut column: ArrayViewMut1<'_, f64>) {
    let finite: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return;
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let variance = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    let scale = if std > 0.0 && std.is_finite() { std } else { 1.0 };
    column.mapv_inplace(|v| (v - mean) / scale);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableLoader;

    fn contract(cols: &[&str]) -> FeatureContract {
        FeatureContract::new(cols.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    fn koi_normalizer() -> TableNormalizer {
        TableNormalizer::from_config(&NormalizationConfig::default())
    }

    fn normalize(csv: &str, cols: &[&str]) -> PipelineResult<Normalized> {
        let table = TableLoader::default().load(csv.as_bytes())?;
        koi_normalizer().normalize(&table, &contract(cols), true)
    }

    #[test]
    fn test_label_and_text_columns() {
        let csv = "a,b,c,koi_disposition\n1,2,x,CONFIRMED\n3,4,y,FALSE POSITIVE\n";
        let result = normalize(csv, &["a", "b"]).unwrap();

        assert_eq!(result.matrix.values().dim(), (2, 2));
        assert_eq!(result.matrix.columns(), ["a", "b"]);
        assert_eq!(result.matrix.to_rows(), vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert!(result.diagnostics.dropped_columns.contains(&"koi_disposition".to_string()));
        assert_eq!(result.diagnostics.numeric_columns_detected, ["a", "b"]);
        assert_eq!(result.diagnostics.original_columns, ["a", "b", "c", "koi_disposition"]);
    }

    #[test]
    fn test_reorders_to_contract() {
        let csv = "kepid,z,y,x\n10,3,2,1\n11,6,5,4\n";
        let result = normalize(csv, &["x", "y", "z"]).unwrap();

        assert_eq!(result.matrix.columns(), ["x", "y", "z"]);
        assert_eq!(result.matrix.to_rows(), vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        assert_eq!(result.diagnostics.dropped_columns, ["kepid"]);
        assert_eq!(result.diagnostics.used_columns, ["x", "y", "z"]);
    }

    #[test]
    fn test_missing_contract_columns() {
        let csv = "a,c\n1,x\n";
        let err = normalize(csv, &["a", "b", "c"]).unwrap_err();

        match err {
            PipelineError::ColumnMismatch {
                missing,
                numeric_detected,
            } => {
                // c exists but is text, so it counts as missing
                assert_eq!(missing, ["b", "c"]);
                assert_eq!(numeric_detected, ["a"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_dropped_column_never_used() {
        // koi_score is numeric but governed, so it cannot satisfy the contract
        let csv = "koi_score,a\n0.9,1\n";
        let err = normalize(csv, &["a", "koi_score"]).unwrap_err();
        assert!(matches!(err, PipelineError::ColumnMismatch { ref missing, .. } if missing == &["koi_score"]));
    }

    #[test]
    fn test_infinity_filled_with_request_median() {
        let csv = "a,b\n1,10\nInfinity,20\n3,\n5,-inf\n";
        let result = normalize(csv, &["a", "b"]).unwrap();
        let rows = result.matrix.to_rows();

        // median of a over 1,3,5 is 3; median of b over 10,20 is 15
        assert_eq!(rows[1][0], 3.0);
        assert_eq!(rows[2][1], 15.0);
        assert_eq!(rows[3][1], 15.0);
        assert!(result.matrix.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_missing_markers_are_numeric() {
        let csv = "a,b\n1,NA\n2,null\n4,6\n";
        let result = normalize(csv, &["a", "b"]).unwrap();
        assert_eq!(result.diagnostics.numeric_columns_detected, ["a", "b"]);
        assert_eq!(result.matrix.values().column(1).to_vec(), vec![6.0, 6.0, 6.0]);
    }

    #[test]
    fn test_hash_marker_cell_filled_with_median() {
        let csv = "# exported 2024-03-01\na,b\n1,2\n#N/A,3\n4,5\n";
        let result = normalize(csv, &["a", "b"]).unwrap();

        assert_eq!(result.matrix.n_rows(), 3);
        assert_eq!(result.matrix.values().column(0).to_vec(), vec![1.0, 2.5, 4.0]);
        assert_eq!(result.matrix.values().column(1).to_vec(), vec![2.0, 3.0, 5.0]);
    }

    #[test]
    fn test_all_missing_column_filled_with_zero() {
        let csv = "a,b\n1,\n2,\n";
        let result = normalize(csv, &["a", "b"]).unwrap();
        assert_eq!(result.matrix.values().column(1).to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_model_owned_imputation_keeps_nan() {
        let table = TableLoader::default().load(b"a\n1\ninf\n").unwrap();
        let result = koi_normalizer()
            .normalize(&table, &contract(&["a"]), false)
            .unwrap();

        let column = result.matrix.values().column(0).to_vec();
        assert_eq!(column[0], 1.0);
        assert!(column[1].is_nan());
    }

    #[test]
    fn test_standardize() {
        let table = TableLoader::default().load(b"a,b\n1,5\n2,5\n3,5\n").unwrap();
        let result = koi_normalizer()
            .with_standardize(true)
            .normalize(&table, &contract(&["a", "b"]), true)
            .unwrap();

        let a = result.matrix.values().column(0).to_vec();
        let mean: f64 = a.iter().sum::<f64>() / 3.0;
        let var: f64 = a.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 3.0;
        assert!(mean.abs() < 1e-12);
        assert!((var - 1.0).abs() < 1e-12);
        // constant column is centered, not divided by zero
        assert_eq!(result.matrix.values().column(1).to_vec(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_idempotent() {
        let csv = "b,a,note\n1,,x\n2,7,y\ninf,8,z\n";
        let first = normalize(csv, &["a", "b"]).unwrap();
        let second = normalize(csv, &["a", "b"]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_median() {
        assert_eq!(median([3.0, 1.0, 2.0].into_iter()), Some(2.0));
        assert_eq!(median([4.0, 1.0, 2.0, 3.0].into_iter()), Some(2.5));
        assert_eq!(median([f64::NAN, 5.0].into_iter()), Some(5.0));
        assert_eq!(median([f64::NAN].into_iter()), None);
    }
}
