//! Labeled tabular input via polars
//!
//! Detectors operate on `ndarray` matrices; this module bridges labeled
//! frames to that interface. A `DataFrame` goes in, a polars `Series` of
//! i32 labels (1 = inlier, -1 = outlier) comes out, in the same row order.

use crate::detector::{Label, OutlierDetector};
use crate::error::{OutlierError, Result};
use ndarray::{Array1, Array2};
use polars::prelude::*;

/// Extract every column of `df` into a row-major `Array2<f64>`.
/// Columns are cast to f64; null or non-castable values are rejected.
pub fn frame_to_matrix(df: &DataFrame) -> Result<Array2<f64>> {
    let n_rows = df.height();
    let col_names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    let n_cols = col_names.len();

    let col_data: Vec<Vec<f64>> = col_names
        .iter()
        .map(|col_name| {
            let series = df
                .column(col_name)
                .map_err(|e| OutlierError::Data(e.to_string()))?;
            let series_f64 = series
                .cast(&DataType::Float64)
                .map_err(|_| OutlierError::Data(format!("column '{}' is not numeric", col_name)))?;
            let values: Vec<f64> = series_f64
                .f64()
                .map_err(|e| OutlierError::Data(e.to_string()))?
                .into_iter()
                .map(|v| {
                    v.ok_or_else(|| {
                        OutlierError::Data(format!("null value in column '{}'", col_name))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            Ok(values)
        })
        .collect::<Result<Vec<Vec<f64>>>>()?;

    let col_refs: Vec<&[f64]> = col_data.iter().map(|c| c.as_slice()).collect();
    Ok(Array2::from_shape_fn((n_rows, n_cols), |(r, c)| {
        col_refs[c][r]
    }))
}

/// Labels as a polars Series, preserving row order
pub fn labels_to_series(labels: &Array1<Label>) -> Series {
    let values: Vec<i32> = labels.iter().map(|&l| i32::from(l)).collect();
    Series::new("label".into(), values)
}

/// Fit a detector on the numeric columns of a frame
pub fn fit_frame<'a, D: OutlierDetector>(detector: &'a mut D, df: &DataFrame) -> Result<&'a mut D> {
    let x = frame_to_matrix(df)?;
    detector.fit(&x)?;
    Ok(detector)
}

/// Predict labels for each row of a frame
pub fn predict_frame<D: OutlierDetector>(detector: &D, df: &DataFrame) -> Result<Series> {
    let x = frame_to_matrix(df)?;
    let labels = detector.predict(&x)?;
    Ok(labels_to_series(&labels))
}

/// Fit on a frame, then predict labels for the same rows
pub fn fit_predict_frame<D: OutlierDetector>(detector: &mut D, df: &DataFrame) -> Result<Series> {
    let x = frame_to_matrix(df)?;
    let labels = detector.fit_predict(&x)?;
    Ok(labels_to_series(&labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::GaussianDetector;

    fn sample_frame() -> DataFrame {
        df!(
            "f1" => &[1.0, 1.1, 0.9, 1.2, 0.8, 1.0, 1.1, 0.9, 10.0],
            "f2" => &[2.0, 2.1, 1.9, 2.0, 2.2, 1.8, 1.9, 2.1, -5.0]
        )
        .unwrap()
    }

    #[test]
    fn test_frame_to_matrix_shape() {
        let df = sample_frame();
        let x = frame_to_matrix(&df).unwrap();
        assert_eq!(x.dim(), (9, 2));
        assert_eq!(x[[0, 0]], 1.0);
        assert_eq!(x[[8, 1]], -5.0);
    }

    #[test]
    fn test_fit_predict_frame_returns_series() {
        let df = sample_frame();
        let mut detector = GaussianDetector::default();
        let series = fit_predict_frame(&mut detector, &df).unwrap();
        assert_eq!(series.len(), 9);
        assert_eq!(series.dtype(), &DataType::Int32);
    }

    #[test]
    fn test_non_numeric_column_rejected() {
        let df = df!(
            "f1" => &[1.0, 2.0],
            "name" => &["a", "b"]
        )
        .unwrap();
        assert!(frame_to_matrix(&df).is_err());
    }

    #[test]
    fn test_predict_frame_matches_matrix_predict() {
        let df = sample_frame();
        let x = frame_to_matrix(&df).unwrap();

        let mut detector = GaussianDetector::default();
        fit_frame(&mut detector, &df).unwrap();

        let series = predict_frame(&detector, &df).unwrap();
        let labels = detector.predict(&x).unwrap();
        let from_series: Vec<i32> = series
            .i32()
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap())
            .collect();
        let from_matrix: Vec<i32> = labels.iter().map(|&l| i32::from(l)).collect();
        assert_eq!(from_series, from_matrix);
    }
}
