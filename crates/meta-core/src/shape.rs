//! Shape Analyzer (C1) and Shard Enumerator (C2).
//!
//! See spec Section 4.1, 4.2. Grounded in
//! `original_source/wfl_utils/wfl_parser.py`'s `_input_dimensions` and
//! `_shards`.

use crate::types::{FileBySample, Shape, ShardCoord};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("ERR_SHAPE_UNSUPPORTED: input has no samples")]
    Empty,
    #[error("ERR_SHAPE_UNSUPPORTED: dimension {0} is unsupported (max 3)")]
    DimensionUnsupported(usize),
}

/// Compute the `Shape` of a FILE input (spec Section 4.1).
///
/// Dimension 1 cardinality is the sample count. Dimension 2 exists iff
/// every sample's entry is itself a list (which it always is here, since
/// `FileBySample` already stores per-sample lists) — so dimension 2 is
/// always populated from a non-empty input; dimension 3 only applies when
/// the source domain nests a third level, which `FileBySample` cannot
/// represent directly (see `analyze_nested` for that case). Higher
/// dimensions fail with `ERR_SHAPE_UNSUPPORTED`.
pub fn analyze(input: &FileBySample) -> Result<Shape, ShapeError> {
    if input.is_empty() {
        return Err(ShapeError::Empty);
    }
    let n = input.len();
    let mut dim2 = Vec::with_capacity(n);
    for idx in 0..n {
        let files = input
            .get(&idx)
            .ok_or(ShapeError::DimensionUnsupported(1))?;
        dim2.push(files.len());
    }
    Ok(Shape {
        dim1: vec![n],
        dim2: Some(dim2),
        dim3: None,
    })
}

/// Compute the `Shape` of a nested (dim-3-capable) FILE input, where each
/// sample maps to an ordered list of sublists rather than a flat file
/// list. Used for meta-workflows whose file arguments declare `dim >= 2`
/// against a source that genuinely nests a third level.
pub fn analyze_nested(input: &[Vec<Vec<String>>]) -> Result<Shape, ShapeError> {
    if input.is_empty() {
        return Err(ShapeError::Empty);
    }
    let dim1 = vec![input.len()];
    let dim2: Vec<usize> = input.iter().map(Vec::len).collect();
    let dim3: Vec<Vec<usize>> = input
        .iter()
        .map(|sample| sample.iter().map(Vec::len).collect())
        .collect();
    Ok(Shape {
        dim1,
        dim2: Some(dim2),
        dim3: Some(dim3),
    })
}

/// Enumerate shard coordinates of the given `dimension` against `shape`
/// (spec Section 4.2). Lexicographic, stable, deterministic order.
/// `dimension = 0` yields the single coordinate `()`.
pub fn enumerate_shards(shape: &Shape, dimension: u8) -> Result<Vec<ShardCoord>, ShapeError> {
    match dimension {
        0 => Ok(vec![vec![]]),
        1 => {
            let n = shape.dim1.first().copied().unwrap_or(0);
            Ok((0..n).map(|i| vec![i]).collect())
        }
        2 => {
            let dim2 = shape
                .dim2
                .as_ref()
                .ok_or(ShapeError::DimensionUnsupported(2))?;
            let mut shards = Vec::new();
            for (i, &count) in dim2.iter().enumerate() {
                for j in 0..count {
                    shards.push(vec![i, j]);
                }
            }
            Ok(shards)
        }
        3 => {
            let dim3 = shape
                .dim3
                .as_ref()
                .ok_or(ShapeError::DimensionUnsupported(3))?;
            let mut shards = Vec::new();
            for (i, sublist) in dim3.iter().enumerate() {
                for (j, &count) in sublist.iter().enumerate() {
                    for k in 0..count {
                        shards.push(vec![i, j, k]);
                    }
                }
            }
            Ok(shards)
        }
        d => Err(ShapeError::DimensionUnsupported(d as usize)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn file_by_sample(counts: &[usize]) -> FileBySample {
        let mut m = HashMap::new();
        for (idx, &count) in counts.iter().enumerate() {
            m.insert(idx, (0..count).map(|i| format!("file-{idx}-{i}")).collect());
        }
        m
    }

    #[test]
    fn analyze_computes_dim1_and_dim2() {
        let input = file_by_sample(&[2, 3]);
        let shape = analyze(&input).unwrap();
        assert_eq!(shape.dim1, vec![2]);
        assert_eq!(shape.dim2, Some(vec![2, 3]));
    }

    #[test]
    fn analyze_rejects_empty_input() {
        let input = FileBySample::new();
        assert_eq!(analyze(&input), Err(ShapeError::Empty));
    }

    #[test]
    fn enumerate_shards_dimension_zero_is_single_coord() {
        let shape = Shape::default();
        assert_eq!(enumerate_shards(&shape, 0).unwrap(), vec![Vec::<usize>::new()]);
    }

    #[test]
    fn enumerate_shards_dimension_one_is_sample_range() {
        let input = file_by_sample(&[1, 1, 1]);
        let shape = analyze(&input).unwrap();
        assert_eq!(
            enumerate_shards(&shape, 1).unwrap(),
            vec![vec![0], vec![1], vec![2]]
        );
    }

    #[test]
    fn enumerate_shards_dimension_two_matches_scenario_4() {
        // spec Section 8, scenario 4: dim1=[2], dim2=[2,3]
        let shape = Shape {
            dim1: vec![2],
            dim2: Some(vec![2, 3]),
            dim3: None,
        };
        let shards = enumerate_shards(&shape, 2).unwrap();
        assert_eq!(
            shards,
            vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1], vec![1, 2]]
        );
    }

    #[test]
    fn enumerate_shards_dimension_three() {
        let shape = analyze_nested(&[
            vec![vec!["a".to_string()], vec!["b".to_string(), "c".to_string()]],
        ])
        .unwrap();
        let shards = enumerate_shards(&shape, 3).unwrap();
        assert_eq!(shards, vec![vec![0, 0, 0], vec![0, 1, 0], vec![0, 1, 1]]);
    }

    #[test]
    fn enumerate_shards_rejects_unsupported_dimension() {
        let shape = Shape::default();
        assert_eq!(
            enumerate_shards(&shape, 4),
            Err(ShapeError::DimensionUnsupported(4))
        );
    }

    #[test]
    fn enumerate_shards_dimension_two_without_shape_fails() {
        let shape = Shape::default();
        assert_eq!(
            enumerate_shards(&shape, 2),
            Err(ShapeError::DimensionUnsupported(2))
        );
    }
}
