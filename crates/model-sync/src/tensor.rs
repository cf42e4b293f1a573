//! Typed tensors decoded from store records

use std::fmt;

use bytes::Bytes;
use ndarray::{ArrayD, IxDyn, Zip};
use runtime_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tensor_store::TensorBlob;

/// Element datatype of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    #[serde(rename = "FLOAT")]
    Float32,
    #[serde(rename = "INT64")]
    Int64,
}

impl DType {
    /// Parse the tag a record carries
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "FLOAT" => Ok(DType::Float32),
            "INT64" => Ok(DType::Int64),
            other => Err(Error::UnsupportedDType {
                dtype: other.to_string(),
            }),
        }
    }

    /// Tag written to the store
    pub fn tag(&self) -> &'static str {
        match self {
            DType::Float32 => "FLOAT",
            DType::Int64 => "INT64",
        }
    }

    /// Bytes per element
    pub fn width(&self) -> usize {
        match self {
            DType::Float32 => 4,
            DType::Int64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// N-dimensional array with its element type
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    Float32(ArrayD<f32>),
    Int64(ArrayD<i64>),
}

impl Tensor {
    /// Decode a store record into a tensor.
    ///
    /// `key` only labels errors. The data length must match the shape
    /// exactly; nothing is truncated or padded.
    pub fn decode(key: &str, blob: &TensorBlob) -> Result<Self> {
        let malformed = |reason: String| Error::MalformedTensor {
            key: key.to_string(),
            reason,
        };

        let dtype = DType::from_tag(&blob.dtype)?;

        let shape = blob
            .shape
            .iter()
            .map(|&dim| {
                usize::try_from(dim).map_err(|_| malformed(format!("negative dimension {}", dim)))
            })
            .collect::<Result<Vec<usize>>>()?;

        let expected = shape
            .iter()
            .try_fold(dtype.width(), |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| malformed(format!("shape {:?} overflows", shape)))?;
        if blob.data.len() != expected {
            return Err(malformed(format!(
                "{} bytes of data for shape {:?} of {}, expected {}",
                blob.data.len(),
                shape,
                dtype,
                expected
            )));
        }

        let tensor = match dtype {
            DType::Float32 => {
                let values: Vec<f32> = blob
                    .data
                    .chunks_exact(4)
                    .map(|chunk| f32::from_le_bytes(le_bytes(chunk)))
                    .collect();
                ArrayD::from_shape_vec(IxDyn(&shape), values).map(Tensor::Float32)
            }
            DType::Int64 => {
                let values: Vec<i64> = blob
                    .data
                    .chunks_exact(8)
                    .map(|chunk| i64::from_le_bytes(le_bytes(chunk)))
                    .collect();
                ArrayD::from_shape_vec(IxDyn(&shape), values).map(Tensor::Int64)
            }
        };
        tensor.map_err(|e| malformed(e.to_string()))
    }

    /// Encode into a store record
    pub fn to_blob(&self) -> TensorBlob {
        let data: Vec<u8> = match self {
            Tensor::Float32(array) => array.iter().flat_map(|v| v.to_le_bytes()).collect(),
            Tensor::Int64(array) => array.iter().flat_map(|v| v.to_le_bytes()).collect(),
        };
        TensorBlob {
            dtype: self.dtype().tag().to_string(),
            shape: self.shape().iter().map(|&dim| dim as i64).collect(),
            data: Bytes::from(data),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Tensor::Float32(_) => DType::Float32,
            Tensor::Int64(_) => DType::Int64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::Float32(array) => array.shape(),
            Tensor::Int64(array) => array.shape(),
        }
    }

    /// Elementwise sum. Shapes must be identical; no broadcasting.
    pub fn add(&self, layer: &str, other: &Tensor) -> Result<Tensor> {
        if self.dtype() != other.dtype() {
            return Err(Error::DTypeMismatch {
                layer: layer.to_string(),
                expected: self.dtype().to_string(),
                actual: other.dtype().to_string(),
            });
        }
        if self.shape() != other.shape() {
            return Err(Error::ShapeMismatch {
                layer: layer.to_string(),
                expected: self.shape().to_vec(),
                actual: other.shape().to_vec(),
            });
        }

        match (self, other) {
            (Tensor::Float32(a), Tensor::Float32(b)) => Ok(Tensor::Float32(a + b)),
            (Tensor::Int64(a), Tensor::Int64(b)) => Ok(Tensor::Int64(
                Zip::from(a).and(b).map_collect(|&x, &y| x.wrapping_add(y)),
            )),
            _ => Err(Error::Internal {
                message: "datatype check let mismatched tensors through".to_string(),
            }),
        }
    }
}

fn le_bytes<const N: usize>(chunk: &[u8]) -> [u8; N] {
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(chunk);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn float_blob(shape: Vec<i64>, values: &[f32]) -> TensorBlob {
        TensorBlob {
            dtype: "FLOAT".to_string(),
            shape,
            data: Bytes::from(values.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>()),
        }
    }

    #[test]
    fn test_decode_float32() {
        let blob = float_blob(vec![2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let tensor = Tensor::decode("k", &blob).unwrap();

        assert_eq!(tensor.dtype(), DType::Float32);
        assert_eq!(tensor.shape(), &[2, 2]);
        match tensor {
            Tensor::Float32(array) => assert_eq!(array[[1, 0]], 3.0),
            other => panic!("unexpected tensor {:?}", other),
        }
    }

    #[test]
    fn test_decode_int64() {
        let blob = TensorBlob {
            dtype: "INT64".to_string(),
            shape: vec![3],
            data: Bytes::from(
                [5i64, -1, 7]
                    .iter()
                    .flat_map(|v| v.to_le_bytes())
                    .collect::<Vec<u8>>(),
            ),
        };
        let tensor = Tensor::decode("k", &blob).unwrap();
        assert_eq!(tensor, Tensor::Int64(arr1(&[5i64, -1, 7]).into_dyn()));
    }

    #[test]
    fn test_decode_unsupported_dtype() {
        let mut blob = float_blob(vec![1], &[1.0]);
        blob.dtype = "BOOL".to_string();

        let result = Tensor::decode("k", &blob);
        assert!(matches!(result, Err(Error::UnsupportedDType { dtype }) if dtype == "BOOL"));
    }

    #[test]
    fn test_decode_length_mismatch() {
        let blob = float_blob(vec![4], &[1.0, 2.0, 3.0]);
        let result = Tensor::decode("k", &blob);
        assert!(matches!(result, Err(Error::MalformedTensor { .. })));

        let blob = float_blob(vec![-1], &[1.0]);
        let result = Tensor::decode("k", &blob);
        assert!(matches!(result, Err(Error::MalformedTensor { .. })));
    }

    #[test]
    fn test_scalar_tensor() {
        let blob = float_blob(vec![], &[0.5]);
        let tensor = Tensor::decode("k", &blob).unwrap();
        assert!(tensor.shape().is_empty());
        assert_eq!(tensor.to_blob(), blob);
    }

    #[test]
    fn test_to_blob_preserves_bits() {
        let blob = float_blob(vec![3], &[f32::MIN_POSITIVE, -0.0, 1.0e-7]);
        let tensor = Tensor::decode("k", &blob).unwrap();
        assert_eq!(tensor.to_blob(), blob);
    }

    #[test]
    fn test_add() {
        let a = Tensor::Float32(arr1(&[1.0f32, 2.0]).into_dyn());
        let b = Tensor::Float32(arr1(&[0.5f32, 0.5]).into_dyn());
        assert_eq!(
            a.add("fc1", &b).unwrap(),
            Tensor::Float32(arr1(&[1.5f32, 2.5]).into_dyn())
        );

        let a = Tensor::Int64(arr1(&[i64::MAX, 1]).into_dyn());
        let b = Tensor::Int64(arr1(&[1i64, 1]).into_dyn());
        assert_eq!(
            a.add("fc1", &b).unwrap(),
            Tensor::Int64(arr1(&[i64::MIN, 2]).into_dyn())
        );
    }

    #[test]
    fn test_add_rejects_broadcast() {
        let a = Tensor::Float32(ArrayD::zeros(IxDyn(&[2, 3])));
        let b = Tensor::Float32(ArrayD::zeros(IxDyn(&[3])));
        let result = a.add("fc1", &b);
        assert!(matches!(result, Err(Error::ShapeMismatch { expected, actual, .. })
            if expected == vec![2, 3] && actual == vec![3]));
    }

    #[test]
    fn test_add_rejects_dtype_mismatch() {
        let a = Tensor::Float32(ArrayD::zeros(IxDyn(&[2])));
        let b = Tensor::Int64(ArrayD::zeros(IxDyn(&[2])));
        assert!(matches!(a.add("fc1", &b), Err(Error::DTypeMismatch { .. })));
    }

    #[test]
    fn test_dtype_json_matches_tag() {
        for dtype in [DType::Float32, DType::Int64] {
            let json = serde_json::to_string(&dtype).unwrap();
            assert_eq!(json, format!("\"{}\"", dtype));
            assert_eq!(serde_json::from_str::<DType>(&json).unwrap(), dtype);
        }
    }
}
