//! Owned tensor container
//!
//! The execution pipeline is written against [`TensorDescriptor`] plus raw
//! element storage; this module provides the minimal owned container used to
//! bind real buffers into a [`crate::pack::TensorPack`]. The storage variant
//! always matches the descriptor's [`DataType`].

use crate::error::{CuantizarError, Result};
use crate::types::{DataType, TensorDescriptor};

/// Typed element storage backing a [`Tensor`]
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    /// Signed 8-bit elements
    I8(Vec<i8>),
    /// Unsigned 8-bit elements
    U8(Vec<u8>),
    /// Signed 16-bit elements
    I16(Vec<i16>),
    /// 32-bit integer elements (accumulators, bias, sums)
    I32(Vec<i32>),
    /// 32-bit float elements (dequantized output)
    F32(Vec<f32>),
}

impl Buffer {
    fn len(&self) -> usize {
        match self {
            Self::I8(v) => v.len(),
            Self::U8(v) => v.len(),
            Self::I16(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::F32(v) => v.len(),
        }
    }
}

/// N-dimensional tensor: a descriptor plus matching typed storage
#[derive(Debug, Clone)]
pub struct Tensor {
    descriptor: TensorDescriptor,
    buffer: Buffer,
}

impl Tensor {
    /// Create a tensor from a descriptor and a matching buffer
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer's element count or variant does not
    /// match the descriptor.
    pub fn new(descriptor: TensorDescriptor, buffer: Buffer) -> Result<Self> {
        let expected = descriptor.num_elements();
        if buffer.len() != expected {
            return Err(CuantizarError::InvalidShape {
                reason: format!(
                    "Buffer has {} elements, descriptor {:?} expects {}",
                    buffer.len(),
                    descriptor.shape(),
                    expected
                ),
            });
        }
        let variant_ok = matches!(
            (descriptor.data_type(), &buffer),
            (DataType::QAsymmS8 | DataType::QSymmS8PerChannel, Buffer::I8(_))
                | (DataType::QAsymmU8, Buffer::U8(_))
                | (DataType::QSymmS16, Buffer::I16(_))
                | (DataType::S32, Buffer::I32(_))
                | (DataType::F32, Buffer::F32(_))
        );
        if !variant_ok {
            return Err(CuantizarError::InvalidConfiguration {
                reason: format!(
                    "Buffer variant does not match descriptor data type {:?}",
                    descriptor.data_type()
                ),
            });
        }
        Ok(Self { descriptor, buffer })
    }

    /// Allocate a zero-filled tensor for a descriptor
    #[must_use]
    pub fn zeroed(descriptor: TensorDescriptor) -> Self {
        let n = descriptor.num_elements();
        let buffer = match descriptor.data_type() {
            DataType::QAsymmS8 | DataType::QSymmS8PerChannel => Buffer::I8(vec![0; n]),
            DataType::QAsymmU8 => Buffer::U8(vec![0; n]),
            DataType::QSymmS16 => Buffer::I16(vec![0; n]),
            DataType::S32 => Buffer::I32(vec![0; n]),
            DataType::F32 => Buffer::F32(vec![0.0; n]),
        };
        Self { descriptor, buffer }
    }

    /// The tensor's descriptor
    #[must_use]
    pub fn descriptor(&self) -> &TensorDescriptor {
        &self.descriptor
    }

    /// Mutable access to the descriptor (auto-init, dynamic quantization)
    pub fn descriptor_mut(&mut self) -> &mut TensorDescriptor {
        &mut self.descriptor
    }

    /// View the storage as i8 elements
    ///
    /// # Errors
    ///
    /// Returns an error if the storage is not i8.
    pub fn as_i8(&self) -> Result<&[i8]> {
        match &self.buffer {
            Buffer::I8(v) => Ok(v),
            _ => Err(self.type_mismatch("i8")),
        }
    }

    /// View the storage as u8 elements
    ///
    /// # Errors
    ///
    /// Returns an error if the storage is not u8.
    pub fn as_u8(&self) -> Result<&[u8]> {
        match &self.buffer {
            Buffer::U8(v) => Ok(v),
            _ => Err(self.type_mismatch("u8")),
        }
    }

    /// View the storage as i16 elements
    ///
    /// # Errors
    ///
    /// Returns an error if the storage is not i16.
    pub fn as_i16(&self) -> Result<&[i16]> {
        match &self.buffer {
            Buffer::I16(v) => Ok(v),
            _ => Err(self.type_mismatch("i16")),
        }
    }

    /// View the storage as i32 elements
    ///
    /// # Errors
    ///
    /// Returns an error if the storage is not i32.
    pub fn as_i32(&self) -> Result<&[i32]> {
        match &self.buffer {
            Buffer::I32(v) => Ok(v),
            _ => Err(self.type_mismatch("i32")),
        }
    }

    /// View the storage as f32 elements
    ///
    /// # Errors
    ///
    /// Returns an error if the storage is not f32.
    pub fn as_f32(&self) -> Result<&[f32]> {
        match &self.buffer {
            Buffer::F32(v) => Ok(v),
            _ => Err(self.type_mismatch("f32")),
        }
    }

    /// Mutable i8 view
    ///
    /// # Errors
    ///
    /// Returns an error if the storage is not i8.
    pub fn as_i8_mut(&mut self) -> Result<&mut [i8]> {
        match &mut self.buffer {
            Buffer::I8(v) => Ok(v),
            _ => Err(CuantizarError::InvalidConfiguration {
                reason: "Expected i8 storage".to_string(),
            }),
        }
    }

    /// Mutable u8 view
    ///
    /// # Errors
    ///
    /// Returns an error if the storage is not u8.
    pub fn as_u8_mut(&mut self) -> Result<&mut [u8]> {
        match &mut self.buffer {
            Buffer::U8(v) => Ok(v),
            _ => Err(CuantizarError::InvalidConfiguration {
                reason: "Expected u8 storage".to_string(),
            }),
        }
    }

    /// Mutable i16 view
    ///
    /// # Errors
    ///
    /// Returns an error if the storage is not i16.
    pub fn as_i16_mut(&mut self) -> Result<&mut [i16]> {
        match &mut self.buffer {
            Buffer::I16(v) => Ok(v),
            _ => Err(CuantizarError::InvalidConfiguration {
                reason: "Expected i16 storage".to_string(),
            }),
        }
    }

    /// Mutable i32 view
    ///
    /// # Errors
    ///
    /// Returns an error if the storage is not i32.
    pub fn as_i32_mut(&mut self) -> Result<&mut [i32]> {
        match &mut self.buffer {
            Buffer::I32(v) => Ok(v),
            _ => Err(CuantizarError::InvalidConfiguration {
                reason: "Expected i32 storage".to_string(),
            }),
        }
    }

    /// Mutable f32 view
    ///
    /// # Errors
    ///
    /// Returns an error if the storage is not f32.
    pub fn as_f32_mut(&mut self) -> Result<&mut [f32]> {
        match &mut self.buffer {
            Buffer::F32(v) => Ok(v),
            _ => Err(CuantizarError::InvalidConfiguration {
                reason: "Expected f32 storage".to_string(),
            }),
        }
    }

    fn type_mismatch(&self, wanted: &str) -> CuantizarError {
        CuantizarError::InvalidConfiguration {
            reason: format!(
                "Expected {wanted} storage, tensor holds {:?}",
                self.descriptor.data_type()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TensorDescriptor;

    #[test]
    fn test_new_validates_length() {
        let d = TensorDescriptor::new(vec![2, 3], DataType::QAsymmU8);
        assert!(Tensor::new(d.clone(), Buffer::U8(vec![0; 6])).is_ok());
        assert!(Tensor::new(d, Buffer::U8(vec![0; 5])).is_err());
    }

    #[test]
    fn test_new_validates_variant() {
        let d = TensorDescriptor::new(vec![4], DataType::S32);
        assert!(Tensor::new(d.clone(), Buffer::I32(vec![0; 4])).is_ok());
        assert!(Tensor::new(d, Buffer::U8(vec![0; 4])).is_err());
    }

    #[test]
    fn test_zeroed_matches_dtype() {
        let t = Tensor::zeroed(TensorDescriptor::new(vec![3], DataType::F32));
        assert_eq!(t.as_f32().unwrap(), &[0.0, 0.0, 0.0]);
        assert!(t.as_i32().is_err());

        let t = Tensor::zeroed(TensorDescriptor::new(vec![2], DataType::QAsymmS8));
        assert_eq!(t.as_i8().unwrap(), &[0, 0]);
    }

    #[test]
    fn test_mutable_views() {
        let mut t = Tensor::zeroed(TensorDescriptor::new(vec![2, 2], DataType::S32));
        t.as_i32_mut().unwrap()[3] = 42;
        assert_eq!(t.as_i32().unwrap(), &[0, 0, 0, 42]);
    }
}
