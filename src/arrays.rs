//! Small downcast helpers shared by the codecs and the materializer.

use arrow_array::{Array, BinaryArray, BinaryViewArray, LargeBinaryArray, LargeStringArray,
    StringArray, StringViewArray};
use arrow_schema::DataType;

use crate::error::{GeoTableError, Result};

/// Downcast an array with a readable error message.
pub(crate) fn downcast<T: 'static>(array: &dyn Array) -> Result<&T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        GeoTableError::conversion(format!(
            "failed to cast {:?} column to {}",
            array.data_type(),
            std::any::type_name::<T>()
        ))
    })
}

/// Byte slice of a binary-family array at `i` (caller checked nulls).
pub(crate) fn binary_value(array: &dyn Array, i: usize) -> Result<&[u8]> {
    match array.data_type() {
        DataType::Binary => Ok(downcast::<BinaryArray>(array)?.value(i)),
        DataType::LargeBinary => Ok(downcast::<LargeBinaryArray>(array)?.value(i)),
        DataType::BinaryView => Ok(downcast::<BinaryViewArray>(array)?.value(i)),
        other => Err(GeoTableError::conversion(format!(
            "expected a binary column, found {other:?}"
        ))),
    }
}

/// String slice of a text-family array at `i` (caller checked nulls).
pub(crate) fn string_value(array: &dyn Array, i: usize) -> Result<&str> {
    match array.data_type() {
        DataType::Utf8 => Ok(downcast::<StringArray>(array)?.value(i)),
        DataType::LargeUtf8 => Ok(downcast::<LargeStringArray>(array)?.value(i)),
        DataType::Utf8View => Ok(downcast::<StringViewArray>(array)?.value(i)),
        other => Err(GeoTableError::conversion(format!(
            "expected a text column, found {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::Int32Array;

    #[test]
    fn test_downcast_mismatch() {
        let array = Int32Array::from(vec![1, 2, 3]);
        assert!(downcast::<StringArray>(&array).is_err());
        assert!(binary_value(&array, 0).is_err());
        assert!(string_value(&array, 0).is_err());
    }

    #[test]
    fn test_values() {
        let s = StringArray::from(vec!["a", "b"]);
        assert_eq!(string_value(&s, 1).unwrap(), "b");
        let b = BinaryArray::from(vec![&b"xy"[..]]);
        assert_eq!(binary_value(&b, 0).unwrap(), b"xy");
    }
}
