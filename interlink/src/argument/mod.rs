/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! The value contract every command argument and result satisfies.
//!
//! Arguments are cloned into mailboxes, encoded to raw bytes for dynamic
//! creation and flattened into numeric scalars for plotting or logging tools.
//! The trait supplies defaults for everything except the serde plumbing, so
//! most types only need an empty `impl Argument for T {}`.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::ArgumentError;

/// Value type usable as a command argument or result.
pub trait Argument:
    Clone + Default + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Encodes the value as CBOR.
    fn serialize_raw(&self) -> Result<Vec<u8>, ArgumentError> {
        let mut buffer = Vec::new();
        ciborium::into_writer(self, &mut buffer)
            .map_err(|e| ArgumentError::Serialize(format!("{e:?}")))?;
        Ok(buffer)
    }

    /// Decodes a value produced by [`Argument::serialize_raw`].
    fn deserialize_raw(bytes: &[u8]) -> Result<Self, ArgumentError> {
        match ciborium::from_reader::<Self, _>(bytes) {
            Ok(value) => Ok(value),
            Err(ciborium::de::Error::Semantic(_, msg)) => Err(ArgumentError::TypeMismatch(msg)),
            Err(e) => Err(ArgumentError::Malformed(format!("{e:?}"))),
        }
    }

    /// Human readable rendering used in logs and descriptions.
    fn to_text(&self) -> String {
        format!("{self:?}")
    }

    #[cfg(feature = "json")]
    fn to_json(&self) -> Result<serde_json::Value, ArgumentError> {
        serde_json::to_value(self).map_err(|e| ArgumentError::Serialize(e.to_string()))
    }

    /// Number of numeric scalars this value flattens into.
    fn scalar_number(&self) -> usize {
        0
    }

    /// Scalar at `index`, or `None` when out of range.
    fn scalar(&self, _index: usize) -> Option<f64> {
        None
    }

    /// Label of the scalar at `index`, built from `prefix`.
    fn scalar_description(&self, _index: usize, _prefix: &str) -> Option<String> {
        None
    }

    /// All scalars joined by `delimiter`.
    fn serialize_text(&self, delimiter: char) -> String {
        (0..self.scalar_number())
            .filter_map(|index| self.scalar(index))
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .join(&delimiter.to_string())
    }

    /// All scalar labels joined by `delimiter`, matching [`Argument::serialize_text`].
    fn serialize_description(&self, delimiter: char, prefix: &str) -> String {
        (0..self.scalar_number())
            .filter_map(|index| self.scalar_description(index, prefix))
            .collect::<Vec<_>>()
            .join(&delimiter.to_string())
    }
}

/// Raw form of an argument used when describing interfaces to remote peers.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ArgumentPrototype {
    /// Rust type name of the argument
    pub type_name: String,
    /// CBOR encoding of the argument's default value
    pub raw: Vec<u8>,
}

impl ArgumentPrototype {
    /// Builds the prototype of `A` from its default value.
    pub fn of<A: Argument>() -> Result<Self, ArgumentError> {
        Ok(Self {
            type_name: std::any::type_name::<A>().to_string(),
            raw: A::default().serialize_raw()?,
        })
    }

    /// Rebuilds a value from the prototype bytes.
    pub fn create<A: Argument>(&self) -> Result<A, ArgumentError> {
        A::deserialize_raw(&self.raw)
    }
}

impl Argument for ArgumentPrototype {}

impl Argument for () {}

impl Argument for String {}

impl Argument for bool {
    fn scalar_number(&self) -> usize {
        1
    }

    fn scalar(&self, index: usize) -> Option<f64> {
        (index == 0).then_some(if *self { 1.0 } else { 0.0 })
    }

    fn scalar_description(&self, index: usize, prefix: &str) -> Option<String> {
        (index == 0).then(|| scalar_label(prefix))
    }
}

macro_rules! numeric_argument {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Argument for $ty {
                fn scalar_number(&self) -> usize {
                    1
                }

                #[allow(clippy::cast_precision_loss, clippy::cast_lossless)]
                fn scalar(&self, index: usize) -> Option<f64> {
                    (index == 0).then_some(*self as f64)
                }

                fn scalar_description(&self, index: usize, prefix: &str) -> Option<String> {
                    (index == 0).then(|| scalar_label(prefix))
                }
            }
        )*
    };
}

numeric_argument!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64);

impl<T: Argument> Argument for Vec<T> {
    fn scalar_number(&self) -> usize {
        self.iter().map(Argument::scalar_number).sum()
    }

    fn scalar(&self, index: usize) -> Option<f64> {
        let (element, offset) = locate(self, index)?;
        self[element].scalar(offset)
    }

    fn scalar_description(&self, index: usize, prefix: &str) -> Option<String> {
        let (element, offset) = locate(self, index)?;
        self[element].scalar_description(offset, &format!("{}[{element}]", scalar_label(prefix)))
    }
}

fn scalar_label(prefix: &str) -> String {
    if prefix.is_empty() {
        "value".to_string()
    } else {
        prefix.to_string()
    }
}

// Maps a flat scalar index onto (element, index within element).
fn locate<T: Argument>(values: &[T], mut index: usize) -> Option<(usize, usize)> {
    for (position, value) in values.iter().enumerate() {
        let count = value.scalar_number();
        if index < count {
            return Some((position, index));
        }
        index -= count;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_scalars_flatten_in_order() {
        let values = vec![1.5_f64, 2.5, 3.5];
        assert_eq!(values.scalar_number(), 3);
        assert_eq!(values.scalar(1), Some(2.5));
        assert_eq!(values.scalar(3), None);
        assert_eq!(values.scalar_description(2, "gain").as_deref(), Some("gain[2]"));
        assert_eq!(values.serialize_text(','), "1.5,2.5,3.5");
    }

    #[test]
    fn text_has_no_scalars() {
        let text = String::from("hello");
        assert_eq!(text.scalar_number(), 0);
        assert!(text.serialize_text(' ').is_empty());
    }

    #[test]
    fn wrong_type_is_a_type_mismatch() {
        let bytes = String::from("not a number").serialize_raw().expect("serializes");
        let error = f64::deserialize_raw(&bytes).expect_err("should not decode");
        assert!(matches!(error, ArgumentError::TypeMismatch(_)));
    }

    #[test]
    fn truncated_bytes_are_malformed() {
        let mut bytes = vec![1.0_f64, 2.0].serialize_raw().expect("serializes");
        bytes.truncate(bytes.len() - 2);
        let error = Vec::<f64>::deserialize_raw(&bytes).expect_err("should not decode");
        assert!(matches!(error, ArgumentError::Malformed(_)));
    }

    #[test]
    fn prototype_recreates_default() {
        let prototype = ArgumentPrototype::of::<Vec<u32>>().expect("prototype");
        assert!(prototype.type_name.contains("Vec<u32>"));
        let value: Vec<u32> = prototype.create().expect("creates");
        assert!(value.is_empty());
    }
}
