use serde::{ser, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::{Path, Root};

/// Trait for validating glTF JSON data so that the library can function
/// safely and the semantic checks downstream have in-range references to
/// work with.
pub trait Validate {
    /// Validates the invariants required for the library to function safely.
    fn validate<P, R>(&self, _root: &Root, _path: P, _report: &mut R)
    where
        P: Fn() -> Path + Clone,
        R: FnMut(&dyn Fn() -> Path, Error),
    {
        // nop
    }
}

/// Specifies what kind of error occured during validation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum Error {
    /// An index was found to be out of bounds.
    IndexOutOfBounds,

    /// An invalid value was identified.
    Invalid,

    /// Some required data has been omitted.
    Missing,

    /// A valid value that the loader cannot process.
    Unsupported,
}

/// Specifies a type that has been pre-validated during deserialization or
/// otherwise.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum Checked<T> {
    /// The item is valid.
    Valid(T),

    /// The item is invalid.
    Invalid,
}

impl<T> Checked<T> {
    /// Converts from `Checked<T>` to `Checked<&T>`.
    pub fn as_ref(&self) -> Checked<&T> {
        match *self {
            Checked::Valid(ref item) => Checked::Valid(item),
            Checked::Invalid => Checked::Invalid,
        }
    }

    /// Takes ownership of the contained item if it is `Valid`.
    ///
    /// # Panics
    ///
    /// Panics if called on an `Invalid` item.
    pub fn unwrap(self) -> T {
        match self {
            Checked::Valid(item) => item,
            Checked::Invalid => panic!("attempted to unwrap an invalid item"),
        }
    }
}

impl<T: Serialize> Serialize for Checked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match *self {
            Checked::Valid(ref item) => item.serialize(serializer),
            Checked::Invalid => Err(ser::Error::custom("invalid item")),
        }
    }
}

impl<T: Default> Default for Checked<T> {
    fn default() -> Self {
        Checked::Valid(T::default())
    }
}

impl<T> Validate for Checked<T> {
    fn validate<P, R>(&self, _root: &Root, path: P, report: &mut R)
    where
        P: Fn() -> Path + Clone,
        R: FnMut(&dyn Fn() -> Path, Error),
    {
        match *self {
            Checked::Valid(_) => {}
            Checked::Invalid => report(&path, Error::Invalid),
        }
    }
}

/// Validates the suitability of 64-bit byte offsets/sizes on 32-bit systems.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde_derive::Serialize)]
pub struct USize64(pub u64);

impl<'de> serde::Deserialize<'de> for USize64 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Visitor;
        impl serde::de::Visitor<'_> for Visitor {
            type Value = USize64;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a non-negative integer")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(USize64(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(value)
                    .map(USize64)
                    .map_err(|_| E::custom("expected a non-negative integer"))
            }

            // Non-conforming exporters write lossless floats for integer
            // fields; accept them, reject anything fractional or negative.
            fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64 {
                    Ok(USize64(value as u64))
                } else {
                    Err(E::custom("expected a non-negative integer"))
                }
            }
        }
        deserializer.deserialize_u64(Visitor)
    }
}

impl From<u64> for USize64 {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<usize> for USize64 {
    fn from(value: usize) -> Self {
        Self(value as u64)
    }
}

impl USize64 {
    /// Widening conversion for array indexing.
    pub fn value(&self) -> usize {
        self.0 as usize
    }
}

impl Validate for USize64 {
    fn validate<P, R>(&self, _root: &Root, path: P, report: &mut R)
    where
        P: Fn() -> Path + Clone,
        R: FnMut(&dyn Fn() -> Path, Error),
    {
        if usize::try_from(self.0).is_err() {
            report(&path, Error::Unsupported);
        }
    }
}

impl<K: ToString + Validate, V: Validate> Validate for BTreeMap<K, V> {
    fn validate<P, R>(&self, root: &Root, path: P, report: &mut R)
    where
        P: Fn() -> Path + Clone,
        R: FnMut(&dyn Fn() -> Path, Error),
    {
        for (key, value) in self.iter() {
            key.validate(root, || path().key(&key.to_string()), report);
            value.validate(root, || path().key(&key.to_string()), report);
        }
    }
}

impl<T: Validate> Validate for Option<T> {
    fn validate<P, R>(&self, root: &Root, path: P, report: &mut R)
    where
        P: Fn() -> Path + Clone,
        R: FnMut(&dyn Fn() -> Path, Error),
    {
        if let Some(value) = self.as_ref() {
            value.validate(root, path, report);
        }
    }
}

impl<T: Validate> Validate for Vec<T> {
    fn validate<P, R>(&self, root: &Root, path: P, report: &mut R)
    where
        P: Fn() -> Path + Clone,
        R: FnMut(&dyn Fn() -> Path, Error),
    {
        for (index, value) in self.iter().enumerate() {
            value.validate(root, || path().index(index), report);
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Error::IndexOutOfBounds => "index out of bounds",
            Error::Invalid => "invalid value",
            Error::Missing => "missing data",
            Error::Unsupported => "unsupported value",
        })
    }
}

// These types are assumed to be always valid.
impl Validate for bool {}
impl Validate for u32 {}
impl Validate for i32 {}
impl Validate for usize {}
impl Validate for f32 {}
impl Validate for [f32; 2] {}
impl Validate for [f32; 3] {}
impl Validate for [f32; 4] {}
impl Validate for [f32; 16] {}
impl Validate for () {}
impl Validate for String {}
impl Validate for serde_json::Value {}
impl Validate for std::boxed::Box<serde_json::value::RawValue> {}
