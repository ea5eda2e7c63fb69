//! Streaming partial parse over `serde_json`.
//!
//! Only the top-level object's keys are inspected. The wanted value is read
//! as a string and interned; every other value is skipped with
//! [`IgnoredAny`].
//!
//! The whole payload is still scanned after the key is found, so a message
//! with a malformed tail is rejected as `Malformed` before any endpoint sees
//! it. The endpoint deserializes the same bytes in full anyway.

use std::{fmt, sync::Arc};

use serde::de::{
    self,
    DeserializeOwned,
    DeserializeSeed,
    Deserializer,
    IgnoredAny,
    MapAccess,
    SeqAccess,
    Visitor,
};

use super::SerializerError;
use crate::interner::RouteKeyInterner;

pub(super) fn extract_field(
    field: &str,
    payload: &[u8],
    interner: &RouteKeyInterner,
) -> Result<Option<Arc<str>>, SerializerError> {
    let mut de = serde_json::Deserializer::from_slice(payload);
    let value = FieldProbe { field, interner }
        .deserialize(&mut de)
        .map_err(SerializerError::Malformed)?;
    de.end().map_err(SerializerError::Malformed)?;
    Ok(value)
}

pub(super) fn deserialize<T: DeserializeOwned>(payload: &[u8]) -> Result<Option<T>, SerializerError> {
    serde_json::from_slice::<Option<T>>(payload).map_err(SerializerError::Deserialize)
}

/// Seed that walks one object looking for `field`.
struct FieldProbe<'a> {
    field: &'a str,
    interner: &'a RouteKeyInterner,
}

impl<'de> DeserializeSeed<'de> for FieldProbe<'_> {
    type Value = Option<Arc<str>>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for FieldProbe<'_> {
    type Value = Option<Arc<str>>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("a JSON object") }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut found = None;
        // Read to the closing brace: serde_json rejects a map left open.
        while let Some(matched) = map.next_key_seed(KeyMatch(self.field))? {
            if matched && found.is_none() {
                found = Some(map.next_value_seed(StringValue(self.interner))?);
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(found.flatten())
    }
}

/// Compares a key against the wanted field name without allocating.
struct KeyMatch<'a>(&'a str);

impl<'de> DeserializeSeed<'de> for KeyMatch<'_> {
    type Value = bool;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<bool, D::Error> {
        deserializer.deserialize_str(self)
    }
}

impl Visitor<'_> for KeyMatch<'_> {
    type Value = bool;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("an object key") }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> { Ok(v == self.0) }
}

/// Interns a string value; any other value is consumed and reported as
/// `None`.
struct StringValue<'a>(&'a RouteKeyInterner);

impl<'de> DeserializeSeed<'de> for StringValue<'_> {
    type Value = Option<Arc<str>>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for StringValue<'_> {
    type Value = Option<Arc<str>>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("any JSON value") }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(Some(self.0.intern(v.as_bytes())))
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<Self::Value, E> { Ok(None) }

    fn visit_i64<E: de::Error>(self, _: i64) -> Result<Self::Value, E> { Ok(None) }

    fn visit_u64<E: de::Error>(self, _: u64) -> Result<Self::Value, E> { Ok(None) }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<Self::Value, E> { Ok(None) }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> { Ok(None) }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> { Ok(None) }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(None)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
        Ok(None)
    }
}
