//! Route-key interning.
//!
//! The set of route keys is closed once endpoints are registered, so every
//! known key can be pre-hashed at startup. [`RouteKeyInterner`] maps the raw
//! bytes of a key field back to the canonical [`Arc<str>`] registered for it,
//! which turns "decode a field and allocate a string" into a hash probe on
//! the per-message path.
//!
//! Distinct keys sharing a hash are chained rather than overwritten. In
//! [`InternMode::Verified`] every hit is confirmed byte-for-byte;
//! [`InternMode::TrustHash`] skips that comparison for chain-less hits and is
//! only sound for a key set known to be collision-free under the hash.

use std::{collections::HashMap, sync::Arc};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Streaming 64-bit FNV-1a.
#[derive(Clone, Copy)]
struct KeyHasher(u64);

impl KeyHasher {
    fn new() -> Self { Self(FNV_OFFSET) }

    fn update(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    fn finish(self) -> u64 { self.0 }
}

fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = KeyHasher::new();
    hasher.update(bytes);
    hasher.finish()
}

/// How lookups treat a hash hit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InternMode {
    /// Compare raw bytes before returning a cached key.
    #[default]
    Verified,
    /// Return the cached key on a chain-less hash hit without comparing.
    TrustHash,
}

#[derive(Debug)]
struct RouteKeyEntry {
    value: Arc<str>,
    bytes: Box<[u8]>,
    next: Option<Box<RouteKeyEntry>>,
}

impl RouteKeyEntry {
    fn new(value: Arc<str>) -> Self {
        let bytes = value.as_bytes().into();
        Self {
            value,
            bytes,
            next: None,
        }
    }

    fn chain(&self) -> impl Iterator<Item = &RouteKeyEntry> {
        std::iter::successors(Some(self), |entry| entry.next.as_deref())
    }
}

/// Immutable map from raw route-key bytes to canonical key strings.
#[derive(Debug)]
pub struct RouteKeyInterner {
    entries: HashMap<u64, RouteKeyEntry>,
    has_collisions: bool,
    mode: InternMode,
    #[cfg(test)]
    hash_mask: u64,
    len: usize,
    empty: Arc<str>,
}

impl RouteKeyInterner {
    /// Build an interner over `keys` using [`InternMode::Verified`].
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Arc<str>>,
    {
        Self::with_mode(keys, InternMode::default())
    }

    /// Build an interner over `keys` with an explicit lookup mode.
    pub fn with_mode<I, K>(keys: I, mode: InternMode) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Arc<str>>,
    {
        let mut interner = Self::empty(mode);
        for key in keys {
            interner.insert(key.into());
        }
        interner
    }

    fn empty(mode: InternMode) -> Self {
        Self {
            entries: HashMap::new(),
            has_collisions: false,
            mode,
            #[cfg(test)]
            hash_mask: u64::MAX,
            len: 0,
            empty: Arc::from(""),
        }
    }

    fn insert(&mut self, value: Arc<str>) {
        let hash = self.slot(hash_bytes(value.as_bytes()));
        let Some(head) = self.entries.get_mut(&hash) else {
            self.entries.insert(hash, RouteKeyEntry::new(value));
            self.len += 1;
            return;
        };
        if head.chain().any(|entry| *entry.bytes == *value.as_bytes()) {
            return;
        }
        let mut entry = RouteKeyEntry::new(value);
        entry.next = head.next.take();
        head.next = Some(Box::new(entry));
        self.has_collisions = true;
        self.len += 1;
    }

    #[cfg(not(test))]
    #[expect(clippy::unused_self, reason = "mirrors the test-only masked variant")]
    #[inline]
    fn slot(&self, hash: u64) -> u64 { hash }

    // Tests narrow the mask to force collisions.
    #[cfg(test)]
    fn slot(&self, hash: u64) -> u64 { hash & self.hash_mask }

    /// Number of distinct registered keys.
    #[must_use]
    pub fn len(&self) -> usize { self.len }

    /// Whether no keys were registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Whether two registered keys share a hash.
    #[must_use]
    pub fn has_collisions(&self) -> bool { self.has_collisions }

    /// Lookup mode in effect.
    #[must_use]
    pub fn mode(&self) -> InternMode { self.mode }

    /// Whether `bytes` are exactly a registered key.
    #[must_use]
    pub fn contains(&self, bytes: &[u8]) -> bool { self.lookup(bytes).is_some() }

    /// Return the canonical key for `bytes`, or a freshly decoded string for
    /// unknown input.
    ///
    /// Invalid UTF-8 is decoded lossily; such input can never match a
    /// registered key.
    #[must_use]
    pub fn intern(&self, bytes: &[u8]) -> Arc<str> {
        if bytes.is_empty() {
            return Arc::clone(&self.empty);
        }
        match self.lookup(bytes) {
            Some(value) => Arc::clone(value),
            None => decode(bytes),
        }
    }

    /// Intern a key delivered as non-contiguous segments.
    ///
    /// The hash is computed across segments and candidates are compared
    /// segment by segment, so the key is only copied when it is unknown.
    #[must_use]
    pub fn intern_segments(&self, segments: &[&[u8]]) -> Arc<str> {
        match segments {
            [] => Arc::clone(&self.empty),
            [single] => self.intern(single),
            _ => {
                let total: usize = segments.iter().map(|s| s.len()).sum();
                if total == 0 {
                    return Arc::clone(&self.empty);
                }
                let mut hasher = KeyHasher::new();
                for segment in segments {
                    hasher.update(segment);
                }
                let found = self
                    .entries
                    .get(&self.slot(hasher.finish()))
                    .and_then(|head| {
                        self.select(head, |entry| segments_equal(&entry.bytes, segments, total))
                    });
                match found {
                    Some(value) => Arc::clone(value),
                    None => decode(&segments.concat()),
                }
            }
        }
    }

    fn lookup(&self, bytes: &[u8]) -> Option<&Arc<str>> {
        let head = self.entries.get(&self.slot(hash_bytes(bytes)))?;
        self.select(head, |entry| *entry.bytes == *bytes)
    }

    fn select<'a>(
        &self,
        head: &'a RouteKeyEntry,
        matches: impl Fn(&RouteKeyEntry) -> bool,
    ) -> Option<&'a Arc<str>> {
        if self.mode == InternMode::TrustHash && head.next.is_none() {
            return Some(&head.value);
        }
        head.chain()
            .find(|entry| matches(entry))
            .map(|entry| &entry.value)
    }
}

fn decode(bytes: &[u8]) -> Arc<str> { Arc::from(String::from_utf8_lossy(bytes)) }

fn segments_equal(expected: &[u8], segments: &[&[u8]], total: usize) -> bool {
    if expected.len() != total {
        return false;
    }
    let mut rest = expected;
    for segment in segments {
        let (head, tail) = rest.split_at(segment.len());
        if head != *segment {
            return false;
        }
        rest = tail;
    }
    true
}
