use std::fmt;

use xxhash_rust::xxh3::{Xxh3, xxh3_64};

use crate::model::UpdateScheme;

/// Separates the tag bytes from the slot bytes so that `("a", 1)` and a tag
/// whose UTF-8 happens to end in the slot encoding never collide.
const SLOT_SEPARATOR: u8 = 0xFF;

/// Stable 64-bit identity of one physical resource.
///
/// Recomputable from `(tag, scheme, slot)` alone:
/// - `Static`: `xxh3(tag)`, independent of the slot
/// - `Dynamic`: `xxh3(tag ‖ 0xFF ‖ slot as u64 LE)`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(u64);

impl ResourceKey {
    #[must_use]
    pub fn new(tag: &str, scheme: UpdateScheme, slot: usize) -> Self {
        match scheme {
            UpdateScheme::Static => Self::fixed(tag),
            UpdateScheme::Dynamic => Self::per_slot(tag, slot),
        }
    }

    #[inline]
    #[must_use]
    pub fn fixed(tag: &str) -> Self {
        Self(xxh3_64(tag.as_bytes()))
    }

    #[must_use]
    pub fn per_slot(tag: &str, slot: usize) -> Self {
        let mut hasher = Xxh3::new();
        hasher.update(tag.as_bytes());
        hasher.update(&[SLOT_SEPARATOR]);
        hasher.update(&(slot as u64).to_le_bytes());
        Self(hasher.digest())
    }

    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceKey({:016x})", self.0)
    }
}
