use std::fmt;

use rand::Rng;

/// 128-bit random identifier for entities and resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u128);

impl ResourceId {
    pub fn new() -> Self {
        Self(rand::thread_rng().gen())
    }

    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    pub const fn as_raw(&self) -> u128 {
        self.0
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_enough() {
        let a = ResourceId::new();
        let b = ResourceId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn display_is_fixed_width_hex() {
        let id = ResourceId::from_raw(0xdead_beef);
        assert_eq!(id.to_string().len(), 32);
        assert!(id.to_string().ends_with("deadbeef"));
    }
}
