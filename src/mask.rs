//! Association mask — which model-entity kinds a definition may attach to.

use serde::{Deserialize, Serialize};

/// Bitmask of model-entity kinds.
///
/// The wire form is a letter string, one letter per set bit:
/// `d`omain, `b`oundary, `m`odel, `r`egion, `f`ace, `e`dge, `v`ertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssociationMask(u8);

impl AssociationMask {
    pub const DOMAIN: AssociationMask = AssociationMask(0x40);
    pub const BOUNDARY: AssociationMask = AssociationMask(0x20);
    pub const MODEL: AssociationMask = AssociationMask(0x10);
    pub const REGION: AssociationMask = AssociationMask(0x08);
    pub const FACE: AssociationMask = AssociationMask(0x04);
    pub const EDGE: AssociationMask = AssociationMask(0x02);
    pub const VERTEX: AssociationMask = AssociationMask(0x01);
    pub const NONE: AssociationMask = AssociationMask(0);
    pub const ANY: AssociationMask = AssociationMask(0x7f);

    const LETTERS: [(u8, char); 7] = [
        (0x40, 'd'),
        (0x20, 'b'),
        (0x10, 'm'),
        (0x08, 'r'),
        (0x04, 'f'),
        (0x02, 'e'),
        (0x01, 'v'),
    ];

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: AssociationMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: AssociationMask) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: AssociationMask) {
        self.0 &= !other.0;
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Parse the letter form. Unknown letters are ignored.
    pub fn from_letters(s: &str) -> AssociationMask {
        let mut bits = 0u8;
        for c in s.chars() {
            if let Some((b, _)) = Self::LETTERS.iter().find(|(_, l)| *l == c) {
                bits |= b;
            }
        }
        AssociationMask(bits)
    }

    /// Letter form, high bit first (`d` before `v`).
    pub fn to_letters(self) -> String {
        Self::LETTERS
            .iter()
            .filter(|(b, _)| self.0 & b != 0)
            .map(|(_, l)| *l)
            .collect()
    }
}

impl std::ops::BitOr for AssociationMask {
    type Output = AssociationMask;

    fn bitor(self, rhs: AssociationMask) -> AssociationMask {
        AssociationMask(self.0 | rhs.0)
    }
}

impl std::fmt::Display for AssociationMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_letters())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letter_round_trip() {
        let m = AssociationMask::DOMAIN | AssociationMask::FACE | AssociationMask::VERTEX;
        assert_eq!(m.to_letters(), "dfv");
        assert_eq!(AssociationMask::from_letters("dfv"), m);
    }

    #[test]
    fn letters_ordered_high_bit_first() {
        assert_eq!(AssociationMask::ANY.to_letters(), "dbmrfev");
        // Input order does not matter.
        assert_eq!(AssociationMask::from_letters("vefrmbd"), AssociationMask::ANY);
    }

    #[test]
    fn unknown_letters_ignored() {
        assert_eq!(AssociationMask::from_letters("xz"), AssociationMask::NONE);
    }

    #[test]
    fn contains_and_mutation() {
        let mut m = AssociationMask::NONE;
        m.insert(AssociationMask::EDGE);
        assert!(m.contains(AssociationMask::EDGE));
        assert!(!m.contains(AssociationMask::FACE));
        m.remove(AssociationMask::EDGE);
        assert!(m.is_empty());
    }

    #[test]
    fn documented_bit_values() {
        assert_eq!(AssociationMask::DOMAIN.bits(), 0x40);
        assert_eq!(AssociationMask::BOUNDARY.bits(), 0x20);
        assert_eq!(AssociationMask::MODEL.bits(), 0x10);
        assert_eq!(AssociationMask::REGION.bits(), 0x08);
        assert_eq!(AssociationMask::FACE.bits(), 0x04);
        assert_eq!(AssociationMask::EDGE.bits(), 0x02);
        assert_eq!(AssociationMask::VERTEX.bits(), 0x01);
    }
}
