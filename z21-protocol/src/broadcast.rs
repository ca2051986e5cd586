//! Broadcast categories and their two bit encodings.
//!
//! A client subscribes to categories with `LAN_SET_BROADCASTFLAGS`, which
//! carries a 32-bit wire mask. The command station persists the same
//! subscription per client as a single local byte. The two encodings do not
//! share bit positions, and several local codes overlap:
//!
//! ```text
//! category          wire         local
//! All               0x00000001   0x01
//! RBus              0x00000002   0x02
//! SystemInfo        0x00000100   0x04
//! NetAll            0x00010000   0x08
//! LocoNet           0x01000000   0x10
//! LocoNetLocos      0x02000000   0x30
//! LocoNetSwitches   0x04000000   0x50
//! LocoNetGBM        0x08000000   0x90
//! RailComAll        0x00040000   0x80
//! CANDetector       0x00080000   0xC0
//! ```
//!
//! [`SubscriptionSet`] is keyed by [`BroadcastCategory`] itself, so routing
//! never looks at either encoding.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named interest group that decides which outgoing events a client sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastCategory {
    /// Power, loco info and turnout info.
    All,
    /// R-Bus / S88 feedback changes.
    RBus,
    /// `LAN_SYSTEMSTATE_DATACHANGED`.
    SystemInfo,
    /// Every loco, without subscribing to the address first.
    NetAll,
    /// LocoNet messages without locos and switches.
    LocoNet,
    /// Loco-specific LocoNet messages.
    LocoNetLocos,
    /// Switch-specific LocoNet messages.
    LocoNetSwitches,
    /// LocoNet occupancy detectors.
    LocoNetGBM,
    /// RailCom changes for every loco.
    RailComAll,
    /// CAN occupancy detectors.
    CANDetector,
}

/// The bidirectional mapping table: `(category, wire flag, local code)`.
pub const CATEGORY_ENCODINGS: [(BroadcastCategory, u32, u8); 10] = [
    (BroadcastCategory::All, 0x0000_0001, 0x01),
    (BroadcastCategory::RBus, 0x0000_0002, 0x02),
    (BroadcastCategory::SystemInfo, 0x0000_0100, 0x04),
    (BroadcastCategory::NetAll, 0x0001_0000, 0x08),
    (BroadcastCategory::LocoNet, 0x0100_0000, 0x10),
    (BroadcastCategory::LocoNetLocos, 0x0200_0000, 0x30),
    (BroadcastCategory::LocoNetSwitches, 0x0400_0000, 0x50),
    (BroadcastCategory::LocoNetGBM, 0x0800_0000, 0x90),
    (BroadcastCategory::RailComAll, 0x0004_0000, 0x80),
    (BroadcastCategory::CANDetector, 0x0008_0000, 0xC0),
];

impl BroadcastCategory {
    /// All categories in table order.
    pub const ALL: [BroadcastCategory; 10] = [
        BroadcastCategory::All,
        BroadcastCategory::RBus,
        BroadcastCategory::SystemInfo,
        BroadcastCategory::NetAll,
        BroadcastCategory::LocoNet,
        BroadcastCategory::LocoNetLocos,
        BroadcastCategory::LocoNetSwitches,
        BroadcastCategory::LocoNetGBM,
        BroadcastCategory::RailComAll,
        BroadcastCategory::CANDetector,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// 32-bit flag used on the wire.
    pub fn wire_flag(self) -> u32 {
        CATEGORY_ENCODINGS[self.index()].1
    }

    /// Compact byte code used in persistent storage.
    pub fn local_code(self) -> u8 {
        CATEGORY_ENCODINGS[self.index()].2
    }

    /// Category for an exact wire flag.
    pub fn from_wire_flag(flag: u32) -> Option<Self> {
        CATEGORY_ENCODINGS
            .iter()
            .find(|(_, wire, _)| *wire == flag)
            .map(|(category, _, _)| *category)
    }

    /// Category for an exact local code.
    pub fn from_local_code(code: u8) -> Option<Self> {
        CATEGORY_ENCODINGS
            .iter()
            .find(|(_, _, local)| *local == code)
            .map(|(category, _, _)| *category)
    }
}

impl fmt::Display for BroadcastCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A set of subscribed categories.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SubscriptionSet(u16);

impl SubscriptionSet {
    /// The empty set (no broadcasts).
    pub const fn empty() -> Self {
        SubscriptionSet(0)
    }

    /// A set with a single category.
    pub fn only(category: BroadcastCategory) -> Self {
        let mut set = Self::empty();
        set.insert(category);
        set
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, category: BroadcastCategory) -> bool {
        self.0 & (1 << category.index()) != 0
    }

    pub fn insert(&mut self, category: BroadcastCategory) {
        self.0 |= 1 << category.index();
    }

    pub fn remove(&mut self, category: BroadcastCategory) {
        self.0 &= !(1 << category.index());
    }

    /// True when at least one of `categories` is in the set.
    pub fn contains_any(&self, categories: &[BroadcastCategory]) -> bool {
        categories.iter().any(|c| self.contains(*c))
    }

    pub fn iter(&self) -> impl Iterator<Item = BroadcastCategory> + '_ {
        BroadcastCategory::ALL
            .into_iter()
            .filter(move |c| self.contains(*c))
    }

    /// Decode a wire mask. Unknown bits are ignored.
    pub fn from_wire(mask: u32) -> Self {
        let mut set = Self::empty();
        for (category, wire, _) in CATEGORY_ENCODINGS {
            if mask & wire != 0 {
                set.insert(category);
            }
        }
        set
    }

    /// Encode as a wire mask.
    pub fn to_wire(&self) -> u32 {
        self.iter().fold(0, |mask, c| mask | c.wire_flag())
    }

    /// Decode a stored local byte.
    ///
    /// A category is present when its whole local code is contained in the
    /// byte, so `0x30` yields both `LocoNet` and `LocoNetLocos`.
    pub fn from_local(byte: u8) -> Self {
        let mut set = Self::empty();
        for (category, _, local) in CATEGORY_ENCODINGS {
            if byte & local == local {
                set.insert(category);
            }
        }
        set
    }

    /// Encode as a local byte.
    pub fn to_local(&self) -> u8 {
        self.iter().fold(0, |byte, c| byte | c.local_code())
    }
}

impl FromIterator<BroadcastCategory> for SubscriptionSet {
    fn from_iter<I: IntoIterator<Item = BroadcastCategory>>(iter: I) -> Self {
        let mut set = Self::empty();
        for category in iter {
            set.insert(category);
        }
        set
    }
}

impl fmt::Debug for SubscriptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_in_enum_order() {
        for (i, (category, _, _)) in CATEGORY_ENCODINGS.iter().enumerate() {
            assert_eq!(category.index(), i);
            assert_eq!(BroadcastCategory::ALL[i], *category);
        }
    }

    #[test]
    fn test_wire_mapping_both_directions() {
        for category in BroadcastCategory::ALL {
            let wire = category.wire_flag();
            assert_eq!(wire.count_ones(), 1, "{category} must own one wire bit");
            assert_eq!(BroadcastCategory::from_wire_flag(wire), Some(category));
            assert_eq!(SubscriptionSet::from_wire(wire), SubscriptionSet::only(category));
            assert_eq!(SubscriptionSet::only(category).to_wire(), wire);
        }
    }

    #[test]
    fn test_local_mapping_both_directions() {
        for category in BroadcastCategory::ALL {
            let local = category.local_code();
            assert_eq!(BroadcastCategory::from_local_code(local), Some(category));
            assert_eq!(SubscriptionSet::only(category).to_local(), local);
            assert!(SubscriptionSet::from_local(local).contains(category));
        }
    }

    #[test]
    fn test_local_codes_are_unique() {
        for a in BroadcastCategory::ALL {
            for b in BroadcastCategory::ALL {
                if a != b {
                    assert_ne!(a.local_code(), b.local_code());
                    assert_ne!(a.wire_flag(), b.wire_flag());
                }
            }
        }
    }

    #[test]
    fn test_overlapping_local_code_decodes_containment() {
        let set = SubscriptionSet::from_local(0x30);
        assert!(set.contains(BroadcastCategory::LocoNet));
        assert!(set.contains(BroadcastCategory::LocoNetLocos));
        assert!(!set.contains(BroadcastCategory::LocoNetSwitches));

        let set = SubscriptionSet::from_local(0x40);
        assert!(set.is_empty());
    }

    #[test]
    fn test_wire_mask_with_several_categories() {
        // All + RBus + SystemInfo, as most throttles send it.
        let set = SubscriptionSet::from_wire(0x0000_0103);
        assert_eq!(set.iter().count(), 3);
        assert!(set.contains(BroadcastCategory::All));
        assert!(set.contains(BroadcastCategory::RBus));
        assert!(set.contains(BroadcastCategory::SystemInfo));
        assert_eq!(set.to_wire(), 0x0000_0103);
        assert_eq!(set.to_local(), 0x07);
    }

    #[test]
    fn test_unknown_wire_bits_ignored() {
        // 0x04 is the per-loco RailCom subscription, not a category here.
        assert!(SubscriptionSet::from_wire(0x0000_0004).is_empty());
    }

    #[test]
    fn test_insert_remove() {
        let mut set = SubscriptionSet::empty();
        set.insert(BroadcastCategory::NetAll);
        assert!(set.contains_any(&[BroadcastCategory::All, BroadcastCategory::NetAll]));
        set.remove(BroadcastCategory::NetAll);
        assert!(set.is_empty());
    }
}
