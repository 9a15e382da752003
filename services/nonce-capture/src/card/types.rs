//! Card model data types

use std::fmt;
use std::ops::BitOr;

/// Broad tag family, decides how a captured exchange is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagFamily {
    MifareClassic,
    MifareUltralight,
    Ntag,
    MifareDesfire,
    Unknown,
}

impl TagFamily {
    /// Ultralight and NTAG share the 0x60 opcode for GET_VERSION
    pub fn uses_get_version(&self) -> bool {
        matches!(self, Self::MifareUltralight | Self::Ntag)
    }
}

/// Concrete chip model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardType {
    MifareMini,
    MifareClassic1k,
    MifareClassic2k,
    MifareClassic4k,
    MifarePlus2kSl2,
    MifarePlus4kSl2,
    MifareUltralight,
    MifareUltralightEv1_11,
    MifareUltralightEv1_21,
    Ntag210,
    Ntag212,
    Ntag213,
    Ntag215,
    Ntag216,
    NtagI2c1k,
    NtagI2c2k,
    MifareDesfire,
    Unknown,
}

impl CardType {
    pub fn family(&self) -> TagFamily {
        match self {
            Self::MifareMini
            | Self::MifareClassic1k
            | Self::MifareClassic2k
            | Self::MifareClassic4k
            | Self::MifarePlus2kSl2
            | Self::MifarePlus4kSl2 => TagFamily::MifareClassic,
            Self::MifareUltralight | Self::MifareUltralightEv1_11 | Self::MifareUltralightEv1_21 => {
                TagFamily::MifareUltralight
            }
            Self::Ntag210
            | Self::Ntag212
            | Self::Ntag213
            | Self::Ntag215
            | Self::Ntag216
            | Self::NtagI2c1k
            | Self::NtagI2c2k => TagFamily::Ntag,
            Self::MifareDesfire => TagFamily::MifareDesfire,
            Self::Unknown => TagFamily::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MifareMini => "Mifare Mini",
            Self::MifareClassic1k => "Mifare Classic 1K",
            Self::MifareClassic2k => "Mifare Classic 2K",
            Self::MifareClassic4k => "Mifare Classic 4K",
            Self::MifarePlus2kSl2 => "Mifare Plus 2K (SL2)",
            Self::MifarePlus4kSl2 => "Mifare Plus 4K (SL2)",
            Self::MifareUltralight => "Mifare Ultralight",
            Self::MifareUltralightEv1_11 => "Mifare Ultralight EV1 11",
            Self::MifareUltralightEv1_21 => "Mifare Ultralight EV1 21",
            Self::Ntag210 => "NTAG210",
            Self::Ntag212 => "NTAG212",
            Self::Ntag213 => "NTAG213",
            Self::Ntag215 => "NTAG215",
            Self::Ntag216 => "NTAG216",
            Self::NtagI2c1k => "NTAG I2C 1K",
            Self::NtagI2c2k => "NTAG I2C 2K",
            Self::MifareDesfire => "Mifare DESFire",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bitset of optional commands a chip supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FeatureSet(u32);

impl FeatureSet {
    pub const NONE: Self = Self(0);
    pub const READ_VERSION: Self = Self(1 << 0);
    pub const READ_SIGNATURE: Self = Self(1 << 1);
    pub const READ_COUNTER: Self = Self(1 << 2);
    pub const CHECK_TEARING: Self = Self(1 << 3);
    pub const FAST_READ: Self = Self(1 << 4);
    pub const INC_COUNTER: Self = Self(1 << 5);
    pub const PASSWORD_AUTH: Self = Self(1 << 6);
    pub const CRYPTO1_AUTH: Self = Self(1 << 7);
    pub const AES_AUTH: Self = Self(1 << 8);
    pub const COMPAT_WRITE: Self = Self(1 << 9);
    pub const SECTOR_TRAILERS: Self = Self(1 << 10);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for FeatureSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// What the capability tables know about a chip model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardCapability {
    pub card_type: CardType,
    /// 16-byte blocks for Classic, 4-byte pages for Ultralight/NTAG
    pub total_pages: u16,
    pub features: FeatureSet,
}

impl CardCapability {
    pub fn family(&self) -> TagFamily {
        self.card_type.family()
    }

    pub fn supports_crypto1(&self) -> bool {
        self.features.contains(FeatureSet::CRYPTO1_AUTH)
    }
}

/// Signature observed during activation, the lookup key of the tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CardSignature {
    /// GET_VERSION response, only answered by Ultralight EV1 / NTAG
    pub version: Option<[u8; 8]>,
    /// ATQA as transmitted (LSB first)
    pub atqa: [u8; 2],
    pub sak: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_set() {
        let set = FeatureSet::READ_VERSION | FeatureSet::FAST_READ;
        assert!(set.contains(FeatureSet::READ_VERSION));
        assert!(set.contains(FeatureSet::FAST_READ));
        assert!(!set.contains(FeatureSet::CRYPTO1_AUTH));
        assert!(!set.contains(FeatureSet::READ_VERSION | FeatureSet::CRYPTO1_AUTH));
        assert_eq!(set.bits(), 0b1_0001);
        assert!(FeatureSet::NONE.is_empty());
    }

    #[test]
    fn test_family() {
        assert_eq!(CardType::MifarePlus2kSl2.family(), TagFamily::MifareClassic);
        assert_eq!(CardType::NtagI2c2k.family(), TagFamily::Ntag);
        assert!(TagFamily::Ntag.uses_get_version());
        assert!(!TagFamily::MifareClassic.uses_get_version());
    }
}
