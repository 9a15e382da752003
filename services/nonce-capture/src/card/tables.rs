//! Static capability tables
//!
//! Chips answering GET_VERSION are matched on product type, subtype and
//! storage size; everything else falls back to ATQA/SAK. Version matches take
//! precedence.

use super::types::{CardCapability, CardSignature, CardType, FeatureSet};

/// Returned when nothing in the tables matches
pub const UNKNOWN_CARD: CardCapability = CardCapability {
    card_type: CardType::Unknown,
    total_pages: 0,
    features: FeatureSet::NONE,
};

const CLASSIC_FEATURES: FeatureSet = FeatureSet::CRYPTO1_AUTH.union(FeatureSet::SECTOR_TRAILERS);

const UL_EV1_FEATURES: FeatureSet = FeatureSet::READ_VERSION
    .union(FeatureSet::READ_SIGNATURE)
    .union(FeatureSet::READ_COUNTER)
    .union(FeatureSet::CHECK_TEARING)
    .union(FeatureSet::FAST_READ)
    .union(FeatureSet::INC_COUNTER)
    .union(FeatureSet::PASSWORD_AUTH)
    .union(FeatureSet::COMPAT_WRITE);

const NTAG21X_FEATURES: FeatureSet = FeatureSet::READ_VERSION
    .union(FeatureSet::READ_SIGNATURE)
    .union(FeatureSet::READ_COUNTER)
    .union(FeatureSet::FAST_READ)
    .union(FeatureSet::PASSWORD_AUTH)
    .union(FeatureSet::COMPAT_WRITE);

const NTAG_I2C_FEATURES: FeatureSet = FeatureSet::READ_VERSION
    .union(FeatureSet::FAST_READ)
    .union(FeatureSet::COMPAT_WRITE);

/// Match on the GET_VERSION response (bytes 2, 3 and 6)
struct VersionEntry {
    product_type: u8,
    product_subtype: Option<u8>,
    storage_size: u8,
    capability: CardCapability,
}

/// Match on activation parameters
struct AtqaSakEntry {
    /// Accepted values of ATQA byte 0 (bits 0..4 anticollision / UID size)
    atqa0: &'static [u8],
    atqa1: u8,
    sak: &'static [u8],
    capability: CardCapability,
}

const fn cap(card_type: CardType, total_pages: u16, features: FeatureSet) -> CardCapability {
    CardCapability {
        card_type,
        total_pages,
        features,
    }
}

static VERSION_TABLE: &[VersionEntry] = &[
    VersionEntry {
        product_type: 0x03,
        product_subtype: None,
        storage_size: 0x0B,
        capability: cap(CardType::MifareUltralightEv1_11, 20, UL_EV1_FEATURES),
    },
    VersionEntry {
        product_type: 0x03,
        product_subtype: None,
        storage_size: 0x0E,
        capability: cap(CardType::MifareUltralightEv1_21, 41, UL_EV1_FEATURES),
    },
    VersionEntry {
        product_type: 0x04,
        product_subtype: Some(0x01),
        storage_size: 0x0B,
        capability: cap(CardType::Ntag210, 20, NTAG21X_FEATURES),
    },
    VersionEntry {
        product_type: 0x04,
        product_subtype: Some(0x01),
        storage_size: 0x0E,
        capability: cap(CardType::Ntag212, 41, NTAG21X_FEATURES),
    },
    VersionEntry {
        product_type: 0x04,
        product_subtype: Some(0x02),
        storage_size: 0x0F,
        capability: cap(CardType::Ntag213, 45, NTAG21X_FEATURES),
    },
    VersionEntry {
        product_type: 0x04,
        product_subtype: Some(0x02),
        storage_size: 0x11,
        capability: cap(CardType::Ntag215, 135, NTAG21X_FEATURES),
    },
    VersionEntry {
        product_type: 0x04,
        product_subtype: Some(0x02),
        storage_size: 0x13,
        capability: cap(CardType::Ntag216, 231, NTAG21X_FEATURES),
    },
    VersionEntry {
        product_type: 0x04,
        product_subtype: Some(0x05),
        storage_size: 0x13,
        capability: cap(CardType::NtagI2c1k, 231, NTAG_I2C_FEATURES),
    },
    VersionEntry {
        product_type: 0x04,
        product_subtype: Some(0x05),
        storage_size: 0x15,
        capability: cap(CardType::NtagI2c2k, 485, NTAG_I2C_FEATURES),
    },
];

static ATQA_SAK_TABLE: &[AtqaSakEntry] = &[
    AtqaSakEntry {
        atqa0: &[0x04, 0x44],
        atqa1: 0x00,
        sak: &[0x09, 0x89],
        capability: cap(CardType::MifareMini, 20, CLASSIC_FEATURES),
    },
    AtqaSakEntry {
        atqa0: &[0x04, 0x44],
        atqa1: 0x00,
        sak: &[0x08, 0x88, 0x28],
        capability: cap(CardType::MifareClassic1k, 64, CLASSIC_FEATURES),
    },
    // TNP3xxx toys answer with a vendor ATQA
    AtqaSakEntry {
        atqa0: &[0x01],
        atqa1: 0x0F,
        sak: &[0x01],
        capability: cap(CardType::MifareClassic1k, 64, CLASSIC_FEATURES),
    },
    AtqaSakEntry {
        atqa0: &[0x02, 0x42],
        atqa1: 0x00,
        sak: &[0x19],
        capability: cap(CardType::MifareClassic2k, 128, CLASSIC_FEATURES),
    },
    AtqaSakEntry {
        atqa0: &[0x02, 0x42],
        atqa1: 0x00,
        sak: &[0x18, 0x98, 0x38],
        capability: cap(CardType::MifareClassic4k, 256, CLASSIC_FEATURES),
    },
    AtqaSakEntry {
        atqa0: &[0x04, 0x44],
        atqa1: 0x00,
        sak: &[0x10],
        capability: cap(CardType::MifarePlus2kSl2, 128, CLASSIC_FEATURES),
    },
    AtqaSakEntry {
        atqa0: &[0x02, 0x42],
        atqa1: 0x00,
        sak: &[0x11],
        capability: cap(CardType::MifarePlus4kSl2, 256, CLASSIC_FEATURES),
    },
    AtqaSakEntry {
        atqa0: &[0x44],
        atqa1: 0x00,
        sak: &[0x00],
        capability: cap(CardType::MifareUltralight, 16, FeatureSet::COMPAT_WRITE),
    },
    AtqaSakEntry {
        atqa0: &[0x44],
        atqa1: 0x03,
        sak: &[0x20],
        capability: cap(CardType::MifareDesfire, 0, FeatureSet::AES_AUTH),
    },
];

/// Look up the capability descriptor for an observed card signature
pub fn lookup(signature: &CardSignature) -> &'static CardCapability {
    if let Some(version) = signature.version {
        if let Some(entry) = VERSION_TABLE.iter().find(|e| {
            version[2] == e.product_type
                && e.product_subtype.map_or(true, |st| version[3] == st)
                && version[6] == e.storage_size
        }) {
            return &entry.capability;
        }
    }

    ATQA_SAK_TABLE
        .iter()
        .find(|e| {
            e.atqa0.contains(&signature.atqa[0])
                && e.atqa1 == signature.atqa[1]
                && e.sak.contains(&signature.sak)
        })
        .map(|e| &e.capability)
        .unwrap_or(&UNKNOWN_CARD)
}
