//! MIFARE Classic protocol helpers

pub mod auth;
pub mod prng;

pub use auth::{
    parse_nr_ar, parse_nt, sector_from_block, AuthCommand, AuthParseError, KeySlotIdentity,
    KeyType,
};
pub use prng::{nonce_from_counter, prng_successor};
