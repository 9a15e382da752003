//! Card model and capability tables

mod tables;
mod types;

pub use tables::{lookup, UNKNOWN_CARD};
pub use types::{CardCapability, CardSignature, CardType, FeatureSet, TagFamily};
