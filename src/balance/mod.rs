//! Corpus rebalancing passes.
//!
//! Two directions: [`oversample`] multiplies rare-class images through
//! augmentation, [`undersample`] thins overrepresented sequences through
//! deterministic deletion. Both operate in place on an existing corpus tree.

pub mod oversample;
pub mod undersample;
