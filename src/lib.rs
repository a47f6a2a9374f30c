//! This is the `hposim` library.
//!
//! It answers whether the phenotypes of probands sharing variants in the same gene are more
//! similar than expected by chance, based on the information content of HPO terms in the
//! observed cohort and a permutation test.
#![deny(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![warn(missing_docs)]

pub mod analyze;
pub mod cohort;
pub mod common;
mod error;
pub mod ontology;
pub mod prepare;
pub mod similarity;
pub mod simulate;

pub use crate::error::*;
