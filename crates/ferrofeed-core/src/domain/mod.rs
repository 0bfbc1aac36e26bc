//! # Domain Models
//!
//! Canonical types shared by the fetch, normalization and persistence layers.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Validated instrument ticker |
//! | [`UtcDateTime`] | Second-precision UTC timestamp with lenient provider parsing |
//! | [`CanonicalRecord`] | Normalized observation keyed by symbol, endpoint and time |
//! | [`ParsedValue`] | Flattened numeric, text or null field |
//! | [`QualityFlag`] | `success`, `partial`, `empty` or `error` |

mod record;
mod symbol;
mod timestamp;

pub use record::{CanonicalRecord, ParsedValue, QualityFlag};
pub use symbol::Symbol;
pub use timestamp::UtcDateTime;
