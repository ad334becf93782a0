//! Слияние выписок одного счета с удалением повторяющихся транзакций.

pub mod accumulator;
pub mod dedupe;
pub mod engine;

pub use accumulator::{Accumulator, SourceStatement};
pub use dedupe::{Fingerprint, FingerprintStrategy, FitIdStrategy, MatchStrategy, TransactionSet};
pub use engine::MergeSession;
