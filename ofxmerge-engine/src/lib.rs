//! # OFX Merge
//!
//! Библиотека для слияния нескольких выгрузок OFX одного счета в одну
//! сводную выписку. Выгрузки могут покрывать пересекающиеся периоды;
//! транзакции, встречающиеся в нескольких файлах, попадают в результат
//! один раз.
//!
//! ## Поддерживаемые выписки
//!
//! - **Банковские** - `BANKMSGSRSV1/STMTTRNRS`
//! - **По кредитным картам** - `CREDITCARDMSGSRSV1/CCSTMTTRNRS`
//!
//! ## Пример использования
//!
//! ```rust,ignore
//! use ofxmerge_engine::MergeSession;
//!
//! let mut session = MergeSession::new();
//! session.add(&std::fs::read("january.ofx")?)?;
//! session.add(&std::fs::read("february.ofx")?)?;
//! let merged: Vec<u8> = session.merge()?;
//! ```

pub mod error;
pub mod types;
pub mod ofx;
pub mod merge;

pub use error::{Error, Result};
pub use types::*;
pub use ofx::OfxWriter;
pub use merge::{FingerprintStrategy, FitIdStrategy, MatchStrategy, MergeSession};
