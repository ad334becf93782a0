//! Поиск повторяющихся транзакций между файлами.

use crate::types::Transaction;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Разделитель полей отпечатка; не встречается в текстовых полях OFX.
const FIELD_SEPARATOR: char = '\u{1f}';

/// Ключ, приближенно идентифицирующий транзакцию между файлами.
///
/// Составной отпечаток и FITID никогда не совпадают друг с другом,
/// даже если их текст одинаков.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    /// Тип, день проводки, получатель и сумма
    Composite(String),
    /// Идентификатор транзакции банка
    FitId(String),
}

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        match self {
            Fingerprint::Composite(key) | Fingerprint::FitId(key) => key,
        }
    }
}

/// Стратегия сопоставления транзакций.
pub trait MatchStrategy {
    /// Ключ, по которому транзакции из разных файлов считаются одинаковыми.
    fn fingerprint(&self, transaction: &Transaction) -> Fingerprint;
}

/// Отпечаток из типа, календарного дня проводки, получателя и суммы.
///
/// Идентификатор FITID не используется: при повторной выгрузке банки
/// нередко присваивают той же транзакции другой идентификатор.
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintStrategy;

impl MatchStrategy for FingerprintStrategy {
    fn fingerprint(&self, transaction: &Transaction) -> Fingerprint {
        let amount = transaction.amount.normalized();
        // 100 нормализуется в 1E+2
        let amount = if amount.as_bigint_and_exponent().1 < 0 {
            amount.with_scale(0)
        } else {
            amount
        };

        Fingerprint::Composite(format!(
            "{}{sep}{}{sep}{}{sep}{}",
            transaction.trn_type,
            transaction.posted.format("%Y-%m-%d"),
            transaction.name.as_deref().unwrap_or_default(),
            amount,
            sep = FIELD_SEPARATOR,
        ))
    }
}

/// Сопоставление по FITID, если он есть, иначе по отпечатку.
#[derive(Debug, Clone, Copy, Default)]
pub struct FitIdStrategy;

impl MatchStrategy for FitIdStrategy {
    fn fingerprint(&self, transaction: &Transaction) -> Fingerprint {
        let fit_id = transaction.fit_id.trim();
        if fit_id.is_empty() {
            return FingerprintStrategy.fingerprint(transaction);
        }
        Fingerprint::FitId(fit_id.to_string())
    }
}

/// Индекс уже принятых транзакций: отпечаток -> номер файла, в котором он
/// встретился впервые.
#[derive(Debug, Default)]
pub struct TransactionSet<S = FingerprintStrategy> {
    strategy: S,
    seen: RwLock<HashMap<Fingerprint, usize>>,
}

impl TransactionSet<FingerprintStrategy> {
    pub fn new() -> Self {
        Self::with_strategy(FingerprintStrategy)
    }
}

impl<S: MatchStrategy> TransactionSet<S> {
    pub fn with_strategy(strategy: S) -> Self {
        Self {
            strategy,
            seen: RwLock::new(HashMap::new()),
        }
    }

    /// Проверяет, была ли транзакция уже принята из другого файла.
    ///
    /// Повторы внутри одного файла дубликатами не считаются: одинаковые
    /// покупки в один день на одну сумму вполне реальны.
    pub fn is_duplicate(&self, source_index: usize, transaction: &Transaction) -> bool {
        let fingerprint = self.strategy.fingerprint(transaction);

        let first_seen = self
            .seen
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&fingerprint)
            .copied();

        let first_seen = match first_seen {
            Some(index) => index,
            None => *self
                .seen
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(fingerprint)
                .or_insert(source_index),
        };

        first_seen != source_index
    }

    /// Количество различных отпечатков.
    pub fn len(&self) -> usize {
        self.seen
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ofx::parser::{parse_amount, parse_date};

    fn transaction(posted: &str, name: &str, amount: &str) -> Transaction {
        Transaction {
            trn_type: "DEBIT".to_string(),
            posted: parse_date(posted).unwrap(),
            user_date: None,
            available: None,
            amount: parse_amount(amount).unwrap(),
            fit_id: format!("{}-{}", posted, name),
            check_number: None,
            reference_number: None,
            name: Some(name.to_string()),
            memo: None,
        }
    }

    #[test]
    fn test_first_sighting_is_not_duplicate() {
        let set = TransactionSet::new();
        assert!(!set.is_duplicate(0, &transaction("20240105", "SHOP", "-10.00")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_repeat_in_same_source_is_kept() {
        let set = TransactionSet::new();
        let tx = transaction("20240105", "SHOP", "-10.00");
        assert!(!set.is_duplicate(0, &tx));
        assert!(!set.is_duplicate(0, &tx));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_repeat_in_other_source_is_duplicate() {
        let set = TransactionSet::new();
        let tx = transaction("20240105", "SHOP", "-10.00");
        assert!(!set.is_duplicate(0, &tx));
        assert!(set.is_duplicate(1, &tx));
        // Первый файл сохраняет право на транзакцию
        assert!(!set.is_duplicate(0, &tx));
    }

    #[test]
    fn test_fingerprint_truncates_to_day() {
        let morning = transaction("20240105080000", "SHOP", "-10.00");
        let evening = transaction("20240105200000", "SHOP", "-10.00");
        assert_eq!(
            FingerprintStrategy.fingerprint(&morning),
            FingerprintStrategy.fingerprint(&evening)
        );
    }

    #[test]
    fn test_fingerprint_canonical_amount() {
        let a = transaction("20240105", "SHOP", "-10.50");
        let b = transaction("20240105", "SHOP", "-10.5");
        assert_eq!(FingerprintStrategy.fingerprint(&a), FingerprintStrategy.fingerprint(&b));

        let c = transaction("20240105", "SHOP", "100.00");
        assert!(FingerprintStrategy.fingerprint(&c).as_str().ends_with("100"));
    }

    #[test]
    fn test_fingerprint_distinguishes_fields() {
        let base = transaction("20240105", "SHOP", "-10.00");
        let other_day = transaction("20240106", "SHOP", "-10.00");
        let other_name = transaction("20240105", "CAFE", "-10.00");
        let other_amount = transaction("20240105", "SHOP", "10.00");
        let mut other_type = base.clone();
        other_type.trn_type = "POS".to_string();

        let key = FingerprintStrategy.fingerprint(&base);
        for tx in [other_day, other_name, other_amount, other_type] {
            assert_ne!(key, FingerprintStrategy.fingerprint(&tx));
        }
    }

    #[test]
    fn test_fit_id_strategy() {
        let set = TransactionSet::with_strategy(FitIdStrategy);
        let tx = transaction("20240105", "SHOP", "-10.00");
        let mut same_shape = tx.clone();
        same_shape.fit_id = "OTHER".to_string();

        assert!(!set.is_duplicate(0, &tx));
        assert!(!set.is_duplicate(1, &same_shape));
        assert!(set.is_duplicate(1, &tx));

        let mut no_id = tx.clone();
        no_id.fit_id = String::new();
        assert_eq!(
            FitIdStrategy.fingerprint(&no_id),
            FingerprintStrategy.fingerprint(&no_id)
        );
    }

    #[test]
    fn test_fit_id_never_matches_composite_key() {
        let mut odd_type = transaction("20240105", "SHOP", "-10.00");
        odd_type.trn_type = "FITID".to_string();
        odd_type.fit_id = String::new();

        let composite = FitIdStrategy.fingerprint(&odd_type);
        let mut with_id = odd_type.clone();
        with_id.fit_id = composite.as_str().to_string();
        let by_id = FitIdStrategy.fingerprint(&with_id);

        assert_eq!(composite.as_str(), by_id.as_str());
        assert_ne!(composite, by_id);

        let set = TransactionSet::with_strategy(FitIdStrategy);
        assert!(!set.is_duplicate(0, &odd_type));
        assert!(!set.is_duplicate(1, &with_id));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_shared_between_threads() {
        let set = TransactionSet::new();
        let tx = transaction("20240105", "SHOP", "-10.00");

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| set.is_duplicate(0, &tx));
            }
        });

        assert!(set.is_duplicate(1, &tx));
        assert_eq!(set.len(), 1);
    }
}
