//! Сеанс слияния выписок.

use crate::error::{Error, Result};
use crate::merge::accumulator::Accumulator;
use crate::merge::dedupe::{FingerprintStrategy, MatchStrategy, TransactionSet};
use crate::types::{
    Message, OfxDocument, SignonResponse, StatementResponse, StatementType, Status, Timestamp,
    TransactionList, DEFAULT_LANGUAGE,
};
use chrono::Local;

/// Сеанс слияния: выписки добавляются по одной, затем сеанс
/// поглощается методом [`MergeSession::merge`].
#[derive(Debug, Default)]
pub struct MergeSession<S = FingerprintStrategy> {
    strategy: S,
    accumulator: Accumulator,
}

impl MergeSession<FingerprintStrategy> {
    pub fn new() -> Self {
        Self::with_strategy(FingerprintStrategy)
    }
}

impl<S: MatchStrategy> MergeSession<S> {
    /// Создает сеанс с заданной стратегией сопоставления транзакций.
    pub fn with_strategy(strategy: S) -> Self {
        Self {
            strategy,
            accumulator: Accumulator::new(),
        }
    }

    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    /// Разбирает файл OFX и добавляет его выписку в сеанс.
    pub fn add(&mut self, raw: &[u8]) -> Result<()> {
        let document = OfxDocument::from_bytes(raw)?;
        self.add_document(document)
    }

    /// Добавляет уже разобранный документ.
    pub fn add_document(&mut self, document: OfxDocument) -> Result<()> {
        self.accumulator.ingest(document).inspect_err(|e| {
            tracing::warn!("Выписка #{} отклонена: {}", self.accumulator.sources().len(), e)
        })
    }

    /// Сливает принятые выписки и сериализует результат.
    ///
    /// Для пустого сеанса возвращается пустой результат.
    pub fn merge(self) -> Result<Vec<u8>> {
        self.merge_at(Local::now().into())
    }

    /// То же, что [`MergeSession::merge`], с явным текущим временем.
    pub fn merge_at(self, now: Timestamp) -> Result<Vec<u8>> {
        let Some(document) = self.merge_document(now)? else {
            return Ok(Vec::new());
        };

        let mut bytes = Vec::new();
        document.write_to(&mut bytes).map_err(|e| match e {
            Error::Io(err) => Error::Encode(err.to_string()),
            other => other,
        })?;

        Ok(bytes)
    }

    /// Строит сводный документ; `None`, если не было принято ни одной выписки.
    pub fn merge_document(self, now: Timestamp) -> Result<Option<OfxDocument>> {
        let acc = &self.accumulator;
        let statement_type = acc.statement_type();

        let Some(account) = acc.account() else {
            return Ok(None);
        };
        if statement_type == StatementType::Unsupported {
            return Ok(None);
        }

        let mut statement = StatementResponse {
            trn_uid: uuid::Uuid::new_v4().to_string(),
            status: Status::success(),
            currency: acc.currency().to_string(),
            account: account.clone(),
            transaction_list: None,
            ledger_balance: Some(acc.ledger_balance(now)),
            available_balance: None,
        };

        let mut list = TransactionList {
            start: acc.window_start(now),
            end: acc.window_end(now),
            transactions: Vec::new(),
        };

        let transactions = TransactionSet::with_strategy(self.strategy);
        for source in acc.sources() {
            let mut dropped = 0;
            for transaction in source.statement(statement_type)?.transactions() {
                if transactions.is_duplicate(source.index(), transaction) {
                    dropped += 1;
                    continue;
                }
                list.transactions.push(transaction.clone());
            }
            tracing::debug!(
                "Выписка #{}: отброшено дубликатов: {}",
                source.index(),
                dropped
            );
        }

        tracing::debug!(
            "Слияние {} выписок: транзакций в результате: {}, различных ключей: {}",
            acc.sources().len(),
            list.transactions.len(),
            transactions.len()
        );
        statement.transaction_list = Some(list);

        let signon = SignonResponse {
            status: Status::success(),
            server_date: now,
            language: acc
                .language()
                .unwrap_or(DEFAULT_LANGUAGE)
                .to_string(),
            institution: None,
        };

        let messages = vec![Message::Statement(statement)];
        let (bank, credit_card) = match statement_type {
            StatementType::CreditCard => (Vec::new(), messages),
            _ => (messages, Vec::new()),
        };

        Ok(Some(OfxDocument {
            header: acc.header(),
            signon: Some(signon),
            bank,
            credit_card,
        }))
    }
}
