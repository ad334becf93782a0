//! Состояние сеанса слияния: тип выписки, счет и принятые файлы.

use crate::error::{Error, Result};
use crate::types::{
    AccountIdentity, Balance, Header, OfxDocument, StatementResponse, StatementType, Timestamp,
    TransactionList,
};
use bigdecimal::BigDecimal;

/// Принятый входной файл.
#[derive(Debug, Clone)]
pub struct SourceStatement {
    index: usize,
    document: OfxDocument,
}

impl SourceStatement {
    /// Порядковый номер файла (с нуля).
    pub fn index(&self) -> usize {
        self.index
    }

    /// Единственная выписка файла указанного типа.
    pub fn statement(&self, statement_type: StatementType) -> Result<&StatementResponse> {
        self.document.single_statement(statement_type)
    }
}

/// Накопитель выписок одного сеанса слияния.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    statement_type: StatementType,
    header: Option<Header>,
    currency: String,
    language: Option<String>,
    account: Option<AccountIdentity>,
    sources: Vec<SourceStatement>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statement_type(&self) -> StatementType {
        self.statement_type
    }

    /// Заголовок первого принятого файла.
    pub fn header(&self) -> Header {
        self.header.unwrap_or_default()
    }

    /// Валюта последнего принятого файла.
    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Язык ответа последнего принятого файла, в котором он указан.
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn account(&self) -> Option<&AccountIdentity> {
        self.account.as_ref()
    }

    pub fn sources(&self) -> &[SourceStatement] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Проверяет документ и добавляет его в сеанс.
    ///
    /// При любой ошибке состояние накопителя не меняется.
    pub fn ingest(&mut self, document: OfxDocument) -> Result<()> {
        let statement_type = document.statement_type();
        if statement_type == StatementType::Unsupported {
            return Err(Error::UnsupportedStatement);
        }

        if !self.is_empty() && statement_type != self.statement_type {
            return Err(Error::StatementTypeMismatch {
                found: statement_type,
                expected: self.statement_type,
            });
        }

        let statement = document.single_statement(statement_type)?;

        if let Some(ref account) = self.account {
            if !account.matches(&statement.account) {
                return Err(Error::AccountMismatch(statement_type));
            }
        }

        if self.is_empty() {
            self.statement_type = statement_type;
            self.account = Some(statement.account.clone());
            self.header = Some(document.header);
        }
        self.currency = statement.currency.clone();
        if let Some(ref signon) = document.signon {
            self.language = Some(signon.language.clone());
        }

        tracing::debug!(
            "Принята выписка #{} ({}, транзакций: {})",
            self.sources.len(),
            statement_type,
            statement.transactions().len()
        );

        self.sources.push(SourceStatement {
            index: self.sources.len(),
            document,
        });

        Ok(())
    }

    /// Выписки всех принятых файлов; файлы без выписки нужного вида пропускаются.
    fn statements(&self) -> impl Iterator<Item = &StatementResponse> {
        let statement_type = self.statement_type;
        self.sources
            .iter()
            .filter_map(move |source| source.statement(statement_type).ok())
    }

    fn transaction_lists(&self) -> impl Iterator<Item = &TransactionList> {
        self.statements()
            .filter_map(|statement| statement.transaction_list.as_ref())
    }

    /// Самый ранний баланс среди файлов; `now` с нулевой суммой, если балансов нет.
    pub fn ledger_balance(&self, now: Timestamp) -> Balance {
        self.statements()
            .filter_map(|statement| statement.ledger_balance.as_ref())
            .min_by_key(|balance| balance.as_of)
            .cloned()
            .unwrap_or_else(|| Balance {
                amount: BigDecimal::from(0),
                as_of: now,
            })
    }

    /// Начало периода: самое позднее начало среди файлов.
    pub fn window_start(&self, now: Timestamp) -> Timestamp {
        self.transaction_lists()
            .map(|list| list.start)
            .max()
            .unwrap_or(now)
    }

    /// Конец периода: самый ранний конец среди файлов.
    pub fn window_end(&self, now: Timestamp) -> Timestamp {
        self.transaction_lists()
            .map(|list| list.end)
            .min()
            .unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ofx::parser::{parse_amount, parse_date};
    use crate::types::{BankAccount, CreditCardAccount, Message, Status};

    fn bank_account(account_id: &str) -> AccountIdentity {
        AccountIdentity::Bank(BankAccount {
            bank_id: "121000358".to_string(),
            branch_id: None,
            account_id: account_id.to_string(),
            account_type: "CHECKING".to_string(),
            account_key: None,
        })
    }

    fn statement(
        account: AccountIdentity,
        currency: &str,
        window: Option<(&str, &str)>,
        as_of: Option<&str>,
    ) -> StatementResponse {
        StatementResponse {
            trn_uid: "1".to_string(),
            status: Status::success(),
            currency: currency.to_string(),
            account,
            transaction_list: window.map(|(start, end)| TransactionList {
                start: parse_date(start).unwrap(),
                end: parse_date(end).unwrap(),
                transactions: Vec::new(),
            }),
            ledger_balance: as_of.map(|date| Balance {
                amount: parse_amount("100.00").unwrap(),
                as_of: parse_date(date).unwrap(),
            }),
            available_balance: None,
        }
    }

    fn document(statement: StatementResponse) -> OfxDocument {
        let is_card = statement.statement_type() == StatementType::CreditCard;
        let messages = vec![Message::Statement(statement)];
        let (bank, credit_card) = if is_card {
            (Vec::new(), messages)
        } else {
            (messages, Vec::new())
        };
        OfxDocument {
            header: Header::default(),
            signon: None,
            bank,
            credit_card,
        }
    }

    fn bank_document(account_id: &str) -> OfxDocument {
        document(statement(bank_account(account_id), "USD", None, None))
    }

    #[test]
    fn test_first_ingest_binds_session() {
        let mut acc = Accumulator::new();
        acc.ingest(bank_document("100")).unwrap();

        assert_eq!(acc.statement_type(), StatementType::Bank);
        assert_eq!(acc.account(), Some(&bank_account("100")));
        assert_eq!(acc.sources().len(), 1);
        assert_eq!(acc.sources()[0].index(), 0);
    }

    #[test]
    fn test_account_mismatch_leaves_state_unchanged() {
        let mut acc = Accumulator::new();
        acc.ingest(bank_document("100")).unwrap();

        let mut other = statement(bank_account("100"), "EUR", None, None);
        if let AccountIdentity::Bank(ref mut bank) = other.account {
            bank.branch_id = Some("7".to_string());
        }

        let err = acc.ingest(document(other)).unwrap_err();
        assert!(matches!(err, Error::AccountMismatch(StatementType::Bank)));
        assert_eq!(acc.sources().len(), 1);
        assert_eq!(acc.currency(), "USD");
    }

    #[test]
    fn test_bank_id_mismatch() {
        let mut acc = Accumulator::new();
        acc.ingest(bank_document("100")).unwrap();

        let mut other = statement(bank_account("100"), "USD", None, None);
        if let AccountIdentity::Bank(ref mut bank) = other.account {
            bank.bank_id = "026009593".to_string();
        }

        assert!(matches!(
            acc.ingest(document(other)),
            Err(Error::AccountMismatch(StatementType::Bank))
        ));
        assert_eq!(acc.sources().len(), 1);
    }

    #[test]
    fn test_credit_card_account_key_mismatch() {
        let card = |key: &str| {
            AccountIdentity::CreditCard(CreditCardAccount {
                account_id: "4111111111111111".to_string(),
                account_key: Some(key.to_string()),
            })
        };

        let mut acc = Accumulator::new();
        acc.ingest(document(statement(card("K1"), "USD", None, None)))
            .unwrap();
        acc.ingest(document(statement(card("K1"), "USD", None, None)))
            .unwrap();

        let err = acc
            .ingest(document(statement(card("K2"), "USD", None, None)))
            .unwrap_err();
        assert!(matches!(err, Error::AccountMismatch(StatementType::CreditCard)));
        assert_eq!(acc.sources().len(), 2);
        assert_eq!(acc.account(), Some(&card("K1")));
    }

    #[test]
    fn test_account_match_is_case_sensitive() {
        let mut acc = Accumulator::new();
        acc.ingest(bank_document("abc")).unwrap();
        assert!(acc.ingest(bank_document("ABC")).is_err());
    }

    #[test]
    fn test_type_mismatch() {
        let mut acc = Accumulator::new();
        acc.ingest(bank_document("100")).unwrap();

        let card = AccountIdentity::CreditCard(CreditCardAccount {
            account_id: "100".to_string(),
            account_key: None,
        });
        let err = acc.ingest(document(statement(card, "USD", None, None))).unwrap_err();

        assert!(matches!(
            err,
            Error::StatementTypeMismatch {
                found: StatementType::CreditCard,
                expected: StatementType::Bank,
            }
        ));
        assert_eq!(acc.sources().len(), 1);
    }

    #[test]
    fn test_unsupported_document() {
        let mut acc = Accumulator::new();
        let empty = OfxDocument {
            header: Header::default(),
            signon: None,
            bank: vec![Message::Other("STMTENDTRNRS".to_string())],
            credit_card: Vec::new(),
        };
        assert!(matches!(acc.ingest(empty), Err(Error::UnsupportedStatement)));
        assert!(acc.is_empty());
    }

    #[test]
    fn test_multiple_statements_are_malformed() {
        let mut acc = Accumulator::new();
        let mut doc = bank_document("100");
        doc.bank.push(doc.bank[0].clone());

        assert!(matches!(
            acc.ingest(doc),
            Err(Error::MalformedStatement(StatementType::Bank))
        ));
        assert!(acc.is_empty());
    }

    #[test]
    fn test_currency_last_write_wins() {
        let mut acc = Accumulator::new();
        acc.ingest(document(statement(bank_account("1"), "USD", None, None)))
            .unwrap();
        acc.ingest(document(statement(bank_account("1"), "CAD", None, None)))
            .unwrap();
        assert_eq!(acc.currency(), "CAD");
    }

    #[test]
    fn test_date_window_reconciliation() {
        let mut acc = Accumulator::new();
        acc.ingest(document(statement(
            bank_account("1"),
            "USD",
            Some(("20240105", "20240120")),
            Some("20240110"),
        )))
        .unwrap();
        acc.ingest(document(statement(
            bank_account("1"),
            "USD",
            Some(("20240101", "20240125")),
            Some("20240112"),
        )))
        .unwrap();

        let now = parse_date("20250101").unwrap();
        assert_eq!(acc.window_start(now), parse_date("20240105").unwrap());
        assert_eq!(acc.window_end(now), parse_date("20240120").unwrap());
        assert_eq!(acc.ledger_balance(now).as_of, parse_date("20240110").unwrap());
    }

    #[test]
    fn test_date_defaults_to_now() {
        let mut acc = Accumulator::new();
        acc.ingest(bank_document("1")).unwrap();

        let now = parse_date("20250101").unwrap();
        assert_eq!(acc.window_start(now), now);
        assert_eq!(acc.window_end(now), now);
        let balance = acc.ledger_balance(now);
        assert_eq!(balance.as_of, now);
        assert_eq!(balance.amount, BigDecimal::from(0));
    }

    #[test]
    fn test_sources_without_window_are_skipped() {
        let mut acc = Accumulator::new();
        acc.ingest(bank_document("1")).unwrap();
        acc.ingest(document(statement(
            bank_account("1"),
            "USD",
            Some(("20240101", "20240125")),
            None,
        )))
        .unwrap();

        let now = parse_date("20250101").unwrap();
        assert_eq!(acc.window_start(now), parse_date("20240101").unwrap());
        assert_eq!(acc.window_end(now), parse_date("20240125").unwrap());
        assert_eq!(acc.ledger_balance(now).as_of, now);
    }
}
