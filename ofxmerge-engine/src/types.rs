//! Базовые типы данных для представления документов OFX.

use crate::error::{Error, Result};
use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset};
use std::fmt;

// =============================================================================
// Константы OFX
// =============================================================================

/// Код успешного статуса.
pub const STATUS_CODE_SUCCESS: u32 = 0;
/// Уровень важности статуса: информационный.
pub const SEVERITY_INFO: &str = "INFO";
/// Язык ответа по умолчанию.
pub const DEFAULT_LANGUAGE: &str = "ENG";

/// Версия OFX 1.02 (SGML).
pub const VERSION_SGML: u16 = 102;
/// Версия OFX 2.2 (XML).
pub const VERSION_XML: u16 = 220;

/// Момент времени с явным смещением часового пояса.
pub type Timestamp = DateTime<FixedOffset>;

// =============================================================================
// Заголовок и служебные агрегаты
// =============================================================================

/// Заголовок файла OFX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Версия (102, 103, 200, 220 и т.д.).
    pub version: u16,
}

impl Header {
    /// Создает заголовок указанной версии.
    pub fn new(version: u16) -> Self {
        Self { version }
    }

    /// Версии 2.x используют XML, версии 1.x используют SGML.
    pub fn is_xml(&self) -> bool {
        self.version >= 200
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new(VERSION_SGML)
    }
}

/// Статус ответа (STATUS).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Код статуса (0 = успех).
    pub code: u32,
    /// Уровень важности (INFO, WARN, ERROR).
    pub severity: String,
    /// Текстовое сообщение сервера.
    pub message: Option<String>,
}

impl Status {
    /// Успешный статус.
    pub fn success() -> Self {
        Self {
            code: STATUS_CODE_SUCCESS,
            severity: SEVERITY_INFO.to_string(),
            message: None,
        }
    }
}

/// Финансовое учреждение (FI).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinancialInstitution {
    pub org: Option<String>,
    pub fid: Option<String>,
}

/// Ответ на вход в систему (SONRS).
#[derive(Debug, Clone, PartialEq)]
pub struct SignonResponse {
    pub status: Status,
    pub server_date: Timestamp,
    pub language: String,
    pub institution: Option<FinancialInstitution>,
}

// =============================================================================
// Счета
// =============================================================================

/// Тип выписки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatementType {
    /// Выписка не распознана.
    #[default]
    Unsupported,
    /// Банковская выписка (STMTRS).
    Bank,
    /// Выписка по кредитной карте (CCSTMTRS).
    CreditCard,
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementType::Bank => write!(f, "bank"),
            StatementType::CreditCard => write!(f, "creditcard"),
            StatementType::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Банковский счет (BANKACCTFROM).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankAccount {
    /// Идентификатор банка (BANKID, routing number).
    pub bank_id: String,
    /// Идентификатор отделения (BRANCHID).
    pub branch_id: Option<String>,
    /// Номер счета (ACCTID).
    pub account_id: String,
    /// Тип счета (CHECKING, SAVINGS и т.д.).
    pub account_type: String,
    /// Ключ счета (ACCTKEY).
    pub account_key: Option<String>,
}

/// Счет кредитной карты (CCACCTFROM).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditCardAccount {
    /// Номер счета (ACCTID).
    pub account_id: String,
    /// Ключ счета (ACCTKEY).
    pub account_key: Option<String>,
}

/// Идентификация счета, по которому составлена выписка.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountIdentity {
    Bank(BankAccount),
    CreditCard(CreditCardAccount),
}

impl AccountIdentity {
    /// Тип выписки, которому соответствует счет.
    pub fn statement_type(&self) -> StatementType {
        match self {
            AccountIdentity::Bank(_) => StatementType::Bank,
            AccountIdentity::CreditCard(_) => StatementType::CreditCard,
        }
    }

    /// Счета совпадают, если совпадают все поля (с учетом регистра).
    pub fn matches(&self, other: &AccountIdentity) -> bool {
        match (self, other) {
            (AccountIdentity::Bank(a), AccountIdentity::Bank(b)) => {
                a.bank_id == b.bank_id
                    && a.branch_id == b.branch_id
                    && a.account_id == b.account_id
                    && a.account_type == b.account_type
                    && a.account_key == b.account_key
            }
            (AccountIdentity::CreditCard(a), AccountIdentity::CreditCard(b)) => {
                a.account_id == b.account_id && a.account_key == b.account_key
            }
            _ => false,
        }
    }
}

// =============================================================================
// Выписка
// =============================================================================

/// Баланс (LEDGERBAL, AVAILBAL).
#[derive(Debug, Clone, PartialEq)]
pub struct Balance {
    pub amount: BigDecimal,
    pub as_of: Timestamp,
}

/// Транзакция (STMTTRN).
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    /// Код типа транзакции (DEBIT, CREDIT, POS и т.д.).
    pub trn_type: String,
    /// Дата проводки.
    pub posted: Timestamp,
    /// Дата, указанная пользователем.
    pub user_date: Option<Timestamp>,
    /// Дата доступности средств.
    pub available: Option<Timestamp>,
    /// Сумма со знаком.
    pub amount: BigDecimal,
    /// Идентификатор транзакции, присвоенный учреждением (FITID).
    pub fit_id: String,
    pub check_number: Option<String>,
    pub reference_number: Option<String>,
    /// Получатель/описание.
    pub name: Option<String>,
    pub memo: Option<String>,
}

/// Список транзакций с периодом выписки (BANKTRANLIST).
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionList {
    pub start: Timestamp,
    pub end: Timestamp,
    pub transactions: Vec<Transaction>,
}

/// Ответ с выпиской (STMTTRNRS/STMTRS или CCSTMTTRNRS/CCSTMTRS).
///
/// Банковская выписка и выписка по кредитной карте отличаются только
/// видом счета, поэтому представлены одной структурой.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementResponse {
    pub trn_uid: String,
    pub status: Status,
    /// Код валюты по умолчанию (CURDEF).
    pub currency: String,
    pub account: AccountIdentity,
    pub transaction_list: Option<TransactionList>,
    pub ledger_balance: Option<Balance>,
    pub available_balance: Option<Balance>,
}

impl StatementResponse {
    /// Тип выписки по виду счета.
    pub fn statement_type(&self) -> StatementType {
        self.account.statement_type()
    }

    /// Транзакции выписки (пусто, если список отсутствует).
    pub fn transactions(&self) -> &[Transaction] {
        self.transaction_list
            .as_ref()
            .map(|list| list.transactions.as_slice())
            .unwrap_or_default()
    }
}

/// Элемент набора сообщений (BANKMSGSRSV1, CREDITCARDMSGSRSV1).
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Ответ с выпиской.
    Statement(StatementResponse),
    /// Любой другой агрегат; хранится только его имя.
    Other(String),
}

/// Разобранный документ OFX.
#[derive(Debug, Clone, PartialEq)]
pub struct OfxDocument {
    pub header: Header,
    pub signon: Option<SignonResponse>,
    /// Сообщения банковских выписок.
    pub bank: Vec<Message>,
    /// Сообщения выписок по кредитным картам.
    pub credit_card: Vec<Message>,
}

impl OfxDocument {
    /// Определяет тип выписки по тому, какой из контейнеров заполнен.
    ///
    /// Ровно один контейнер должен быть непустым и начинаться с выписки
    /// соответствующего вида; иначе возвращается `Unsupported`.
    pub fn statement_type(&self) -> StatementType {
        let bank = Self::leads_with(&self.bank, StatementType::Bank);
        let credit_card = Self::leads_with(&self.credit_card, StatementType::CreditCard);

        match (bank, credit_card) {
            (true, false) => StatementType::Bank,
            (false, true) => StatementType::CreditCard,
            _ => StatementType::Unsupported,
        }
    }

    /// Контейнер сообщений для указанного типа выписки.
    pub fn messages(&self, statement_type: StatementType) -> &[Message] {
        match statement_type {
            StatementType::Bank => &self.bank,
            StatementType::CreditCard => &self.credit_card,
            StatementType::Unsupported => &[],
        }
    }

    /// Единственный ответ с выпиской указанного типа.
    ///
    /// Файлы с несколькими выписками не поддерживаются и приводят к ошибке.
    pub fn single_statement(&self, statement_type: StatementType) -> Result<&StatementResponse> {
        match self.messages(statement_type) {
            [Message::Statement(stmt)] if stmt.statement_type() == statement_type => Ok(stmt),
            _ => Err(Error::MalformedStatement(statement_type)),
        }
    }

    fn leads_with(messages: &[Message], statement_type: StatementType) -> bool {
        matches!(
            messages.first(),
            Some(Message::Statement(stmt)) if stmt.statement_type() == statement_type
        )
    }
}
