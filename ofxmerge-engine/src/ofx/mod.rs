//! Модуль парсинга и сериализации формата OFX.
//!
//! Поддерживаются оба диалекта: OFX 1.x (SGML, листовые элементы без
//! закрывающих тегов) и OFX 2.x (XML).

pub mod parser;
pub mod writer;

pub use writer::OfxWriter;

use crate::types::StatementType;

/// Имена агрегатов выписки: набор сообщений, транзакция-обертка, ответ.
pub(crate) struct AggregateNames {
    pub message_set: &'static str,
    pub transaction: &'static str,
    pub response: &'static str,
    pub account: &'static str,
}

pub(crate) const BANK_AGGREGATES: AggregateNames = AggregateNames {
    message_set: "BANKMSGSRSV1",
    transaction: "STMTTRNRS",
    response: "STMTRS",
    account: "BANKACCTFROM",
};

pub(crate) const CREDIT_CARD_AGGREGATES: AggregateNames = AggregateNames {
    message_set: "CREDITCARDMSGSRSV1",
    transaction: "CCSTMTTRNRS",
    response: "CCSTMTRS",
    account: "CCACCTFROM",
};

pub(crate) fn aggregates_for(statement_type: StatementType) -> Option<&'static AggregateNames> {
    match statement_type {
        StatementType::Bank => Some(&BANK_AGGREGATES),
        StatementType::CreditCard => Some(&CREDIT_CARD_AGGREGATES),
        StatementType::Unsupported => None,
    }
}
