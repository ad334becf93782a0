//! Модуль обработки ошибок библиотеки.

use crate::types::StatementType;

/// Основной тип ошибки библиотеки.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Ошибка ввода/вывода
    #[error("Ошибка ввода/вывода: {0}")]
    Io(#[from] std::io::Error),
    /// Некорректные входные данные OFX
    #[error("Ошибка разбора OFX: {0}")]
    Decode(String),
    /// Отсутствует обязательный элемент
    #[error("Отсутствует обязательный элемент: {0}")]
    MissingField(String),
    /// Не удалось сформировать выходной документ
    #[error("Ошибка сериализации OFX: {0}")]
    Encode(String),
    /// Не найдено ни банковской выписки, ни выписки по кредитной карте
    #[error("Неподдерживаемый тип выписки")]
    UnsupportedStatement,
    /// Тип выписки отличается от типа предыдущих выписок
    #[error("Тип выписки отличается от предыдущих ({found}, {expected})")]
    StatementTypeMismatch {
        /// Тип новой выписки.
        found: StatementType,
        /// Тип, установленный первой выпиской.
        expected: StatementType,
    },
    /// Контейнер выписки содержит не ровно один ответ ожидаемого вида
    #[error("Не удалось обработать выписку ({0}): ожидается ровно один ответ с выпиской")]
    MalformedStatement(StatementType),
    /// Счет выписки не совпадает со счетом предыдущих выписок
    #[error("Счета не совпадают ({0})")]
    AccountMismatch(StatementType),
}

/// Тип Result с ошибкой библиотеки.
pub type Result<T> = std::result::Result<T, Error>;
