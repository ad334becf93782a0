//! Парсер формата OFX (SGML и XML).

use crate::error::{Error, Result};
use crate::ofx::{AggregateNames, BANK_AGGREGATES, CREDIT_CARD_AGGREGATES};
use crate::types::{
    AccountIdentity, BankAccount, Balance, CreditCardAccount, FinancialInstitution, Header,
    Message, OfxDocument, SignonResponse, StatementResponse, StatementType, Status, Timestamp,
    Transaction, TransactionList, DEFAULT_LANGUAGE,
};
use bigdecimal::BigDecimal;
use chrono::{FixedOffset, NaiveDate, TimeZone};
use std::str::FromStr;

/// Элементы STMTTRN, которые переносятся в выходной документ.
const KNOWN_TRANSACTION_FIELDS: [&str; 10] = [
    "TRNTYPE", "DTPOSTED", "DTUSER", "DTAVAIL", "TRNAMT", "FITID", "CHECKNUM", "REFNUM", "NAME",
    "MEMO",
];

/// Элемент дерева OFX: агрегат с дочерними элементами или лист со значением.
#[derive(Debug, Clone, Default)]
struct Element {
    name: String,
    value: Option<String>,
    children: Vec<Element>,
}

impl Element {
    fn aggregate(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    fn leaf(name: &str, value: String) -> Self {
        Self {
            name: name.to_string(),
            value: Some(value),
            children: Vec::new(),
        }
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn require(&self, name: &str) -> Result<&Element> {
        self.child(name)
            .ok_or_else(|| Error::MissingField(format!("{}/{}", self.name, name)))
    }

    /// Значение листового элемента; пустые значения считаются отсутствующими.
    fn value_of(&self, name: &str) -> Option<&str> {
        self.child(name)
            .and_then(|c| c.value.as_deref())
            .filter(|v| !v.is_empty())
    }

    fn require_value(&self, name: &str) -> Result<&str> {
        self.value_of(name)
            .ok_or_else(|| Error::MissingField(format!("{}/{}", self.name, name)))
    }

    fn owned_value(&self, name: &str) -> Option<String> {
        self.value_of(name).map(str::to_string)
    }
}

impl OfxDocument {
    /// Парсит OFX из байтов.
    ///
    /// Корректный UTF-8 читается как есть. Иначе файл считается однобайтовым:
    /// при `CHARSET:1252` в заголовке SGML байты декодируются как Windows-1252,
    /// в остальных случаях как Latin-1.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match std::str::from_utf8(bytes) {
            Ok(content) => Self::parse(content),
            Err(_) => Self::parse(&decode_single_byte(bytes)),
        }
    }

    /// Парсит OFX из строки.
    pub fn parse(content: &str) -> Result<Self> {
        let content = content.trim_start_matches('\u{feff}');

        let ofx_start = content
            .find("<OFX>")
            .ok_or_else(|| Error::Decode("Не найден элемент OFX".to_string()))?;
        let header = parse_header(&content[..ofx_start])?;

        let root = parse_elements(&content[ofx_start..])?;
        let ofx = root
            .child("OFX")
            .ok_or_else(|| Error::Decode("Не найден элемент OFX".to_string()))?;

        let signon = ofx
            .child("SIGNONMSGSRSV1")
            .and_then(|msgs| msgs.child("SONRS"))
            .map(parse_signon)
            .transpose()?;

        let bank = parse_message_set(ofx, &BANK_AGGREGATES, StatementType::Bank)?;
        let credit_card =
            parse_message_set(ofx, &CREDIT_CARD_AGGREGATES, StatementType::CreditCard)?;

        Ok(OfxDocument {
            header,
            signon,
            bank,
            credit_card,
        })
    }
}

// =============================================================================
// Заголовок и разбор дерева элементов
// =============================================================================

/// Символы Windows-1252 для байтов 0x80..=0x9F; остальные байты совпадают с Latin-1.
const WINDOWS_1252_HIGH: [char; 32] = [
    '\u{20ac}', '\u{81}', '\u{201a}', '\u{192}', '\u{201e}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{2c6}', '\u{2030}', '\u{160}', '\u{2039}', '\u{152}', '\u{8d}', '\u{17d}', '\u{8f}',
    '\u{90}', '\u{2018}', '\u{2019}', '\u{201c}', '\u{201d}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{2dc}', '\u{2122}', '\u{161}', '\u{203a}', '\u{153}', '\u{9d}', '\u{17e}', '\u{178}',
];

fn decode_single_byte(bytes: &[u8]) -> String {
    let header_end = bytes
        .windows(5)
        .position(|w| w == b"<OFX>")
        .unwrap_or(bytes.len());
    let header = String::from_utf8_lossy(&bytes[..header_end]);
    let windows_1252 = header
        .lines()
        .filter_map(|line| line.trim().split_once(':'))
        .any(|(key, value)| key.trim() == "CHARSET" && value.trim() == "1252");

    tracing::debug!(
        "Файл не в UTF-8, декодируется как {}",
        if windows_1252 { "Windows-1252" } else { "Latin-1" }
    );

    bytes
        .iter()
        .map(|&b| match b {
            0x80..=0x9f if windows_1252 => WINDOWS_1252_HIGH[usize::from(b - 0x80)],
            _ => char::from(b),
        })
        .collect()
}

fn parse_header(preamble: &str) -> Result<Header> {
    if let Some(pi_start) = preamble.find("<?OFX") {
        let pi = &preamble[pi_start..];
        let pi_end = pi
            .find("?>")
            .ok_or_else(|| Error::Decode("Не закрыт заголовок <?OFX".to_string()))?;
        let pi = &pi[..pi_end];

        let version_start = pi
            .find("VERSION=\"")
            .ok_or_else(|| Error::MissingField("VERSION в заголовке OFX".to_string()))?
            + 9;
        let version_end = pi[version_start..]
            .find('"')
            .ok_or_else(|| Error::Decode("Некорректный атрибут VERSION".to_string()))?;

        return parse_version(&pi[version_start..version_start + version_end]);
    }

    if !preamble.contains("OFXHEADER:") {
        return Err(Error::Decode("Не найден заголовок OFX".to_string()));
    }

    let version = preamble
        .lines()
        .filter_map(|line| line.trim().split_once(':'))
        .find(|(key, _)| key.trim() == "VERSION")
        .map(|(_, value)| value)
        .ok_or_else(|| Error::MissingField("VERSION в заголовке OFX".to_string()))?;

    parse_version(version)
}

fn parse_version(value: &str) -> Result<Header> {
    value
        .trim()
        .parse()
        .map(Header::new)
        .map_err(|_| Error::Decode(format!("Некорректная версия OFX: {}", value)))
}

/// Строит дерево элементов. Возвращает синтетический корень, дочерним
/// элементом которого является `OFX`.
fn parse_elements(body: &str) -> Result<Element> {
    let mut stack = vec![Element::aggregate("")];
    let mut pos = 0;

    while let Some(lt) = body[pos..].find('<') {
        let tag_start = pos + lt;
        let tag_end = body[tag_start..]
            .find('>')
            .map(|i| tag_start + i)
            .ok_or_else(|| Error::Decode("Незакрытый тег".to_string()))?;
        let tag = body[tag_start + 1..tag_end].trim();
        pos = tag_end + 1;

        if tag.starts_with('?') || tag.starts_with('!') {
            continue;
        }

        if let Some(name) = tag.strip_prefix('/') {
            close_aggregate(&mut stack, name.trim())?;
            continue;
        }

        if let Some(name) = tag.strip_suffix('/') {
            push_child(&mut stack, Element::aggregate(name.trim()))?;
            continue;
        }

        if tag.is_empty() {
            return Err(Error::Decode("Пустой тег".to_string()));
        }

        let text_end = body[pos..].find('<').map_or(body.len(), |i| pos + i);
        let text = body[pos..text_end].trim();

        if text.is_empty() {
            stack.push(Element::aggregate(tag));
            continue;
        }

        push_child(&mut stack, Element::leaf(tag, unescape(text)))?;
        pos = text_end;

        // В XML у листового элемента есть закрывающий тег
        let closing = format!("</{}>", tag);
        if body[pos..].starts_with(&closing) {
            pos += closing.len();
        }
    }

    if stack.len() != 1 {
        let unclosed = stack.last().map(|e| e.name.clone()).unwrap_or_default();
        return Err(Error::Decode(format!("Не закрыт агрегат <{}>", unclosed)));
    }

    stack
        .pop()
        .ok_or_else(|| Error::Decode("Пустой документ".to_string()))
}

fn push_child(stack: &mut [Element], element: Element) -> Result<()> {
    stack
        .last_mut()
        .map(|parent| parent.children.push(element))
        .ok_or_else(|| Error::Decode("Элемент вне корневого агрегата".to_string()))
}

/// Закрывает агрегат `name`. Незакрытые элементы над ним становятся
/// пустыми листьями SGML на уровне своих бывших дочерних элементов.
fn close_aggregate(stack: &mut Vec<Element>, name: &str) -> Result<()> {
    if !stack.iter().skip(1).any(|e| e.name == name) {
        return Err(Error::Decode(format!(
            "Неожиданный закрывающий тег </{}>",
            name
        )));
    }

    while let Some(mut element) = stack.pop() {
        if element.name == name {
            push_child(stack, element)?;
            break;
        }

        // Элемент без закрывающего тега - пустой лист SGML; всё, что попало
        // внутрь него, на самом деле следует за ним на том же уровне.
        let siblings = std::mem::take(&mut element.children);
        element.value = Some(String::new());
        push_child(stack, element)?;
        for sibling in siblings {
            push_child(stack, sibling)?;
        }
    }

    Ok(())
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

// =============================================================================
// Отображение дерева на типы
// =============================================================================

fn parse_signon(sonrs: &Element) -> Result<SignonResponse> {
    let institution = sonrs.child("FI").map(|fi| FinancialInstitution {
        org: fi.owned_value("ORG"),
        fid: fi.owned_value("FID"),
    });

    Ok(SignonResponse {
        status: parse_status(sonrs.require("STATUS")?)?,
        server_date: parse_date(sonrs.require_value("DTSERVER")?)?,
        language: sonrs
            .owned_value("LANGUAGE")
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        institution,
    })
}

fn parse_status(status: &Element) -> Result<Status> {
    let code = status.require_value("CODE")?;
    let code = code
        .parse()
        .map_err(|_| Error::Decode(format!("Некорректный код статуса: {}", code)))?;

    Ok(Status {
        code,
        severity: status.require_value("SEVERITY")?.to_string(),
        message: status.owned_value("MESSAGE"),
    })
}

fn parse_message_set(
    ofx: &Element,
    names: &AggregateNames,
    statement_type: StatementType,
) -> Result<Vec<Message>> {
    let Some(message_set) = ofx.child(names.message_set) else {
        return Ok(Vec::new());
    };

    message_set
        .children
        .iter()
        .map(|message| {
            if message.name != names.transaction {
                return Ok(Message::Other(message.name.clone()));
            }
            // Ответ с ошибкой может не содержать выписки
            match message.child(names.response) {
                Some(response) => {
                    parse_statement(message, response, names, statement_type).map(Message::Statement)
                }
                None => Ok(Message::Other(message.name.clone())),
            }
        })
        .collect()
}

fn parse_statement(
    trnrs: &Element,
    stmtrs: &Element,
    names: &AggregateNames,
    statement_type: StatementType,
) -> Result<StatementResponse> {
    let account = stmtrs.require(names.account)?;
    let account = match statement_type {
        StatementType::CreditCard => AccountIdentity::CreditCard(CreditCardAccount {
            account_id: account.require_value("ACCTID")?.to_string(),
            account_key: account.owned_value("ACCTKEY"),
        }),
        _ => AccountIdentity::Bank(BankAccount {
            bank_id: account.require_value("BANKID")?.to_string(),
            branch_id: account.owned_value("BRANCHID"),
            account_id: account.require_value("ACCTID")?.to_string(),
            account_type: account.require_value("ACCTTYPE")?.to_string(),
            account_key: account.owned_value("ACCTKEY"),
        }),
    };

    Ok(StatementResponse {
        trn_uid: trnrs.require_value("TRNUID")?.to_string(),
        status: parse_status(trnrs.require("STATUS")?)?,
        currency: stmtrs.require_value("CURDEF")?.to_string(),
        account,
        transaction_list: stmtrs
            .child("BANKTRANLIST")
            .map(parse_transaction_list)
            .transpose()?,
        ledger_balance: stmtrs.child("LEDGERBAL").map(parse_balance).transpose()?,
        available_balance: stmtrs.child("AVAILBAL").map(parse_balance).transpose()?,
    })
}

fn parse_transaction_list(list: &Element) -> Result<TransactionList> {
    let transactions = list
        .children
        .iter()
        .filter(|c| c.name == "STMTTRN")
        .map(parse_transaction)
        .collect::<Result<Vec<_>>>()?;

    Ok(TransactionList {
        start: parse_date(list.require_value("DTSTART")?)?,
        end: parse_date(list.require_value("DTEND")?)?,
        transactions,
    })
}

fn parse_transaction(stmttrn: &Element) -> Result<Transaction> {
    for child in &stmttrn.children {
        if !KNOWN_TRANSACTION_FIELDS.contains(&child.name.as_str()) {
            tracing::debug!("Элемент STMTTRN/{} пропущен", child.name);
        }
    }

    Ok(Transaction {
        trn_type: stmttrn.require_value("TRNTYPE")?.to_string(),
        posted: parse_date(stmttrn.require_value("DTPOSTED")?)?,
        user_date: stmttrn.value_of("DTUSER").map(parse_date).transpose()?,
        available: stmttrn.value_of("DTAVAIL").map(parse_date).transpose()?,
        amount: parse_amount(stmttrn.require_value("TRNAMT")?)?,
        fit_id: stmttrn.require_value("FITID")?.to_string(),
        check_number: stmttrn.owned_value("CHECKNUM"),
        reference_number: stmttrn.owned_value("REFNUM"),
        name: stmttrn.owned_value("NAME"),
        memo: stmttrn.owned_value("MEMO"),
    })
}

fn parse_balance(balance: &Element) -> Result<Balance> {
    Ok(Balance {
        amount: parse_amount(balance.require_value("BALAMT")?)?,
        as_of: parse_date(balance.require_value("DTASOF")?)?,
    })
}

// =============================================================================
// Значения
// =============================================================================

/// Парсит сумму. Допускается запятая в качестве десятичного разделителя.
pub(crate) fn parse_amount(value: &str) -> Result<BigDecimal> {
    let normalized = value.trim().trim_start_matches('+').replace(',', ".");

    BigDecimal::from_str(&normalized)
        .map_err(|_| Error::Decode(format!("Некорректная сумма: {}", value)))
}

/// Парсит дату OFX: `YYYYMMDD[HHMM[SS[.XXX]]][[±H[.MM]][:TZ]]`.
///
/// Без указания смещения время считается заданным в GMT.
pub(crate) fn parse_date(value: &str) -> Result<Timestamp> {
    let invalid = || Error::Decode(format!("Некорректная дата: {}", value));
    let value = value.trim();

    let (main, zone) = match value.find('[') {
        Some(i) => (&value[..i], Some(value[i + 1..].trim_end_matches(']'))),
        None => (value, None),
    };
    let (digits, fraction) = main.split_once('.').unwrap_or((main, ""));

    if !matches!(digits.len(), 8 | 12 | 14)
        || !digits.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    let number = |range: std::ops::Range<usize>| -> u32 {
        digits
            .get(range)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    };

    let year = digits[..4].parse::<i32>().map_err(|_| invalid())?;
    let nanos = fraction
        .chars()
        .chain(std::iter::repeat('0'))
        .take(9)
        .collect::<String>()
        .parse::<u32>()
        .map_err(|_| invalid())?;

    let naive = NaiveDate::from_ymd_opt(year, number(4..6), number(6..8))
        .and_then(|d| d.and_hms_nano_opt(number(8..10), number(10..12), number(12..14), nanos))
        .ok_or_else(invalid)?;

    let offset = match zone {
        Some(zone) => parse_offset(zone).ok_or_else(invalid)?,
        None => FixedOffset::east_opt(0).ok_or_else(invalid)?,
    };

    offset.from_local_datetime(&naive).single().ok_or_else(invalid)
}

/// Парсит смещение вида `-5:EST`, `+5.30:IST`, `0`.
fn parse_offset(zone: &str) -> Option<FixedOffset> {
    let offset = zone.split(':').next()?.trim();
    let (negative, offset) = match offset.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, offset.trim_start_matches('+')),
    };
    let (hours, minutes) = offset.split_once('.').unwrap_or((offset, "0"));

    let seconds = hours.parse::<i32>().ok()? * 3600 + minutes.parse::<i32>().ok()? * 60;
    FixedOffset::east_opt(if negative { -seconds } else { seconds })
}
