//! Сериализация формата OFX.

use crate::error::Result;
use crate::ofx::aggregates_for;
use crate::types::{
    AccountIdentity, Balance, Header, Message, OfxDocument, SignonResponse, StatementResponse,
    Status, Timestamp, Transaction, TransactionList,
};
use bigdecimal::BigDecimal;
use std::io::{BufWriter, Write};

/// Writer для формата OFX.
pub struct OfxWriter;

/// Приемник элементов с учетом диалекта: в SGML листовые элементы
/// не закрываются.
struct ElementSink<'a, W: Write> {
    writer: &'a mut W,
    xml: bool,
}

impl<W: Write> ElementSink<'_, W> {
    fn open(&mut self, tag: &str) -> Result<()> {
        writeln!(self.writer, "<{}>", tag)?;
        Ok(())
    }

    fn close(&mut self, tag: &str) -> Result<()> {
        writeln!(self.writer, "</{}>", tag)?;
        Ok(())
    }

    fn leaf(&mut self, tag: &str, value: &str) -> Result<()> {
        if self.xml {
            writeln!(self.writer, "<{}>{}</{}>", tag, escape(value), tag)?;
        } else {
            writeln!(self.writer, "<{}>{}", tag, escape(value))?;
        }
        Ok(())
    }

    fn optional_leaf(&mut self, tag: &str, value: Option<&str>) -> Result<()> {
        match value {
            Some(value) => self.leaf(tag, value),
            None => Ok(()),
        }
    }
}

impl OfxWriter {
    /// Записывает документ OFX в любой приемник, реализующий трейт Write.
    ///
    /// Использует внутреннюю буферизацию для уменьшения количества syscalls.
    pub fn write_to<W: Write>(document: &OfxDocument, writer: &mut W) -> Result<()> {
        let mut buf_writer = BufWriter::new(writer);
        Self::write_to_buffered(document, &mut buf_writer)?;
        buf_writer.flush()?;
        Ok(())
    }

    fn write_to_buffered<W: Write>(document: &OfxDocument, writer: &mut W) -> Result<()> {
        Self::write_header(writer, &document.header)?;

        let mut sink = ElementSink {
            writer,
            xml: document.header.is_xml(),
        };

        sink.open("OFX")?;

        if let Some(ref signon) = document.signon {
            sink.open("SIGNONMSGSRSV1")?;
            Self::write_signon(&mut sink, signon)?;
            sink.close("SIGNONMSGSRSV1")?;
        }

        if !document.bank.is_empty() {
            sink.open("BANKMSGSRSV1")?;
            Self::write_messages(&mut sink, &document.bank)?;
            sink.close("BANKMSGSRSV1")?;
        }

        if !document.credit_card.is_empty() {
            sink.open("CREDITCARDMSGSRSV1")?;
            Self::write_messages(&mut sink, &document.credit_card)?;
            sink.close("CREDITCARDMSGSRSV1")?;
        }

        sink.close("OFX")?;

        Ok(())
    }

    fn write_header<W: Write>(writer: &mut W, header: &Header) -> Result<()> {
        if header.is_xml() {
            writeln!(
                writer,
                "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>"
            )?;
            writeln!(
                writer,
                "<?OFX OFXHEADER=\"200\" VERSION=\"{}\" SECURITY=\"NONE\" OLDFILEUID=\"NONE\" NEWFILEUID=\"NONE\"?>",
                header.version
            )?;
        } else {
            writeln!(writer, "OFXHEADER:100")?;
            writeln!(writer, "DATA:OFXSGML")?;
            writeln!(writer, "VERSION:{}", header.version)?;
            writeln!(writer, "SECURITY:NONE")?;
            writeln!(writer, "ENCODING:UNICODE")?;
            writeln!(writer, "CHARSET:NONE")?;
            writeln!(writer, "COMPRESSION:NONE")?;
            writeln!(writer, "OLDFILEUID:NONE")?;
            writeln!(writer, "NEWFILEUID:NONE")?;
            writeln!(writer)?;
        }

        Ok(())
    }

    fn write_signon<W: Write>(sink: &mut ElementSink<'_, W>, signon: &SignonResponse) -> Result<()> {
        sink.open("SONRS")?;
        Self::write_status(sink, &signon.status)?;
        sink.leaf("DTSERVER", &format_date(&signon.server_date))?;
        sink.leaf("LANGUAGE", &signon.language)?;

        if let Some(ref fi) = signon.institution {
            sink.open("FI")?;
            sink.optional_leaf("ORG", fi.org.as_deref())?;
            sink.optional_leaf("FID", fi.fid.as_deref())?;
            sink.close("FI")?;
        }

        sink.close("SONRS")?;
        Ok(())
    }

    fn write_status<W: Write>(sink: &mut ElementSink<'_, W>, status: &Status) -> Result<()> {
        sink.open("STATUS")?;
        sink.leaf("CODE", &status.code.to_string())?;
        sink.leaf("SEVERITY", &status.severity)?;
        sink.optional_leaf("MESSAGE", status.message.as_deref())?;
        sink.close("STATUS")?;
        Ok(())
    }

    fn write_messages<W: Write>(sink: &mut ElementSink<'_, W>, messages: &[Message]) -> Result<()> {
        for message in messages {
            match message {
                Message::Statement(statement) => Self::write_statement(sink, statement)?,
                Message::Other(name) => {
                    tracing::debug!("Содержимое агрегата {} не сохраняется", name);
                    sink.open(name)?;
                    sink.close(name)?;
                }
            }
        }
        Ok(())
    }

    fn write_statement<W: Write>(
        sink: &mut ElementSink<'_, W>,
        statement: &StatementResponse,
    ) -> Result<()> {
        let Some(names) = aggregates_for(statement.statement_type()) else {
            return Ok(());
        };

        sink.open(names.transaction)?;
        sink.leaf("TRNUID", &statement.trn_uid)?;
        Self::write_status(sink, &statement.status)?;

        sink.open(names.response)?;
        sink.leaf("CURDEF", &statement.currency)?;
        Self::write_account(sink, names.account, &statement.account)?;

        if let Some(ref list) = statement.transaction_list {
            Self::write_transaction_list(sink, list)?;
        }
        if let Some(ref balance) = statement.ledger_balance {
            Self::write_balance(sink, "LEDGERBAL", balance)?;
        }
        if let Some(ref balance) = statement.available_balance {
            Self::write_balance(sink, "AVAILBAL", balance)?;
        }

        sink.close(names.response)?;
        sink.close(names.transaction)?;
        Ok(())
    }

    fn write_account<W: Write>(
        sink: &mut ElementSink<'_, W>,
        tag: &str,
        account: &AccountIdentity,
    ) -> Result<()> {
        sink.open(tag)?;
        match account {
            AccountIdentity::Bank(bank) => {
                sink.leaf("BANKID", &bank.bank_id)?;
                sink.optional_leaf("BRANCHID", bank.branch_id.as_deref())?;
                sink.leaf("ACCTID", &bank.account_id)?;
                sink.leaf("ACCTTYPE", &bank.account_type)?;
                sink.optional_leaf("ACCTKEY", bank.account_key.as_deref())?;
            }
            AccountIdentity::CreditCard(card) => {
                sink.leaf("ACCTID", &card.account_id)?;
                sink.optional_leaf("ACCTKEY", card.account_key.as_deref())?;
            }
        }
        sink.close(tag)?;
        Ok(())
    }

    fn write_transaction_list<W: Write>(
        sink: &mut ElementSink<'_, W>,
        list: &TransactionList,
    ) -> Result<()> {
        sink.open("BANKTRANLIST")?;
        sink.leaf("DTSTART", &format_date(&list.start))?;
        sink.leaf("DTEND", &format_date(&list.end))?;
        for transaction in &list.transactions {
            Self::write_transaction(sink, transaction)?;
        }
        sink.close("BANKTRANLIST")?;
        Ok(())
    }

    fn write_transaction<W: Write>(
        sink: &mut ElementSink<'_, W>,
        transaction: &Transaction,
    ) -> Result<()> {
        sink.open("STMTTRN")?;
        sink.leaf("TRNTYPE", &transaction.trn_type)?;
        sink.leaf("DTPOSTED", &format_date(&transaction.posted))?;
        sink.optional_leaf("DTUSER", transaction.user_date.as_ref().map(format_date).as_deref())?;
        sink.optional_leaf("DTAVAIL", transaction.available.as_ref().map(format_date).as_deref())?;
        sink.leaf("TRNAMT", &format_amount(&transaction.amount))?;
        sink.leaf("FITID", &transaction.fit_id)?;
        sink.optional_leaf("CHECKNUM", transaction.check_number.as_deref())?;
        sink.optional_leaf("REFNUM", transaction.reference_number.as_deref())?;
        sink.optional_leaf("NAME", transaction.name.as_deref())?;
        sink.optional_leaf("MEMO", transaction.memo.as_deref())?;
        sink.close("STMTTRN")?;
        Ok(())
    }

    fn write_balance<W: Write>(
        sink: &mut ElementSink<'_, W>,
        tag: &str,
        balance: &Balance,
    ) -> Result<()> {
        sink.open(tag)?;
        sink.leaf("BALAMT", &format_amount(&balance.amount))?;
        sink.leaf("DTASOF", &format_date(&balance.as_of))?;
        sink.close(tag)?;
        Ok(())
    }
}

impl OfxDocument {
    /// Записывает документ в любой приемник, реализующий трейт Write.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        OfxWriter::write_to(self, writer)
    }
}

/// Форматирует дату как `YYYYMMDDHHMMSS.XXX[±H[.MM]:TZ]`.
pub(crate) fn format_date(date: &Timestamp) -> String {
    let offset = date.offset().local_minus_utc();
    let sign = if offset < 0 { "-" } else { "+" };
    let hours = offset.abs() / 3600;
    let minutes = offset.abs() % 3600 / 60;

    let zone = match (offset, minutes) {
        (0, _) => "0:GMT".to_string(),
        (_, 0) => format!("{}{}", sign, hours),
        _ => format!("{}{}.{:02}", sign, hours, minutes),
    };

    format!("{}[{}]", date.format("%Y%m%d%H%M%S%.3f"), zone)
}

fn format_amount(amount: &BigDecimal) -> String {
    amount.to_string()
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ofx::parser::parse_date;

    #[test]
    fn test_format_date_utc() {
        let date = parse_date("20240105").unwrap();
        assert_eq!(format_date(&date), "20240105000000.000[0:GMT]");
    }

    #[test]
    fn test_format_date_with_offset() {
        let date = parse_date("20240105123000.250[-5:EST]").unwrap();
        assert_eq!(format_date(&date), "20240105123000.250[-5]");

        let date = parse_date("20240105123000[+5.30:IST]").unwrap();
        assert_eq!(format_date(&date), "20240105123000.000[+5.30]");
    }

    #[test]
    fn test_sgml_header_encoding() {
        let mut out = Vec::new();
        OfxWriter::write_header(&mut out, &Header::new(102)).unwrap();
        let header = String::from_utf8(out).unwrap();

        assert!(header.contains("ENCODING:UNICODE\nCHARSET:NONE\n"));
        assert!(!header.contains("UTF-8"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("A&B <C>"), "A&amp;B &lt;C&gt;");
    }
}
