//! Header-driven CSV statement parser.

use super::normalize::{
    normalize_bank_name, parse_localized_amount, parse_localized_date, statement_hash,
};
use super::{ParseError, StatementParser};
use crate::models::{
    AvailabilityAccount, AvailabilityAccountSnapshot, BankIdentity, BankSnapshot, Direction,
    IntermediateStatementLine,
};
use async_trait::async_trait;
use csv::{ByteRecord, ReaderBuilder};
use serde_json::{Map, Value};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument};

const DEFAULT_DESCRIPTION: &str = "Sem descrição";

/// Layout of one bank's CSV export.
#[derive(Debug, Clone)]
pub struct CsvDialect {
    pub bank_code: &'static str,
    pub bank_names: Vec<&'static str>,
    pub delimiter: u8,
    pub date_format: &'static str,
    pub date_column: &'static str,
    pub description_column: &'static str,
    pub reference_column: &'static str,
    pub amount_column: &'static str,
    /// Balance rows that look like transactions but are not.
    pub skipped_descriptions: Vec<&'static str>,
}

impl CsvDialect {
    /// Banco do Brasil "extrato" export:
    /// `"Data","Dependencia Origem","Histórico","Data do Balancete","Número do documento","Valor",`
    pub fn banco_do_brasil() -> Self {
        Self {
            bank_code: "BB",
            bank_names: vec!["Banco do Brasil", "Banco do Brasil S.A.", "BB"],
            delimiter: b',',
            date_format: "%d/%m/%Y",
            date_column: "Data",
            description_column: "Histórico",
            reference_column: "Número do documento",
            amount_column: "Valor",
            skipped_descriptions: vec!["Saldo Anterior", "S A L D O", "Saldo do dia", "Saldo"],
        }
    }
}

struct ColumnIndexes {
    date: usize,
    description: usize,
    reference: Option<usize>,
    amount: usize,
}

/// Static context stamped onto every line of a batch.
struct BatchContext {
    bank: BankSnapshot,
    availability_account: AvailabilityAccountSnapshot,
    month: i32,
    year: i32,
}

pub struct CsvStatementParser {
    dialect: Arc<CsvDialect>,
}

impl CsvStatementParser {
    pub fn new(dialect: CsvDialect) -> Self {
        Self {
            dialect: Arc::new(dialect),
        }
    }
}

#[async_trait]
impl StatementParser for CsvStatementParser {
    fn bank_code(&self) -> &str {
        self.dialect.bank_code
    }

    fn bank_names(&self) -> Vec<&str> {
        self.dialect.bank_names.clone()
    }

    #[instrument(skip(self, bank, availability_account), fields(bank = %bank.name, file = %file_path.display()))]
    async fn parse(
        &self,
        bank: &BankIdentity,
        availability_account: &AvailabilityAccount,
        file_path: &Path,
        month: i32,
        year: i32,
    ) -> Result<Vec<IntermediateStatementLine>, ParseError> {
        let dialect = self.dialect.clone();
        let path = file_path.to_path_buf();
        let context = BatchContext {
            bank: BankSnapshot::from(bank),
            availability_account: AvailabilityAccountSnapshot::from(availability_account),
            month,
            year,
        };

        let lines = tokio::task::spawn_blocking(move || {
            let file = std::fs::File::open(&path).map_err(|source| ParseError::Io {
                path: path.clone(),
                source,
            })?;
            parse_records(std::io::BufReader::new(file), &dialect, &context)
        })
        .await
        .map_err(|e| ParseError::Task(e.to_string()))??;

        debug!(lines = lines.len(), "Statement file parsed");
        Ok(lines)
    }
}

/// Bank exports are UTF-8 or Latin-1; anything that is not valid UTF-8 is read as Latin-1.
fn decode_field(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.trim_start_matches('\u{feff}').trim().to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect::<String>().trim().to_string(),
    }
}

fn locate_columns(headers: &[String], dialect: &CsvDialect) -> Result<ColumnIndexes, ParseError> {
    let find = |label: &str| {
        let wanted = normalize_bank_name(label);
        headers.iter().position(|h| normalize_bank_name(h) == wanted)
    };
    let require = |label: &str| find(label).ok_or_else(|| ParseError::MissingColumn(label.to_string()));

    Ok(ColumnIndexes {
        date: require(dialect.date_column)?,
        description: require(dialect.description_column)?,
        reference: find(dialect.reference_column),
        amount: require(dialect.amount_column)?,
    })
}

fn parse_records<R: Read>(
    reader: R,
    dialect: &CsvDialect,
    context: &BatchContext,
) -> Result<Vec<IntermediateStatementLine>, ParseError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(dialect.delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = reader.byte_headers()?.iter().map(decode_field).collect();
    let columns = locate_columns(&headers, dialect)?;
    let skipped: Vec<String> = dialect
        .skipped_descriptions
        .iter()
        .map(|d| normalize_bank_name(d))
        .collect();

    let mut lines = Vec::new();
    let mut record = ByteRecord::new();

    while reader.read_byte_record(&mut record)? {
        let line_number = record.position().map(|p| p.line()).unwrap_or_default();
        let fields: Vec<String> = record.iter().map(decode_field).collect();

        if fields.iter().all(|f| f.is_empty()) {
            continue;
        }

        let cell = |index: usize| fields.get(index).map(String::as_str).unwrap_or_default();
        let description = cell(columns.description);
        if skipped.contains(&normalize_bank_name(description)) {
            continue;
        }

        let posted_at = parse_localized_date(cell(columns.date), dialect.date_format).ok_or_else(|| {
            ParseError::InvalidRow {
                line: line_number,
                reason: format!("invalid date '{}'", cell(columns.date)),
            }
        })?;
        let signed_amount = parse_localized_amount(cell(columns.amount)).ok_or_else(|| {
            ParseError::InvalidRow {
                line: line_number,
                reason: format!("invalid amount '{}'", cell(columns.amount)),
            }
        })?;

        let description = if description.is_empty() {
            DEFAULT_DESCRIPTION.to_string()
        } else {
            description.to_string()
        };
        let reference = columns.reference.map(cell).unwrap_or_default();
        let fit_id = if reference.is_empty() {
            String::new()
        } else {
            format!("{}:{}", dialect.bank_code, reference)
        };

        let amount = signed_amount.abs();
        let raw: Map<String, Value> = headers
            .iter()
            .zip(fields.iter())
            .filter(|(header, _)| !header.is_empty())
            .map(|(header, value)| (header.clone(), Value::String(value.clone())))
            .collect();

        lines.push(IntermediateStatementLine {
            bank: context.bank.clone(),
            availability_account: context.availability_account.clone(),
            posted_at,
            amount,
            hash: statement_hash(posted_at, amount, &description),
            description,
            direction: Direction::from_signed(signed_amount),
            fit_id,
            month: context.month,
            year: context.year,
            raw,
        });
    }

    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::dec;

    fn context() -> BatchContext {
        BatchContext {
            bank: BankSnapshot {
                bank_id: "bank-1".to_string(),
                name: "Banco do Brasil".to_string(),
                tag: "BB".to_string(),
            },
            availability_account: AvailabilityAccountSnapshot {
                availability_account_id: "acc-1".to_string(),
                account_name: "Conta Movimento".to_string(),
            },
            month: 5,
            year: 2024,
        }
    }

    fn parse(csv: &str) -> Result<Vec<IntermediateStatementLine>, ParseError> {
        parse_records(csv.as_bytes(), &CsvDialect::banco_do_brasil(), &context())
    }

    const SAMPLE: &str = "\"Data\",\"Dependencia Origem\",\"Histórico\",\"Data do Balancete\",\"Número do documento\",\"Valor\",\n\
\"30/04/2024\",\"\",\"Saldo Anterior\",\"\",\"0\",\"1.500,00\",\n\
\"10/05/2024\",\"\",\"Pix - Recebido\",\"\",\"123456\",\"100,00\",\n\
\"11/05/2024\",\"\",\"  Pagamento de Boleto  \",\"\",\"998877\",\"-1.234,56\",\n\
\"12/05/2024\",\"\",\"\",\"\",\"\",\"-5,00\",\n\
\"31/05/2024\",\"\",\"S A L D O\",\"\",\"\",\"360,44\",\n";

    #[test]
    fn test_parses_transactions_and_skips_balances() {
        let lines = parse(SAMPLE).unwrap();
        assert_eq!(lines.len(), 3);

        let first = &lines[0];
        assert_eq!(first.posted_at, Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap());
        assert_eq!(first.amount, dec!(100.00));
        assert_eq!(first.direction, Direction::Income);
        assert_eq!(first.description, "Pix - Recebido");
        assert_eq!(first.fit_id, "BB:123456");
        assert_eq!(first.month, 5);
        assert_eq!(first.year, 2024);
        assert_eq!(first.raw.get("Valor"), Some(&Value::String("100,00".to_string())));
    }

    #[test]
    fn test_negative_values_become_outgo_magnitudes() {
        let lines = parse(SAMPLE).unwrap();
        let payment = &lines[1];
        assert_eq!(payment.amount, dec!(1234.56));
        assert_eq!(payment.direction, Direction::Outgo);
        assert_eq!(payment.description, "Pagamento de Boleto");
        assert!(lines.iter().all(|l| l.amount >= dec!(0)));
    }

    #[test]
    fn test_missing_reference_and_description_defaults() {
        let lines = parse(SAMPLE).unwrap();
        let fee = &lines[2];
        assert_eq!(fee.fit_id, "");
        assert_eq!(fee.description, DEFAULT_DESCRIPTION);
        assert_eq!(fee.hash, statement_hash(fee.posted_at, dec!(5.00), DEFAULT_DESCRIPTION));
    }

    #[test]
    fn test_invalid_amount_fails_whole_batch() {
        let csv = "Data,Histórico,Número do documento,Valor\n\
10/05/2024,Pix,1,\"100,00\"\n\
11/05/2024,Pix,2,abc\n";
        let err = parse(csv).unwrap_err();
        assert!(matches!(err, ParseError::InvalidRow { line: 3, .. }));
    }

    #[test]
    fn test_invalid_date_fails_whole_batch() {
        let csv = "Data,Histórico,Número do documento,Valor\n2024-05-10,Pix,1,\"100,00\"\n";
        assert!(matches!(parse(csv), Err(ParseError::InvalidRow { .. })));
    }

    #[test]
    fn test_missing_amount_column() {
        let csv = "Data,Histórico,Número do documento\n10/05/2024,Pix,1\n";
        assert!(matches!(parse(csv), Err(ParseError::MissingColumn(col)) if col == "Valor"));
    }

    #[test]
    fn test_latin1_headers_are_decoded() {
        let mut bytes = b"Data,Hist".to_vec();
        bytes.push(0xF3); // o-acute in Latin-1
        bytes.extend_from_slice(b"rico,Valor\n10/05/2024,Tarifa,\"-2,50\"\n");

        let lines =
            parse_records(bytes.as_slice(), &CsvDialect::banco_do_brasil(), &context()).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].amount, dec!(2.50));
        assert_eq!(lines[0].direction, Direction::Outgo);
    }
}
