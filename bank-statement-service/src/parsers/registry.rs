//! Lookup of statement parsers by bank name.

use super::normalize::normalize_bank_name;
use super::{CsvDialect, CsvStatementParser, ParseError, StatementParser};
use std::collections::HashMap;
use std::sync::Arc;

/// Strategy table from normalized bank name (or code) to its parser.
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn StatementParser>>,
    by_name: HashMap<String, Arc<dyn StatementParser>>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_default_parsers()
    }
}

impl ParserRegistry {
    pub fn empty() -> Self {
        Self {
            parsers: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn with_default_parsers() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(CsvStatementParser::new(CsvDialect::banco_do_brasil())));
        registry
    }

    /// Add a parser. Names already claimed by an earlier parser keep their owner.
    pub fn register(&mut self, parser: Arc<dyn StatementParser>) {
        let keys = std::iter::once(parser.bank_code())
            .chain(parser.bank_names())
            .map(normalize_bank_name)
            .collect::<Vec<_>>();
        for key in keys {
            self.by_name.entry(key).or_insert_with(|| parser.clone());
        }
        self.parsers.push(parser);
    }

    pub fn resolve(&self, bank_name: &str) -> Result<Arc<dyn StatementParser>, ParseError> {
        if let Some(parser) = self.by_name.get(&normalize_bank_name(bank_name)) {
            return Ok(parser.clone());
        }

        self.parsers
            .iter()
            .find(|p| p.supports(bank_name))
            .cloned()
            .ok_or_else(|| ParseError::UnsupportedBank(bank_name.to_string()))
    }

    /// Pre-flight check: can this bank be imported at all?
    pub fn is_supported(&self, bank_name: &str) -> bool {
        self.resolve(bank_name).is_ok()
    }
}
