// 🔤 CSV Codec - delimiter + decimal/date locale in one injectable value
//
// Reader and writer share the same codec so that read → write → read is
// loss-free. The default is the Polish locale the source files are produced
// in: ';' between fields, ',' as decimal separator, ISO dates.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Grouping characters tolerated inside numbers (space, NBSP, narrow NBSP)
const GROUP_SEPARATORS: [char; 3] = [' ', '\u{a0}', '\u{202f}'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvCodec {
    pub delimiter: u8,
    pub decimal_separator: char,
    pub date_format: String,
}

impl CsvCodec {
    pub fn polish() -> Self {
        CsvCodec {
            delimiter: b';',
            decimal_separator: ',',
            date_format: "%Y-%m-%d".to_string(),
        }
    }

    pub fn new(delimiter: u8, decimal_separator: char, date_format: &str) -> Self {
        CsvCodec {
            delimiter,
            decimal_separator,
            date_format: date_format.to_string(),
        }
    }

    pub fn reader_builder(&self) -> csv::ReaderBuilder {
        let mut builder = csv::ReaderBuilder::new();
        builder
            .delimiter(self.delimiter)
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .flexible(true);
        builder
    }

    pub fn writer_builder(&self) -> csv::WriterBuilder {
        let mut builder = csv::WriterBuilder::new();
        builder.delimiter(self.delimiter).has_headers(true);
        builder
    }

    // ========================================================================
    // DECIMALS
    // ========================================================================

    pub fn parse_decimal(&self, raw: &str) -> Result<Decimal, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("empty number".to_string());
        }

        let compact: String = trimmed
            .chars()
            .filter(|c| !GROUP_SEPARATORS.contains(c))
            .collect();

        // Only the locale's own separator may appear
        if self.decimal_separator != '.' && compact.contains('.') {
            return Err(format!("'{}' uses '.' but the decimal separator is '{}'", trimmed, self.decimal_separator));
        }

        let normalized = compact.replace(self.decimal_separator, ".");
        Decimal::from_str(&normalized).map_err(|e| format!("'{}' is not a number: {}", trimmed, e))
    }

    /// Keeps the value's scale: 10.00 is written as "10,00"
    pub fn format_decimal(&self, value: &Decimal) -> String {
        let text = value.to_string();
        if self.decimal_separator == '.' {
            text
        } else {
            text.replace('.', &self.decimal_separator.to_string())
        }
    }

    // ========================================================================
    // DATES
    // ========================================================================

    /// An empty cell is a missing date (`None`), anything else must parse
    pub fn parse_date(&self, raw: &str) -> Result<Option<NaiveDate>, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        NaiveDate::parse_from_str(trimmed, &self.date_format)
            .map(Some)
            .map_err(|e| format!("'{}' does not match {}: {}", trimmed, self.date_format, e))
    }

    pub fn format_date(&self, date: &NaiveDate) -> String {
        date.format(&self.date_format).to_string()
    }

    // ========================================================================
    // INTEGERS / TEXT
    // ========================================================================

    pub fn parse_int<T>(&self, raw: &str) -> Result<T, String>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("empty integer".to_string());
        }
        trimmed
            .parse::<T>()
            .map_err(|e| format!("'{}' is not an integer: {}", trimmed, e))
    }
}

impl Default for CsvCodec {
    fn default() -> Self {
        Self::polish()
    }
}
