//! Passive diagnostic hook.
//!
//! Samplers expose named numeric fields (iteration counters, acceptance
//! rates, ESS, temperature) through [`Loggable`]. Nothing in the sampling
//! algorithms reads these values back; they exist for drivers that want to
//! print or record progress. [`LogTable`] turns them into fixed-width text
//! rows, which the [controller](crate::controller) forwards to the `log`
//! facade and to its progress bar.

use std::fmt;

/// A single diagnostic value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogValue {
    Int(u64),
    Float(f64),
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogValue::Int(v) => write!(f, "{v}"),
            LogValue::Float(v) => write!(f, "{v:.4}"),
        }
    }
}

/// A named diagnostic value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogField {
    pub name: &'static str,
    pub value: LogValue,
}

impl LogField {
    pub fn int(name: &'static str, value: u64) -> Self {
        Self {
            name,
            value: LogValue::Int(value),
        }
    }

    pub fn float(name: &'static str, value: f64) -> Self {
        Self {
            name,
            value: LogValue::Float(value),
        }
    }
}

/// Types that can report their internal state as named fields.
pub trait Loggable {
    /// Current values of the diagnostic fields, always in the same order.
    fn log_fields(&self) -> Vec<LogField>;
}

/// Formats rows of [`LogField`]s as a fixed-width table.
///
/// ```rust
/// use asktell_mcmc::logging::{LogField, LogTable};
///
/// let table = LogTable::new(10);
/// let fields = [LogField::int("iter", 3), LogField::float("accept", 0.25)];
/// assert_eq!(table.header(&fields).split_whitespace().collect::<Vec<_>>(), ["iter", "accept"]);
/// assert!(table.row(&fields).contains("0.2500"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogTable {
    width: usize,
}

impl LogTable {
    pub fn new(width: usize) -> Self {
        Self { width }
    }

    pub fn header(&self, fields: &[LogField]) -> String {
        fields
            .iter()
            .map(|f| format!("{:<w$}", f.name, w = self.width))
            .collect::<Vec<_>>()
            .join(" ")
            .trim_end()
            .to_string()
    }

    pub fn row(&self, fields: &[LogField]) -> String {
        fields
            .iter()
            .map(|f| format!("{:<w$}", f.value.to_string(), w = self.width))
            .collect::<Vec<_>>()
            .join(" ")
            .trim_end()
            .to_string()
    }

    /// A compact `name=value` rendering for progress bar messages.
    pub fn inline(fields: &[LogField]) -> String {
        fields
            .iter()
            .map(|f| format!("{}={}", f.name, f.value))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for LogTable {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_line_up_with_header() {
        let table = LogTable::new(8);
        let fields = [
            LogField::int("iter", 120),
            LogField::float("ess", 512.123456),
        ];
        let header = table.header(&fields);
        let row = table.row(&fields);
        assert_eq!(header, "iter     ess");
        assert_eq!(row, "120      512.1235");
    }

    #[test]
    fn test_inline() {
        let fields = [LogField::int("frog", 4), LogField::float("accept", 1.0)];
        assert_eq!(LogTable::inline(&fields), "frog=4 accept=1.0000");
    }
}
