use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors returned when a session line cannot be parsed.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum RecordParseError {
    #[error("session line is missing the `{field}` header field")]
    MissingField { field: &'static str },
    #[error("session field `{field}` has non-numeric value `{value}`")]
    InvalidNumber { field: &'static str, value: String },
}

/// One measurement batch reported by the logger.
///
/// The verbatim line received from the device is kept alongside the parsed
/// fields; the local store deduplicates on that text, not on the fields.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SessionRecord {
    line: String,
    id: i64,
    time: i64,
    period: u32,
    readings: String,
}

impl SessionRecord {
    /// Parses the header of a line of the form `id:<id> t:<time> p:<period> <readings>`.
    ///
    /// The readings are kept as text: every token after the header, joined
    /// with commas. Use [`SessionRecord::readings`] to read them as numbers.
    ///
    /// ```
    /// let record = pepperoni::SessionRecord::parse("id:1 t:1000 p:60 10,11,12")?;
    /// assert_eq!(1000, record.time());
    /// assert_eq!("10,11,12", record.readings_csv());
    /// # Ok::<(), pepperoni::RecordParseError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when a header field is missing or not numeric.
    pub fn parse(line: &str) -> Result<Self, RecordParseError> {
        let line = line.trim();
        let mut tokens = line.split_whitespace();

        let id = header_field(tokens.next(), "id")?;
        let time = header_field(tokens.next(), "t")?;
        let period = header_field(tokens.next(), "p")?;

        let readings = tokens.collect::<Vec<_>>().join(",");

        Ok(Self {
            line: line.to_string(),
            id,
            time,
            period,
            readings,
        })
    }

    /// Returns the verbatim line used as the dedup key.
    #[must_use]
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Device-assigned sequence number.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Unix timestamp of the session start.
    #[must_use]
    pub fn time(&self) -> i64 {
        self.time
    }

    /// Seconds between consecutive readings.
    #[must_use]
    pub fn period(&self) -> u32 {
        self.period
    }

    /// Ordered samples, parsed from the reading payload.
    ///
    /// Empty entries, such as the one a trailing comma leaves, are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error when a reading is not numeric.
    pub fn readings(&self) -> Result<Vec<i64>, RecordParseError> {
        self.readings
            .split(',')
            .filter(|value| !value.is_empty())
            .map(|value| parse_number("readings", value))
            .collect()
    }

    /// Reading payload exactly as listed, with whitespace separators turned
    /// into commas. This is what the collector receives.
    #[must_use]
    pub fn readings_csv(&self) -> &str {
        &self.readings
    }
}

impl FromStr for SessionRecord {
    type Err = RecordParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl fmt::Display for SessionRecord {
    /// Canonical form: `id:<id> t:<time> p:<period> <comma-separated readings>`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id:{} t:{} p:{} {}",
            self.id,
            self.time,
            self.period,
            self.readings_csv()
        )
    }
}

fn header_field<T>(token: Option<&str>, field: &'static str) -> Result<T, RecordParseError>
where
    T: FromStr,
{
    let value = token
        .and_then(|token| token.strip_prefix(field))
        .and_then(|rest| rest.strip_prefix(':'))
        .ok_or(RecordParseError::MissingField { field })?;
    parse_number(field, value)
}

fn parse_number<T>(field: &'static str, value: &str) -> Result<T, RecordParseError>
where
    T: FromStr,
{
    value
        .parse()
        .map_err(|_| RecordParseError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}
