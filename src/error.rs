use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("error count {errors} exceeds attempt count {attempts}")]
    ErrorsExceedAttempts { attempts: u32, errors: u32 },
    #[error("negative {field} count: {value}")]
    NegativeCount { field: &'static str, value: i64 },
    #[error("{field} count {value} does not fit in 32 bits")]
    CountOverflow { field: &'static str, value: i64 },
}

/// Converts a raw database aggregate into a validated count.
pub fn checked_count(field: &'static str, value: i64) -> Result<u32, InputError> {
    if value < 0 {
        return Err(InputError::NegativeCount { field, value });
    }
    u32::try_from(value).map_err(|_| InputError::CountOverflow { field, value })
}
