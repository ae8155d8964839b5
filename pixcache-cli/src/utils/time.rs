use crate::error::AppError;
use std::fmt::Write;
use std::time::Duration;

/// Function to parse time with units
pub fn parse_time(time_str: &str) -> Result<f64, AppError> {
    // Trim whitespace and handle empty string
    let time_str = time_str.trim();
    if time_str.is_empty() {
        return Err(AppError::ParseError("Invalid format: empty string".to_string()));
    }

    // Try to parse as a simple number (seconds) first for efficiency
    if let Ok(seconds) = time_str.parse::<f64>() {
        return Ok(seconds);
    }

    // Find the split point between numeric part and unit part
    let mut split_index = 0;
    for (i, c) in time_str.char_indices() {
        if !c.is_ascii_digit() && c != '.' {
            split_index = i;
            break;
        }
    }

    // If we didn't find any non-numeric characters, handle it as just a number
    if split_index == 0 && !time_str.is_empty() {
        // The entire string is numbers or decimal points
        return time_str
            .parse::<f64>()
            .map_err(|_| AppError::ParseError("Invalid number".to_string()));
    }

    // Split the string into numeric and unit parts
    let numeric_part = &time_str[0..split_index];
    let unit_part = time_str[split_index..].trim().to_lowercase();

    // Parse the numeric part
    let value = numeric_part
        .parse::<f64>()
        .map_err(|_| AppError::ParseError("Invalid number".to_string()))?;

    // Parse the unit and convert to seconds
    match unit_part.as_str() {
        "s" => Ok(value),
        "m" => Ok(value * 60.0),
        "h" => Ok(value * 3600.0),
        "d" => Ok(value * 86400.0),
        _ => Err(AppError::ParseError("Invalid unit".to_string())),
    }
}

/// Parse a time string into a [`Duration`], rejecting negative values
pub fn parse_duration(time_str: &str) -> Result<Duration, AppError> {
    let seconds = parse_time(time_str)?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| AppError::ParseError(format!("Invalid duration: '{time_str}'")))
}

/// Convert seconds to a human-readable format
pub fn format_duration(seconds: f64) -> String {
    // Pre-allocate
    let mut result = String::with_capacity(10);

    if seconds >= 86400.0 {
        let days = seconds / 86400.0;
        let _ = write!(result, "{days:.2}d");
    } else if seconds >= 3600.0 {
        let hours = seconds / 3600.0;
        let _ = write!(result, "{hours:.2}h");
    } else if seconds >= 60.0 {
        let minutes = seconds / 60.0;
        let _ = write!(result, "{minutes:.2}m");
    } else {
        let _ = write!(result, "{seconds:.2}s");
    }

    result
}
