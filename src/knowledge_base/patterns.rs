//! Canonical value shapes (email, phone, ...) detected over sampled column values

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How many of the most frequent values are inspected
pub const SHAPE_SAMPLE_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueShape {
    Email,
    Phone,
    Url,
    PostalCode,
    Date,
}

lazy_static! {
    static ref SHAPE_RULES: Vec<(ValueShape, Regex)> = vec![
        (
            ValueShape::Email,
            Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap(),
        ),
        (ValueShape::Phone, Regex::new(r"^[\+\-\(\)\s\d]+$").unwrap()),
        (ValueShape::Url, Regex::new(r"^https?://|^www\.").unwrap()),
        (
            ValueShape::PostalCode,
            Regex::new(r"^\d{5}(-\d{4})?$|^[A-Z]\d[A-Z]\s?\d[A-Z]\d$").unwrap(),
        ),
        (
            ValueShape::Date,
            Regex::new(r"^\d{4}-\d{2}-\d{2}$|^\d{2}/\d{2}/\d{4}$").unwrap(),
        ),
    ];
}

impl ValueShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueShape::Email => "email",
            ValueShape::Phone => "phone",
            ValueShape::Url => "url",
            ValueShape::PostalCode => "postal_code",
            ValueShape::Date => "date",
        }
    }
}

impl fmt::Display for ValueShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shapes matched by at least half of the first `SHAPE_SAMPLE_SIZE` values
pub fn detect_shapes<S: AsRef<str>>(values: &[S]) -> Vec<ValueShape> {
    let sample = &values[..values.len().min(SHAPE_SAMPLE_SIZE)];
    if sample.is_empty() {
        return Vec::new();
    }

    SHAPE_RULES
        .iter()
        .filter(|(_, regex)| {
            let hits = sample.iter().filter(|v| regex.is_match(v.as_ref())).count();
            hits * 2 >= sample.len()
        })
        .map(|(shape, _)| *shape)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_column() {
        let values = [
            "luisg@embraer.com.br",
            "leonekohler@surfeu.de",
            "ftremblay@gmail.com",
            "not an email",
        ];
        assert_eq!(detect_shapes(&values), vec![ValueShape::Email]);
    }

    #[test]
    fn test_half_is_enough() {
        let values = ["+55 (12) 3923-5555", "unknown"];
        assert_eq!(detect_shapes(&values), vec![ValueShape::Phone]);
    }

    #[test]
    fn test_postal_and_date() {
        // digit-and-dash values also satisfy the loose phone shape
        assert_eq!(
            detect_shapes(&["T2P 5M5", "94043-1351", "10012"]),
            vec![ValueShape::Phone, ValueShape::PostalCode]
        );
        assert_eq!(
            detect_shapes(&["2009-01-01", "01/02/2009"]),
            vec![ValueShape::Phone, ValueShape::Date]
        );
        assert_eq!(detect_shapes(&["01/02/2009"]), vec![ValueShape::Date]);
    }

    #[test]
    fn test_only_first_twenty_count() {
        let mut values: Vec<String> = (0..20).map(|i| format!("Name{}", i)).collect();
        values.extend((0..30).map(|i| format!("user{}@example.com", i)));
        assert!(detect_shapes(&values).is_empty());
    }

    #[test]
    fn test_empty() {
        let values: [&str; 0] = [];
        assert!(detect_shapes(&values).is_empty());
    }
}
