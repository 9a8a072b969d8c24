use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

/// SIREN of La Poste, whose establishments do not follow the Luhn rule.
const LA_POSTE_SIREN: &str = "356000000";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Organization {
    pub id: Uuid,
    #[schema(example = "21920023500014")]
    pub siret: String,
    /// Legal name; filled in asynchronously from the registry.
    pub name: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(siret: &Siret) -> Self {
        Self {
            id: Uuid::new_v4(),
            siret: siret.as_str().to_string(),
            name: None,
            created_at: Utc::now(),
        }
    }
}

/// A checksum-validated 14 digit establishment identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Siret(String);

impl Siret {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let candidate: String = raw.chars().filter(|c| !c.is_whitespace()).collect();

        if candidate.len() != 14 || !candidate.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("Invalid SIRET '{}': expected 14 digits", raw));
        }

        let valid = if candidate.starts_with(LA_POSTE_SIREN) {
            digit_sum(&candidate) % 5 == 0
        } else {
            luhn_valid(&candidate)
        };

        if !valid {
            return Err(format!("Invalid SIRET '{}': checksum mismatch", raw));
        }

        Ok(Self(candidate))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn siren(&self) -> &str {
        &self.0[..9]
    }
}

impl fmt::Display for Siret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn digit_sum(digits: &str) -> u32 {
    digits.bytes().map(|b| u32::from(b - b'0')).sum()
}

fn luhn_valid(digits: &str) -> bool {
    let total: u32 = digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let d = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    total % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_siret() {
        let siret = Siret::parse("21920023500014").unwrap();
        assert_eq!(siret.as_str(), "21920023500014");
        assert_eq!(siret.siren(), "219200235");
    }

    #[test]
    fn test_whitespace_is_ignored() {
        assert!(Siret::parse("732 829 320 00074").is_ok());
    }

    #[test]
    fn test_bad_checksum() {
        assert!(Siret::parse("12345678901234").is_err());
    }

    #[test]
    fn test_wrong_length_or_letters() {
        assert!(Siret::parse("2192002350001").is_err());
        assert!(Siret::parse("2192002350001A").is_err());
        assert!(Siret::parse("").is_err());
    }

    #[test]
    fn test_la_poste_exception() {
        // Luhn-invalid, digit sum divisible by 5
        assert!(Siret::parse("35600000049837").is_ok());
        // Luhn-valid, digit sum not divisible by 5
        assert!(Siret::parse("35600000000048").is_err());
        assert!(Siret::parse("35600000000049").is_err());
    }
}
