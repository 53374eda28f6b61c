//! Recognition language sets.
//!
//! Languages are written the way tesseract takes them: `pan+eng`. Commas are
//! accepted too, since that is what people type into query strings, and so is
//! whitespace, which is what `+` becomes after form decoding. Codes are
//! checked against a strict pattern before anything else looks at them, so a
//! code can never smuggle extra arguments into an engine command line.

use crate::error::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static RE_LANGUAGE_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{3}(?:_[a-z]{2,8})?$").unwrap());

/// An ordered, de-duplicated set of recognition language codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct LanguageSet(Vec<String>);

impl LanguageSet {
    /// Parse `eng`, `pan+eng`, or `pan,eng`. Order is kept, duplicates dropped.
    pub fn parse(spec: &str) -> Result<Self, ValidationError> {
        let mut codes: Vec<String> = Vec::new();
        for raw in spec.split(|c: char| c == '+' || c == ',' || c.is_whitespace()) {
            let code = raw.trim().to_ascii_lowercase();
            if code.is_empty() {
                continue;
            }
            if !RE_LANGUAGE_CODE.is_match(&code) {
                return Err(ValidationError::InvalidLanguage { code });
            }
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
        if codes.is_empty() {
            return Err(ValidationError::InvalidLanguage {
                code: spec.to_string(),
            });
        }
        Ok(Self(codes))
    }

    /// Reject any code that is not in `supported`.
    pub fn ensure_supported(&self, supported: &[String]) -> Result<(), ValidationError> {
        match self.0.iter().find(|c| !supported.contains(c)) {
            Some(code) => Err(ValidationError::UnsupportedLanguage {
                code: code.clone(),
                supported: supported.join(", "),
            }),
            None => Ok(()),
        }
    }

    pub fn codes(&self) -> &[String] {
        &self.0
    }

    /// Tesseract's `-l` argument form.
    pub fn to_engine_arg(&self) -> String {
        self.0.join("+")
    }
}

impl fmt::Display for LanguageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_engine_arg())
    }
}

impl From<LanguageSet> for String {
    fn from(set: LanguageSet) -> Self {
        set.to_engine_arg()
    }
}

impl TryFrom<String> for LanguageSet {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plus_and_comma_forms() {
        let set = LanguageSet::parse("pan+eng").unwrap();
        assert_eq!(set.codes(), ["pan", "eng"]);
        let set = LanguageSet::parse(" eng , deu ").unwrap();
        assert_eq!(set.to_engine_arg(), "eng+deu");
        let set = LanguageSet::parse("pan eng").unwrap();
        assert_eq!(set.codes(), ["pan", "eng"]);
    }

    #[test]
    fn keeps_order_and_drops_duplicates() {
        let set = LanguageSet::parse("eng+pan+eng").unwrap();
        assert_eq!(set.codes(), ["eng", "pan"]);
    }

    #[test]
    fn accepts_script_suffix() {
        assert!(LanguageSet::parse("chi_sim").is_ok());
    }

    #[test]
    fn rejects_injection_attempts() {
        for bad in ["eng --psm 0", "en", "eng;rm", "../eng", "+"] {
            assert!(
                matches!(
                    LanguageSet::parse(bad),
                    Err(ValidationError::InvalidLanguage { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn unsupported_code_is_reported() {
        let set = LanguageSet::parse("eng+fra").unwrap();
        let err = set.ensure_supported(&["eng".to_string()]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnsupportedLanguage {
                code: "fra".into(),
                supported: "eng".into()
            }
        );
    }
}
