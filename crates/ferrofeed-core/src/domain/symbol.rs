use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_SYMBOL_LEN: usize = 15;

/// Share-class and preferred separators (`BRK.B`, `BF-B`).
const SEPARATORS: &[char] = &['.', '-'];

/// Uppercase provider ticker; also the instrument key in the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Trim, uppercase and validate. Only ASCII letters, digits and
    /// separators are accepted, so a symbol can never smuggle extra query
    /// parameters into a provider URL.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let ticker = input.trim().to_ascii_uppercase();
        let len = ticker.chars().count();
        if len == 0 {
            return Err(ValidationError::EmptySymbol);
        }
        if len > MAX_SYMBOL_LEN {
            return Err(ValidationError::SymbolTooLong {
                len,
                max: MAX_SYMBOL_LEN,
            });
        }

        for (index, ch) in ticker.chars().enumerate() {
            if index == 0 && !ch.is_ascii_alphabetic() {
                return Err(ValidationError::SymbolInvalidStart { ch });
            }
            if !ch.is_ascii_alphanumeric() && !SEPARATORS.contains(&ch) {
                return Err(ValidationError::SymbolInvalidChar { ch, index });
            }
        }
        Ok(Self(ticker))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Symbol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uppercases_and_trims() {
        let parsed = Symbol::parse(" brk.b ").expect("symbol should parse");
        assert_eq!(parsed.as_str(), "BRK.B");
    }

    #[test]
    fn rejects_leading_digit() {
        let err = Symbol::parse("3M").expect_err("must fail");
        assert!(matches!(err, ValidationError::SymbolInvalidStart { ch: '3' }));
    }

    #[test]
    fn rejects_overlong_tickers() {
        let err = Symbol::parse("ABCDEFGHIJKLMNOP").expect_err("must fail");
        assert!(matches!(err, ValidationError::SymbolTooLong { len: 16, .. }));
    }

    #[test]
    fn rejects_query_string_characters() {
        let err = Symbol::parse("IBM&apikey=x").expect_err("must fail");
        assert!(matches!(
            err,
            ValidationError::SymbolInvalidChar { ch: '&', index: 3 }
        ));
    }
}
