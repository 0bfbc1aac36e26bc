//! Ordered instrument universe.

use std::fs;
use std::path::Path;

use crate::{Symbol, ValidationError};

/// Large-cap US equities and ETFs tracked by default, in processing order.
const DEFAULT_TICKERS: &[&str] = &[
    "AAPL", "MSFT", "NVDA", "AMZN", "GOOGL", "GOOG", "META", "BRK.B", "LLY", "AVGO",
    "JPM", "TSLA", "UNH", "XOM", "V", "MA", "PG", "JNJ", "COST", "HD",
    "MRK", "ABBV", "WMT", "NFLX", "CVX", "BAC", "KO", "CRM", "AMD", "PEP",
    "ORCL", "TMO", "ADBE", "LIN", "ACN", "MCD", "CSCO", "ABT", "WFC", "DHR",
    "QCOM", "INTU", "DIS", "GE", "TXN", "CAT", "VZ", "AMGN", "IBM", "PFE",
    "CMCSA", "NOW", "PM", "UNP", "NEE", "SPGI", "ISRG", "GS", "COP", "HON",
    "RTX", "UBER", "AMAT", "LOW", "T", "BKNG", "ELV", "AXP", "PLD", "BLK",
    "SYK", "MS", "TJX", "VRTX", "LMT", "MDT", "PGR", "C", "SCHW", "CB",
    "REGN", "ETN", "ADP", "MMC", "BSX", "ADI", "LRCX", "CI", "BA", "MU",
    "PANW", "DE", "KLAC", "SBUX", "FI", "BMY", "MDLZ", "GILD", "SO", "BX",
    "ANET", "SNPS", "ZTS", "AMT", "CDNS", "MO", "ICE", "DUK", "SHW", "CL",
    "CME", "TT", "EQIX", "WM", "MCK", "CVS", "TGT", "NOC", "ITW", "CMG",
    "PH", "FCX", "BDX", "EOG", "APH", "USB", "PYPL", "CSX", "ABNB", "MPC",
    "ORLY", "MSI", "PNC", "GD", "ECL", "EMR", "MAR", "NXPI", "ROP", "PSX",
    "AON", "APD", "CTAS", "NSC", "HCA", "MCO", "WELL", "AJG", "FDX", "SLB",
    "TDG", "COF", "CARR", "PCAR", "AZO", "TRV", "AFL", "NEM", "SRE", "MMM",
    "OKE", "WMB", "ADSK", "HLT", "GM", "F", "DLR", "SPG", "PSA", "O",
    "KMB", "ALL", "AEP", "MET", "D", "CCI", "JCI", "AIG", "FTNT", "MNST",
    "DXCM", "PAYX", "ROST", "KMI", "HUM", "IDXX", "LHX", "STZ", "PRU", "KHC",
    "SPY", "QQQ", "DIA", "IWM", "VTI", "VOO", "XLK", "XLF", "XLE", "XLV",
];

pub fn default_universe() -> Vec<Symbol> {
    DEFAULT_TICKERS
        .iter()
        .filter_map(|ticker| Symbol::parse(ticker).ok())
        .collect()
}

/// Load a newline-delimited ticker list; `#` starts a comment.
pub fn load_universe(path: &Path) -> Result<Vec<Symbol>, UniverseError> {
    let contents = fs::read_to_string(path)?;
    let symbols = parse_universe(&contents)?;
    if symbols.is_empty() {
        return Err(UniverseError::Validation(ValidationError::EmptyUniverse {
            path: path.display().to_string(),
        }));
    }
    Ok(symbols)
}

pub fn parse_universe(contents: &str) -> Result<Vec<Symbol>, ValidationError> {
    let mut symbols: Vec<Symbol> = Vec::new();
    for line in contents.lines() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let symbol = Symbol::parse(line)?;
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    Ok(symbols)
}

#[derive(Debug, thiserror::Error)]
pub enum UniverseError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_universe_has_two_hundred_valid_symbols() {
        let universe = default_universe();
        assert_eq!(universe.len(), DEFAULT_TICKERS.len());
        assert_eq!(universe.len(), 200);
        assert_eq!(universe[0].as_str(), "AAPL");
    }

    #[test]
    fn file_format_skips_comments_and_duplicates() {
        let parsed = parse_universe("# watchlist\nibm\n\nmsft # software\nIBM\n").expect("parse");
        let tickers: Vec<_> = parsed.iter().map(Symbol::as_str).collect();
        assert_eq!(tickers, vec!["IBM", "MSFT"]);
    }
}
