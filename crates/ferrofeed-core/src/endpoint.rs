//! Static endpoint catalog.
//!
//! Every report type the engine ingests is listed once in [`CATALOG`], in
//! canonical processing order, together with the shape class the normalizer
//! dispatches on and the fixed query parameters the provider expects.

use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::{Symbol, UtcDateTime, ValidationError};

/// Payload layout family; the only thing the normalizer branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeClass {
    TimeSeries,
    Snapshot,
    TabularReport,
    EventList,
    FreeText,
}

impl ShapeClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TimeSeries => "time_series",
            Self::Snapshot => "snapshot",
            Self::TabularReport => "tabular_report",
            Self::EventList => "event_list",
            Self::FreeText => "free_text",
        }
    }
}

impl Display for ShapeClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider data domain, used for reporting and cache policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointCategory {
    Market,
    Technical,
    Fundamental,
    Intelligence,
    Macro,
    Commodity,
    Forex,
    Crypto,
}

/// How the instrument is passed to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolParam {
    /// `symbol=<ticker>`
    Symbol,
    /// `tickers=<ticker>`
    Tickers,
    /// The report is not instrument specific.
    None,
}

/// One provider report type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EndpointSpec {
    pub id: &'static str,
    pub function: &'static str,
    pub category: EndpointCategory,
    pub shape: ShapeClass,
    pub data_type: &'static str,
    pub cacheable: bool,
    pub symbol_param: SymbolParam,
    pub extra_params: &'static [(&'static str, &'static str)],
    /// Snapshot field whose presence marks a complete response.
    pub presence_field: Option<&'static str>,
}

impl EndpointSpec {
    /// Fixed request parameters, excluding the credential.
    pub fn query_params(&self, symbol: &Symbol) -> Vec<(String, String)> {
        let mut params = vec![(String::from("function"), self.function.to_owned())];
        match self.symbol_param {
            SymbolParam::Symbol => params.push((String::from("symbol"), symbol.to_string())),
            SymbolParam::Tickers => params.push((String::from("tickers"), symbol.to_string())),
            SymbolParam::None => {}
        }
        params.extend(
            self.extra_params
                .iter()
                .map(|(name, value)| ((*name).to_owned(), (*value).to_owned())),
        );
        params
    }

    /// Parameters that depend on the wall clock.
    pub fn runtime_params(&self, now: UtcDateTime) -> Vec<(String, String)> {
        if self.function == "EARNINGS_CALL_TRANSCRIPT" {
            return vec![(String::from("quarter"), previous_quarter(now))];
        }
        Vec::new()
    }

    pub const fn is_global(&self) -> bool {
        matches!(self.symbol_param, SymbolParam::None)
    }
}

const fn spec(
    id: &'static str,
    function: &'static str,
    category: EndpointCategory,
    shape: ShapeClass,
    data_type: &'static str,
    extra_params: &'static [(&'static str, &'static str)],
) -> EndpointSpec {
    let cacheable = !matches!(
        category,
        EndpointCategory::Market | EndpointCategory::Technical | EndpointCategory::Intelligence
    );
    let symbol_param = match category {
        EndpointCategory::Macro
        | EndpointCategory::Commodity
        | EndpointCategory::Forex
        | EndpointCategory::Crypto => SymbolParam::None,
        _ => SymbolParam::Symbol,
    };
    EndpointSpec {
        id,
        function,
        category,
        shape,
        data_type,
        cacheable,
        symbol_param,
        extra_params,
        presence_field: None,
    }
}

const fn market(
    id: &'static str,
    function: &'static str,
    extra_params: &'static [(&'static str, &'static str)],
) -> EndpointSpec {
    spec(id, function, EndpointCategory::Market, ShapeClass::TimeSeries, id, extra_params)
}

const fn technical(
    id: &'static str,
    function: &'static str,
    extra_params: &'static [(&'static str, &'static str)],
) -> EndpointSpec {
    spec(
        id,
        function,
        EndpointCategory::Technical,
        ShapeClass::TimeSeries,
        "technical_indicator",
        extra_params,
    )
}

const fn macro_series(
    id: &'static str,
    function: &'static str,
    extra_params: &'static [(&'static str, &'static str)],
) -> EndpointSpec {
    spec(
        id,
        function,
        EndpointCategory::Macro,
        ShapeClass::TimeSeries,
        "economic_indicator",
        extra_params,
    )
}

const fn commodity(id: &'static str, function: &'static str) -> EndpointSpec {
    spec(
        id,
        function,
        EndpointCategory::Commodity,
        ShapeClass::TimeSeries,
        "commodity_price",
        MONTHLY,
    )
}

const fn with_presence(mut endpoint: EndpointSpec, field: &'static str) -> EndpointSpec {
    endpoint.presence_field = Some(field);
    endpoint
}

const fn with_symbol_param(mut endpoint: EndpointSpec, symbol_param: SymbolParam) -> EndpointSpec {
    endpoint.symbol_param = symbol_param;
    endpoint
}

const COMPACT: &[(&str, &str)] = &[("outputsize", "compact")];
const INTRADAY: &[(&str, &str)] = &[("interval", "60min"), ("outputsize", "compact")];
const NONE: &[(&str, &str)] = &[];
const MONTHLY: &[(&str, &str)] = &[("interval", "monthly")];
const PERIOD_CLOSE: &[(&str, &str)] = &[
    ("interval", "daily"),
    ("time_period", "20"),
    ("series_type", "close"),
];
const PERIOD_ONLY: &[(&str, &str)] = &[("interval", "daily"), ("time_period", "14")];
const CLOSE_ONLY: &[(&str, &str)] = &[("interval", "daily"), ("series_type", "close")];
const DAILY: &[(&str, &str)] = &[("interval", "daily")];
const EUR_USD: &[(&str, &str)] = &[("from_symbol", "EUR"), ("to_symbol", "USD")];
const BTC_USD: &[(&str, &str)] = &[("symbol", "BTC"), ("market", "USD")];

/// Every ingested endpoint in canonical processing order.
pub const CATALOG: &[EndpointSpec] = &[
    // Core market data.
    market("time_series_intraday", "TIME_SERIES_INTRADAY", INTRADAY),
    market("time_series_daily", "TIME_SERIES_DAILY", COMPACT),
    market("time_series_daily_adjusted", "TIME_SERIES_DAILY_ADJUSTED", COMPACT),
    market("time_series_weekly", "TIME_SERIES_WEEKLY", NONE),
    market("time_series_weekly_adjusted", "TIME_SERIES_WEEKLY_ADJUSTED", NONE),
    market("time_series_monthly", "TIME_SERIES_MONTHLY", NONE),
    market("time_series_monthly_adjusted", "TIME_SERIES_MONTHLY_ADJUSTED", NONE),
    with_presence(
        spec(
            "global_quote",
            "GLOBAL_QUOTE",
            EndpointCategory::Market,
            ShapeClass::Snapshot,
            "quote_snapshot",
            NONE,
        ),
        "price",
    ),
    // Technical indicators.
    technical("sma", "SMA", PERIOD_CLOSE),
    technical("ema", "EMA", PERIOD_CLOSE),
    technical("wma", "WMA", PERIOD_CLOSE),
    technical("dema", "DEMA", PERIOD_CLOSE),
    technical("tema", "TEMA", PERIOD_CLOSE),
    technical("t3", "T3", PERIOD_CLOSE),
    technical("macd", "MACD", CLOSE_ONLY),
    technical("stoch", "STOCH", DAILY),
    technical("rsi", "RSI", PERIOD_CLOSE),
    technical("stochrsi", "STOCHRSI", PERIOD_CLOSE),
    technical("willr", "WILLR", PERIOD_ONLY),
    technical("adx", "ADX", PERIOD_ONLY),
    technical("cci", "CCI", PERIOD_ONLY),
    technical("aroon", "AROON", PERIOD_ONLY),
    technical("bbands", "BBANDS", PERIOD_CLOSE),
    technical("ad", "AD", DAILY),
    technical("obv", "OBV", DAILY),
    technical("atr", "ATR", PERIOD_ONLY),
    technical("mfi", "MFI", PERIOD_ONLY),
    technical("mom", "MOM", PERIOD_CLOSE),
    technical("roc", "ROC", PERIOD_CLOSE),
    technical("cmo", "CMO", PERIOD_CLOSE),
    technical("sar", "SAR", DAILY),
    technical("trix", "TRIX", PERIOD_CLOSE),
    // Fundamentals.
    with_presence(
        spec(
            "overview",
            "OVERVIEW",
            EndpointCategory::Fundamental,
            ShapeClass::Snapshot,
            "fundamental_overview",
            NONE,
        ),
        "symbol",
    ),
    with_presence(
        spec(
            "etf_profile",
            "ETF_PROFILE",
            EndpointCategory::Fundamental,
            ShapeClass::Snapshot,
            "etf_profile",
            NONE,
        ),
        "net_assets",
    ),
    spec(
        "income_statement",
        "INCOME_STATEMENT",
        EndpointCategory::Fundamental,
        ShapeClass::TabularReport,
        "income_statement",
        NONE,
    ),
    spec(
        "balance_sheet",
        "BALANCE_SHEET",
        EndpointCategory::Fundamental,
        ShapeClass::TabularReport,
        "balance_sheet",
        NONE,
    ),
    spec(
        "cash_flow",
        "CASH_FLOW",
        EndpointCategory::Fundamental,
        ShapeClass::TabularReport,
        "cash_flow",
        NONE,
    ),
    spec(
        "earnings",
        "EARNINGS",
        EndpointCategory::Fundamental,
        ShapeClass::TabularReport,
        "earnings",
        NONE,
    ),
    spec(
        "dividends",
        "DIVIDENDS",
        EndpointCategory::Fundamental,
        ShapeClass::EventList,
        "corporate_action_dividend",
        NONE,
    ),
    spec(
        "splits",
        "SPLITS",
        EndpointCategory::Fundamental,
        ShapeClass::EventList,
        "corporate_action_split",
        NONE,
    ),
    spec(
        "insider_transactions",
        "INSIDER_TRANSACTIONS",
        EndpointCategory::Fundamental,
        ShapeClass::EventList,
        "insider_transaction",
        NONE,
    ),
    spec(
        "shares_outstanding",
        "SHARES_OUTSTANDING",
        EndpointCategory::Fundamental,
        ShapeClass::EventList,
        "shares_outstanding",
        NONE,
    ),
    // Market intelligence.
    with_symbol_param(
        spec(
            "news_sentiment",
            "NEWS_SENTIMENT",
            EndpointCategory::Intelligence,
            ShapeClass::FreeText,
            "news_sentiment",
            &[("limit", "50"), ("sort", "LATEST")],
        ),
        SymbolParam::Tickers,
    ),
    spec(
        "earnings_call_transcript",
        "EARNINGS_CALL_TRANSCRIPT",
        EndpointCategory::Intelligence,
        ShapeClass::FreeText,
        "earnings_call_transcript",
        NONE,
    ),
    // Macroeconomic indicators.
    macro_series("real_gdp", "REAL_GDP", &[("interval", "quarterly")]),
    macro_series("real_gdp_per_capita", "REAL_GDP_PER_CAPITA", NONE),
    macro_series(
        "treasury_yield",
        "TREASURY_YIELD",
        &[("interval", "monthly"), ("maturity", "10year")],
    ),
    macro_series("federal_funds_rate", "FEDERAL_FUNDS_RATE", MONTHLY),
    macro_series("cpi", "CPI", MONTHLY),
    macro_series("inflation", "INFLATION", NONE),
    macro_series("retail_sales", "RETAIL_SALES", NONE),
    macro_series("durables", "DURABLES", NONE),
    macro_series("unemployment", "UNEMPLOYMENT", NONE),
    macro_series("nonfarm_payroll", "NONFARM_PAYROLL", NONE),
    // Commodities.
    commodity("wti", "WTI"),
    commodity("brent", "BRENT"),
    commodity("natural_gas", "NATURAL_GAS"),
    commodity("copper", "COPPER"),
    commodity("aluminum", "ALUMINUM"),
    commodity("wheat", "WHEAT"),
    commodity("corn", "CORN"),
    commodity("cotton", "COTTON"),
    commodity("sugar", "SUGAR"),
    commodity("coffee", "COFFEE"),
    commodity("all_commodities", "ALL_COMMODITIES"),
    // Forex.
    spec(
        "fx_daily",
        "FX_DAILY",
        EndpointCategory::Forex,
        ShapeClass::TimeSeries,
        "fx_rate",
        EUR_USD,
    ),
    spec(
        "fx_weekly",
        "FX_WEEKLY",
        EndpointCategory::Forex,
        ShapeClass::TimeSeries,
        "fx_rate",
        EUR_USD,
    ),
    spec(
        "fx_monthly",
        "FX_MONTHLY",
        EndpointCategory::Forex,
        ShapeClass::TimeSeries,
        "fx_rate",
        EUR_USD,
    ),
    with_presence(
        spec(
            "currency_exchange_rate",
            "CURRENCY_EXCHANGE_RATE",
            EndpointCategory::Forex,
            ShapeClass::Snapshot,
            "fx_snapshot",
            &[("from_currency", "USD"), ("to_currency", "JPY")],
        ),
        "exchange_rate",
    ),
    // Digital currencies.
    spec(
        "digital_currency_daily",
        "DIGITAL_CURRENCY_DAILY",
        EndpointCategory::Crypto,
        ShapeClass::TimeSeries,
        "crypto_price",
        BTC_USD,
    ),
    spec(
        "digital_currency_weekly",
        "DIGITAL_CURRENCY_WEEKLY",
        EndpointCategory::Crypto,
        ShapeClass::TimeSeries,
        "crypto_price",
        BTC_USD,
    ),
    spec(
        "digital_currency_monthly",
        "DIGITAL_CURRENCY_MONTHLY",
        EndpointCategory::Crypto,
        ShapeClass::TimeSeries,
        "crypto_price",
        BTC_USD,
    ),
    with_presence(
        spec(
            "crypto_exchange_rate",
            "CURRENCY_EXCHANGE_RATE",
            EndpointCategory::Crypto,
            ShapeClass::Snapshot,
            "crypto_snapshot",
            &[("from_currency", "BTC"), ("to_currency", "USD")],
        ),
        "exchange_rate",
    ),
];

pub fn catalog() -> &'static [EndpointSpec] {
    CATALOG
}

pub fn find(id: &str) -> Option<&'static EndpointSpec> {
    CATALOG.iter().find(|endpoint| endpoint.id == id)
}

pub fn lookup(id: &str) -> Result<&'static EndpointSpec, ValidationError> {
    find(id).ok_or_else(|| ValidationError::UnknownEndpoint {
        value: id.to_owned(),
    })
}

/// Canonical position of an endpoint, used for checkpoint ordering.
pub fn position(id: &str) -> Option<usize> {
    CATALOG.iter().position(|endpoint| endpoint.id == id)
}

/// Resolve a user supplied subset, returned in canonical order.
pub fn select<S: AsRef<str>>(ids: &[S]) -> Result<Vec<&'static EndpointSpec>, ValidationError> {
    for id in ids {
        lookup(id.as_ref())?;
    }
    Ok(CATALOG
        .iter()
        .filter(|endpoint| ids.iter().any(|id| id.as_ref() == endpoint.id))
        .collect())
}

/// Most recent fully reported calendar quarter, e.g. `2024Q1`.
fn previous_quarter(now: UtcDateTime) -> String {
    let date = now.into_inner();
    let quarter = (u8::from(date.month()) - 1) / 3 + 1;
    if quarter == 1 {
        format!("{}Q4", date.year() - 1)
    } else {
        format!("{}Q{}", date.year(), quarter - 1)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn catalog_ids_are_unique() {
        let ids: HashSet<_> = CATALOG.iter().map(|endpoint| endpoint.id).collect();
        assert_eq!(ids.len(), CATALOG.len());
        assert!(CATALOG.len() >= 70);
    }

    #[test]
    fn snapshots_declare_presence_field() {
        for endpoint in CATALOG.iter().filter(|e| e.shape == ShapeClass::Snapshot) {
            assert!(endpoint.presence_field.is_some(), "{}", endpoint.id);
        }
    }

    #[test]
    fn fundamentals_are_cached_and_prices_are_not() {
        assert!(lookup("overview").expect("overview").cacheable);
        assert!(lookup("cpi").expect("cpi").cacheable);
        assert!(!lookup("time_series_daily").expect("daily").cacheable);
        assert!(!lookup("news_sentiment").expect("news").cacheable);
    }

    #[test]
    fn query_params_follow_symbol_placement() {
        let symbol = Symbol::parse("IBM").expect("symbol");
        let news = lookup("news_sentiment").expect("news").query_params(&symbol);
        assert!(news.contains(&(String::from("tickers"), String::from("IBM"))));

        let gdp = lookup("real_gdp").expect("gdp").query_params(&symbol);
        assert!(gdp.iter().all(|(name, _)| name != "symbol"));
        assert_eq!(gdp[0], (String::from("function"), String::from("REAL_GDP")));
    }

    #[test]
    fn select_keeps_canonical_order() {
        let selected = select(&["overview", "time_series_daily"]).expect("select");
        let ids: Vec<_> = selected.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["time_series_daily", "overview"]);

        let err = select(&["nope"]).expect_err("unknown");
        assert!(matches!(err, ValidationError::UnknownEndpoint { .. }));
    }

    #[test]
    fn transcript_targets_previous_quarter() {
        let endpoint = lookup("earnings_call_transcript").expect("transcript");
        let january = UtcDateTime::parse("2024-01-15T00:00:00Z").expect("ts");
        assert_eq!(
            endpoint.runtime_params(january),
            vec![(String::from("quarter"), String::from("2023Q4"))]
        );
        let august = UtcDateTime::parse("2024-08-01T00:00:00Z").expect("ts");
        assert_eq!(
            endpoint.runtime_params(august),
            vec![(String::from("quarter"), String::from("2024Q2"))]
        );
    }
}
