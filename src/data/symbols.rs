//! Symbol-keyed lookup tables: pip sizes, pip values, spreads, currencies.
//!
//! Pip values are the usual USD-account approximations, not live quote
//! conversions. Gold is quoted with a $0.10 pip, which makes its pip value
//! per 100k units roughly 100x a major FX pair.

/// Pip size for a symbol (0.0001 for majors, 0.01 for JPY pairs, 0.1 for gold).
pub fn pip_size(symbol: &str) -> f64 {
    let symbol = symbol.to_uppercase();

    if symbol.contains("XAU") {
        return 0.1;
    }

    if symbol.contains("JPY") {
        return 0.01;
    }

    0.0001
}

/// Pip value in USD per standard lot (100k units).
pub fn pip_value(symbol: &str) -> f64 {
    let symbol = symbol.to_uppercase();

    if symbol.contains("XAU") || symbol.contains("GOLD") {
        // $1 per $0.1 move per 100 units => $1000 per pip per 100k units
        return 1000.0;
    }

    // Majors and USD-quote pairs: ~$10 per pip per 100k units
    10.0
}

/// Default bid-ask spread in pips for a symbol.
pub fn default_spread(symbol: &str) -> f64 {
    let symbol = symbol.to_uppercase();

    if symbol.contains("XAU") {
        2.5
    } else if symbol.contains("GBP") {
        0.9
    } else if symbol.contains("EUR") {
        0.6
    } else {
        1.0
    }
}

/// Currencies a symbol is exposed to, for news-guard intersection checks.
///
/// Six-letter pairs decompose into base + quote; metals map to USD.
pub fn symbol_currencies(symbol: &str) -> Vec<String> {
    let symbol = symbol.to_uppercase();
    let mut currencies = Vec::new();

    if symbol.len() == 6 && symbol.chars().all(|c| c.is_ascii_alphabetic()) {
        currencies.push(symbol[..3].to_string());
        currencies.push(symbol[3..].to_string());
    }

    if (symbol.contains("XAU") || symbol.contains("XAG")) && !currencies.contains(&"USD".to_string())
    {
        currencies.push("USD".to_string());
    }

    currencies
}

/// Convert an internal symbol to an OANDA instrument name (EURUSD -> EUR_USD).
pub fn oanda_instrument(symbol: &str) -> String {
    let symbol = symbol.to_uppercase();
    if symbol.len() == 6 && symbol.chars().all(|c| c.is_ascii_alphabetic()) {
        format!("{}_{}", &symbol[..3], &symbol[3..])
    } else {
        symbol
    }
}

/// Convert an OANDA instrument name back to an internal symbol.
pub fn from_oanda_instrument(instrument: &str) -> String {
    instrument.replace('_', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pip_size() {
        assert_eq!(pip_size("EURUSD"), 0.0001);
        assert_eq!(pip_size("GBPUSD"), 0.0001);
        assert_eq!(pip_size("USDJPY"), 0.01);
        assert_eq!(pip_size("XAUUSD"), 0.1);
    }

    #[test]
    fn test_pip_value() {
        assert_eq!(pip_value("EURUSD"), 10.0);
        assert_eq!(pip_value("XAUUSD"), 1000.0);
    }

    #[test]
    fn test_symbol_currencies() {
        assert_eq!(symbol_currencies("EURUSD"), vec!["EUR", "USD"]);
        assert_eq!(symbol_currencies("GBPUSD"), vec!["GBP", "USD"]);
        assert_eq!(symbol_currencies("XAUUSD"), vec!["XAU", "USD"]);
    }

    #[test]
    fn test_oanda_instrument_mapping() {
        assert_eq!(oanda_instrument("EURUSD"), "EUR_USD");
        assert_eq!(oanda_instrument("XAUUSD"), "XAU_USD");
        assert_eq!(from_oanda_instrument("EUR_USD"), "EURUSD");
    }
}
