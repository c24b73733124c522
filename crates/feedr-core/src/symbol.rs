//! Symbol normalization.
//!
//! Every feeder keys its caches by the internal form: uppercase with
//! separators stripped (`BTCUSDT`). Consumers see the external form
//! `BASE/QUOTE`. Conversion between the two splits on a
//! priority-ordered list of known quote currencies.

/// Known quote currencies, in match-priority order.
///
/// Order matters: `USDT` must be tried before `USD` so that
/// `BTCUSDT` splits as `BTC/USDT`, not `BTCUS/DT`.
const KNOWN_QUOTES: [&str; 6] = ["USDT", "USDC", "BUSD", "BTC", "ETH", "USD"];

/// Normalize any symbol form to the internal cache key.
///
/// `btc-usdt`, `BTC_USDT`, `BTC/USDT` and `BTCUSDT` all map to
/// `BTCUSDT`.
pub fn to_internal(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | '/'))
        .collect::<String>()
        .to_uppercase()
}

/// Convert an internal key to the external `BASE/QUOTE` form.
///
/// Splits on the first known quote that leaves a non-empty base.
/// If no known quote matches, the final three characters are treated
/// as the quote.
pub fn to_external(symbol: &str) -> String {
    let internal = to_internal(symbol);
    for quote in KNOWN_QUOTES {
        if let Some(base) = internal.strip_suffix(quote) {
            if !base.is_empty() {
                return format!("{base}/{quote}");
            }
        }
    }
    if internal.len() > 3 {
        let (base, quote) = internal.split_at(internal.len() - 3);
        format!("{base}/{quote}")
    } else {
        internal
    }
}
