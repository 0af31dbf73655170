use http::HeaderMap;

/// Disables all chaos for the request when truthy.
pub const NO_CHAOS_HEADER: &str = "x-nah-no-chaos";
/// Forces an exact latency in milliseconds, replacing any configured range.
pub const LATENCY_HEADER: &str = "x-nah-latency";

/// Per-request chaos controls supplied by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChaosOverrides {
    pub bypass: bool,
    pub forced_latency_ms: Option<u64>,
}

impl ChaosOverrides {
    /// Unparseable header values are ignored.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let value = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);
        Self {
            bypass: value(NO_CHAOS_HEADER).is_some_and(is_truthy),
            forced_latency_ms: value(LATENCY_HEADER).and_then(|v| v.parse().ok()),
        }
    }
}

fn is_truthy(v: &str) -> bool {
    ["true", "1", "yes", "on"].iter().any(|t| v.eq_ignore_ascii_case(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn bypass_values() {
        for v in ["true", "TRUE", "1", "yes", "On"] {
            let o = ChaosOverrides::from_headers(&headers(&[(NO_CHAOS_HEADER, v)]));
            assert!(o.bypass, "{v} should bypass");
        }
        for v in ["false", "0", "nope", ""] {
            let o = ChaosOverrides::from_headers(&headers(&[(NO_CHAOS_HEADER, v)]));
            assert!(!o.bypass, "{v} should not bypass");
        }
    }

    #[test]
    fn forced_latency() {
        let o = ChaosOverrides::from_headers(&headers(&[(LATENCY_HEADER, "250")]));
        assert_eq!(o.forced_latency_ms, Some(250));
        let o = ChaosOverrides::from_headers(&headers(&[(LATENCY_HEADER, "soon")]));
        assert_eq!(o.forced_latency_ms, None);
        assert_eq!(ChaosOverrides::from_headers(&HeaderMap::new()), ChaosOverrides::default());
    }
}
