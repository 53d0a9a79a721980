//! Runtime settings loaded from environment variables.
//!
//! Every pipeline threshold is tunable here rather than hardwired: the
//! defaults are the values that worked in production, but they were found
//! empirically and are not expected to generalize across corpora.

use std::env;
use std::time::Duration;

/// All tunables for the analysis pipeline, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Gemini model identifier (e.g. "gemini-2.5-flash").
    pub gemini_model: String,
    pub gemini_temperature: f64,
    pub gemini_max_output_tokens: u32,
    /// Overall timeout for a single remote call, independent of retries.
    pub request_timeout: Duration,
    /// Retry budget per remote call.
    pub max_retries: u32,
    /// Base wait for exponential backoff (doubles each attempt).
    pub backoff_base: Duration,

    /// Minimum stripped local-text length for the text-first strategy.
    pub sufficient_text_chars: usize,
    /// Documents at or above this page count skip the native fast-track.
    pub fast_track_max_pages: u32,
    /// Pages per chunk for the chunked vision strategy.
    pub chunk_size_pages: u32,
    /// Maximum simultaneous in-flight remote calls during chunk fan-out.
    pub max_concurrent_extractions: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gemini_model: "gemini-2.5-flash".to_string(),
            gemini_temperature: 0.0,
            gemini_max_output_tokens: 65536,
            request_timeout: Duration::from_secs(900),
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
            sufficient_text_chars: 200,
            fast_track_max_pages: 50,
            chunk_size_pages: 10,
            max_concurrent_extractions: 5,
        }
    }
}

impl Settings {
    /// Load settings from environment, falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            gemini_model: env_or("GEMINI_MODEL", defaults.gemini_model),
            gemini_temperature: parse_or("GEMINI_TEMPERATURE", defaults.gemini_temperature),
            gemini_max_output_tokens: parse_or(
                "GEMINI_MAX_OUTPUT_TOKENS",
                defaults.gemini_max_output_tokens,
            ),
            request_timeout: Duration::from_secs(parse_or(
                "GEMINI_TIMEOUT_SECONDS",
                defaults.request_timeout.as_secs(),
            )),
            max_retries: parse_or("GEMINI_MAX_RETRIES", defaults.max_retries),
            backoff_base: Duration::from_secs(parse_or(
                "GEMINI_BACKOFF_BASE_SECONDS",
                defaults.backoff_base.as_secs(),
            )),
            sufficient_text_chars: parse_or(
                "SUFFICIENT_TEXT_CHARS",
                defaults.sufficient_text_chars,
            ),
            fast_track_max_pages: parse_or("FAST_TRACK_MAX_PAGES", defaults.fast_track_max_pages),
            chunk_size_pages: parse_or("CHUNK_SIZE_PAGES", defaults.chunk_size_pages),
            max_concurrent_extractions: parse_or(
                "MAX_CONCURRENT_EXTRACTIONS",
                defaults.max_concurrent_extractions,
            ),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_values() {
        let s = Settings::default();
        assert_eq!(s.sufficient_text_chars, 200);
        assert_eq!(s.fast_track_max_pages, 50);
        assert_eq!(s.chunk_size_pages, 10);
        assert_eq!(s.max_concurrent_extractions, 5);
        assert_eq!(s.max_retries, 3);
        assert_eq!(s.backoff_base, Duration::from_secs(2));
    }

    #[test]
    fn parse_or_falls_back_on_garbage() {
        std::env::set_var("TEST_PARSE_OR_GARBAGE", "not-a-number");
        let v: u32 = parse_or("TEST_PARSE_OR_GARBAGE", 7);
        assert_eq!(v, 7);
        std::env::remove_var("TEST_PARSE_OR_GARBAGE");
    }
}
