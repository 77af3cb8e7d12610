use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// `None` runs the process on the in-memory store.
    pub supabase: Option<SupabaseConfig>,
    pub dev_auth_tokens: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: Option<String>,
    pub gemini_base_url: Option<String>,
    pub payment_webhook_secret: Option<String>,
    pub cron_secret: Option<String>,
    pub public_site_url: String,
    pub auto_review_delay: Duration,
    pub translation_retry_backoff: Duration,
    pub order_payment_window: chrono::Duration,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /**
     * from_lookup
     * 从任意 key → value 来源读取配置；空字符串视为未设置，数值解析失败回落默认值。
     */
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let number = |key: &str, default: u64| {
            get(key)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default)
        };

        let supabase = match (get("SUPABASE_URL"), get("SUPABASE_KEY")) {
            (Some(url), Some(key)) => Some(SupabaseConfig { url, key }),
            _ => None,
        };

        Self {
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: get("PORT").and_then(|v| v.parse().ok()).unwrap_or(8080),
            supabase,
            dev_auth_tokens: get("DEV_AUTH_TOKENS").unwrap_or_default(),
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: get("GEMINI_MODEL"),
            gemini_base_url: get("GEMINI_BASE_URL"),
            payment_webhook_secret: get("PAYMENT_WEBHOOK_SECRET"),
            cron_secret: get("CRON_SECRET"),
            public_site_url: get("PUBLIC_SITE_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            auto_review_delay: Duration::from_millis(number("AUTO_REVIEW_DELAY_MS", 200)),
            translation_retry_backoff: Duration::from_millis(number(
                "TRANSLATION_RETRY_BACKOFF_MS",
                1000,
            )),
            order_payment_window: chrono::Duration::hours(
                number("ORDER_PAYMENT_WINDOW_HOURS", 24).min(24 * 30) as i64,
            ),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg.bind_address(), "127.0.0.1:8080");
        assert!(cfg.supabase.is_none());
        assert!(cfg.gemini_api_key.is_none());
        assert_eq!(cfg.auto_review_delay, Duration::from_millis(200));
        assert_eq!(cfg.translation_retry_backoff, Duration::from_secs(1));
        assert_eq!(cfg.order_payment_window, chrono::Duration::hours(24));
    }

    #[test]
    fn test_supabase_needs_url_and_key() {
        let cfg = config(&[("SUPABASE_URL", "https://x.supabase.co")]);
        assert!(cfg.supabase.is_none());

        let cfg = config(&[
            ("SUPABASE_URL", "https://x.supabase.co"),
            ("SUPABASE_KEY", "service-key"),
            ("PORT", "not-a-port"),
            ("GEMINI_API_KEY", "  "),
            ("PUBLIC_SITE_URL", "https://mercadito.mx/"),
        ]);
        assert_eq!(cfg.supabase.unwrap().key, "service-key");
        assert_eq!(cfg.port, 8080);
        assert!(cfg.gemini_api_key.is_none());
        assert_eq!(cfg.public_site_url, "https://mercadito.mx");
    }
}
