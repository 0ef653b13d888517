use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub api_key: String,
    pub from_email: String,
    pub from_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub otp_ttl_minutes: i64,
    pub reset_token_ttl_minutes: i64,
    pub session_ttl_minutes: i64,
    pub session_sweep_seconds: u64,
    pub reset_link_base: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            otp_ttl_minutes: 5,
            reset_token_ttl_minutes: 60,
            session_ttl_minutes: 60 * 24,
            session_sweep_seconds: 300,
            reset_link_base: "http://localhost:3000/reset-password".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Without a database the service keeps everything in memory.
    pub database_url: Option<String>,
    pub auth: AuthConfig,
    pub mail: Option<MailConfig>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        let defaults = AuthConfig::default();
        let auth = AuthConfig {
            otp_ttl_minutes: env_or("OTP_TTL_MINUTES", defaults.otp_ttl_minutes),
            reset_token_ttl_minutes: env_or(
                "RESET_TOKEN_TTL_MINUTES",
                defaults.reset_token_ttl_minutes,
            ),
            session_ttl_minutes: env_or("SESSION_TTL_MINUTES", defaults.session_ttl_minutes),
            session_sweep_seconds: env_or("SESSION_SWEEP_SECONDS", defaults.session_sweep_seconds),
            reset_link_base: std::env::var("RESET_LINK_BASE").unwrap_or(defaults.reset_link_base),
        };
        anyhow::ensure!(auth.otp_ttl_minutes > 0, "OTP_TTL_MINUTES must be positive");
        anyhow::ensure!(auth.session_ttl_minutes > 0, "SESSION_TTL_MINUTES must be positive");

        let mail = match std::env::var("SENDGRID_API_KEY") {
            Ok(api_key) if !api_key.is_empty() => Some(MailConfig {
                api_key,
                from_email: std::env::var("MAIL_FROM")?,
                from_name: std::env::var("MAIL_FROM_NAME").unwrap_or_else(|_| "Ridehail".into()),
            }),
            _ => None,
        };

        Ok(Self {
            database_url,
            auth,
            mail,
        })
    }
}
