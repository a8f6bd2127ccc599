use std::time::Duration;
use tracing::warn;

const CAPTCHA_VERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";
const CAPTCHA_VERIFY_TIMEOUT: Duration = Duration::from_millis(2000);
const SMTP_URL: &str = "smtps://email-smtp.us-east-1.amazonaws.com";

/// Deployment configuration, read once when the function starts.
///
/// Nothing here is validated on load. The handler checks the values it needs on each request so
/// that a misconfigured deployment answers with a 500 instead of failing to start.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub destination_email_address: Option<String>,
    pub subject_suffix: Option<String>,
    pub captcha_enabled: bool,
    pub captcha_token_field_name: Option<String>,
    pub captcha_secret_parameter_path: Option<String>,
    pub captcha_verify_url: String,
    pub captcha_verify_timeout: Duration,
    pub smtp_url: String,
    pub smtp_credentials_parameter_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Self {
            destination_email_address: non_empty("ValidatedEmailAddress"),
            subject_suffix: non_empty("EmailSubjectSuffix"),
            captcha_enabled: lookup("CaptchaEnabled")
                .is_some_and(|value| value.trim().eq_ignore_ascii_case("true")),
            captcha_token_field_name: non_empty("CaptchaTokenFieldName"),
            captcha_secret_parameter_path: non_empty("CaptchaSecretKeyParameterPath"),
            captcha_verify_url: non_empty("CaptchaVerifyUrl")
                .unwrap_or_else(|| CAPTCHA_VERIFY_URL.into()),
            captcha_verify_timeout: non_empty("CaptchaVerifyTimeoutMs")
                .map(|value| parse_timeout(&value))
                .unwrap_or(CAPTCHA_VERIFY_TIMEOUT),
            smtp_url: non_empty("SmtpUrl").unwrap_or_else(|| SMTP_URL.into()),
            smtp_credentials_parameter_path: non_empty("SmtpCredentialsParameterPath"),
        }
    }

    /// The request body key holding the captcha token, if captcha verification is on.
    pub fn captcha_field(&self) -> Option<&str> {
        if self.captcha_enabled {
            self.captcha_token_field_name.as_deref()
        } else {
            None
        }
    }
}

fn parse_timeout(value: &str) -> Duration {
    match value.trim().parse::<u64>() {
        Ok(millis) => Duration::from_millis(millis),
        Err(error) => {
            warn!("Ignoring CaptchaVerifyTimeoutMs={value}: {error}");
            CAPTCHA_VERIFY_TIMEOUT
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::Config;
    use std::collections::HashMap;

    pub const DESTINATION_EMAIL_ADDRESS: &str = "admin@example.com";
    pub const CAPTCHA_FIELD_NAME: &str = "cf-turnstile";
    pub const CAPTCHA_SECRET_PARAMETER_PATH: &str = "/contact-us/captcha-secret";

    pub fn config_from(variables: &[(&str, &str)]) -> Config {
        let variables: HashMap<String, String> = variables
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| variables.get(key).cloned())
    }

    pub fn config_without_captcha() -> Config {
        config_from(&[("ValidatedEmailAddress", DESTINATION_EMAIL_ADDRESS)])
    }

    pub fn config_with_captcha() -> Config {
        config_from(&[
            ("ValidatedEmailAddress", DESTINATION_EMAIL_ADDRESS),
            ("CaptchaEnabled", "true"),
            ("CaptchaTokenFieldName", CAPTCHA_FIELD_NAME),
            (
                "CaptchaSecretKeyParameterPath",
                CAPTCHA_SECRET_PARAMETER_PATH,
            ),
        ])
    }
}
