use secrecy::{ExposeSecret, SecretBox};
use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid API key: {0}")]
    InvalidKey(String),
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
}

/// Subscription key for the speech service, loaded from the environment
#[derive(Debug)]
pub struct ApiConfig {
    pub speech_key: SecretBox<String>,
}

impl ApiConfig {
    /// Load API configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok(); // Don't error if .env doesn't exist

        let speech_key = Self::load_api_key("SPEECH_API_KEY")?;

        Ok(Self { speech_key })
    }

    /// Load and validate a single API key from environment
    fn load_api_key(env_var: &str) -> Result<SecretBox<String>, ConfigError> {
        let key = env::var(env_var).map_err(|_| ConfigError::MissingEnvVar(env_var.to_string()))?;

        Self::validate_key_format(&key)?;

        Ok(SecretBox::new(Box::new(key)))
    }

    /// Validate API key format
    fn validate_key_format(key: &str) -> Result<(), ConfigError> {
        if key.trim().is_empty() {
            return Err(ConfigError::InvalidKey("API key cannot be empty".to_string()));
        }
        // Subscription keys are hex strings, typically 32 characters
        if key.len() < 10 {
            return Err(ConfigError::InvalidKey(
                "API key should be at least 10 characters".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the subscription key (use only when making API calls)
    pub fn speech_key(&self) -> &str {
        self.speech_key.expose_secret()
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<ApiConfig, ConfigError> {
    match ApiConfig::load() {
        Ok(config) => {
            log::info!("Successfully loaded API configuration");
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_api_key_here", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Endpoints and recognition settings for one session
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// BCP-47 tag of the language to recognize
    pub language: String,
    /// Service region the endpoints live in
    pub region: String,
    /// Tear down and re-open the connection after each turn.end
    pub reconnect_on_turn_end: bool,
    /// Cap on one connection attempt
    pub connect_timeout: Duration,
    /// Full token endpoint URL, overriding the region-derived one
    pub token_endpoint: Option<String>,
    /// Full recognition endpoint URL, overriding the region-derived one
    pub speech_endpoint: Option<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            region: "westus".to_string(),
            reconnect_on_turn_end: false,
            connect_timeout: Duration::from_secs(30),
            token_endpoint: None,
            speech_endpoint: None,
        }
    }
}

impl SpeechConfig {
    /// Token issuance endpoint for the configured region
    pub fn token_url(&self) -> String {
        self.token_endpoint.clone().unwrap_or_else(|| {
            format!(
                "https://{}.api.cognitive.microsoft.com/sts/v1.0/issueToken",
                self.region
            )
        })
    }

    /// Recognition socket endpoint, parameterized by the configured language
    pub fn speech_url(&self) -> Result<Url, url::ParseError> {
        let endpoint = self.speech_endpoint.clone().unwrap_or_else(|| {
            format!(
                "wss://{}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1",
                self.region
            )
        });
        let mut url = Url::parse(&endpoint)?;
        url.query_pairs_mut()
            .append_pair("format", "simple")
            .append_pair("language", &self.language);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation() {
        assert!(ApiConfig::validate_key_format("1234567890abcdef").is_ok());
        assert!(ApiConfig::validate_key_format("short").is_err());
        assert!(ApiConfig::validate_key_format("   ").is_err());
    }

    #[test]
    fn test_default_endpoints() {
        let config = SpeechConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(
            config.token_url(),
            "https://westus.api.cognitive.microsoft.com/sts/v1.0/issueToken"
        );

        let url = config.speech_url().unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(
            url.host_str(),
            Some("westus.stt.speech.microsoft.com")
        );
        assert_eq!(
            url.query(),
            Some("format=simple&language=en-US")
        );
    }

    #[test]
    fn test_language_is_url_encoded() {
        let config = SpeechConfig {
            language: "de-DE".to_string(),
            ..SpeechConfig::default()
        };
        let url = config.speech_url().unwrap();
        assert!(url.query().unwrap().contains("language=de-DE"));
    }

    #[test]
    fn test_endpoint_overrides_win_over_region() {
        let config = SpeechConfig {
            token_endpoint: Some("http://127.0.0.1:9000/token".to_string()),
            speech_endpoint: Some("ws://127.0.0.1:9001/speech".to_string()),
            ..SpeechConfig::default()
        };
        assert_eq!(config.token_url(), "http://127.0.0.1:9000/token");

        let url = config.speech_url().unwrap();
        assert_eq!(url.host_str(), Some("127.0.0.1"));
        assert_eq!(url.path(), "/speech");
        assert_eq!(url.query(), Some("format=simple&language=en-US"));
    }
}
