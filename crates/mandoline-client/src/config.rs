use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.mandoline.ai";

#[derive(Clone)]
pub struct MandolineConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl MandolineConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

// The api key never shows up in debug output.
impl std::fmt::Debug for MandolineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MandolineConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}
