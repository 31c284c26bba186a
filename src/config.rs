use serde::{Deserialize, Serialize};

/// Tunable budgets for the signature accumulator.
///
/// These are the only two knobs the wire protocol exposes: how much audio
/// time one signature is allowed to span, and how many peaks it may hold
/// before `get_next_signature` is allowed to stop early.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Minimum audio duration (in seconds) a signature must cover before a
    /// peak-count budget alone can end it.
    pub max_time_seconds: f64,

    /// Minimum total peak count across all bands before a time budget alone
    /// can end it.
    pub max_peaks: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_time_seconds: 3.1,
            max_peaks: 255,
        }
    }
}

impl GeneratorConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time budget, in seconds
    pub fn with_max_time_seconds(mut self, max_time_seconds: f64) -> Self {
        self.max_time_seconds = max_time_seconds;
        self
    }

    /// Set the peak-count budget
    pub fn with_max_peaks(mut self, max_peaks: usize) -> Self {
        self.max_peaks = max_peaks;
        self
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: GeneratorConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
