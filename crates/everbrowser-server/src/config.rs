use everbrowser_core::OrchestratorConfig;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "everbrowser.toml";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub model: ModelConfig,
    pub agent: AgentConfig,
    pub orchestrator: OrchestratorConfig,
}

/// OpenAI-compatible model endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            api_key: String::new(),
            base_url: default_base_url(),
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    /// Prompt run once at startup before the agent is marked ready
    #[serde(default)]
    pub warmup_prompt: Option<String>,
    #[serde(default = "default_page_text_bytes")]
    pub page_text_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            warmup_prompt: None,
            page_text_bytes: default_page_text_bytes(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    model: ModelConfig,
    #[serde(default)]
    agent: AgentConfig,
    #[serde(default)]
    orchestrator: OrchestratorConfig,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    41465
}

fn default_model_name() -> String {
    "gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_max_tool_rounds() -> usize {
    everbrowser_ai::agent::DEFAULT_MAX_TOOL_ROUNDS
}

fn default_page_text_bytes() -> usize {
    4000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            model: ModelConfig::default(),
            agent: AgentConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = match load_from_file()? {
            Some(file_config) => Self::from_file(file_config),
            None => Self::from_env(),
        };
        config.orchestrator.validate()?;
        Ok(config)
    }

    fn from_file(file: FileConfig) -> Self {
        let mut model = file.model;
        // Keep the key out of the file if the environment provides it
        if model.api_key.is_empty()
            && let Ok(key) = env::var("EVERBROWSER_API_KEY")
        {
            model.api_key = key;
        }

        Self {
            host: file.server.host,
            port: file.server.port,
            model,
            agent: file.agent,
            orchestrator: file.orchestrator,
        }
    }

    fn from_env() -> Self {
        let host = env::var("EVERBROWSER_HOST").unwrap_or_else(|_| default_host());
        let port = env::var("EVERBROWSER_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or_else(default_port);
        let model = ModelConfig {
            name: env::var("EVERBROWSER_MODEL").unwrap_or_else(|_| default_model_name()),
            api_key: env::var("EVERBROWSER_API_KEY").unwrap_or_default(),
            base_url: env::var("EVERBROWSER_BASE_URL").unwrap_or_else(|_| default_base_url()),
            temperature: None,
        };

        Self {
            host,
            port,
            model,
            agent: AgentConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn load_from_file() -> anyhow::Result<Option<FileConfig>> {
    let config_path = env::var("EVERBROWSER_CONFIG").ok();
    let path = if let Some(path) = config_path {
        Some(path)
    } else if Path::new(DEFAULT_CONFIG_FILE).exists() {
        Some(DEFAULT_CONFIG_FILE.to_string())
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(None);
    };

    parse_file(Path::new(&path)).map(Some)
}

fn parse_file(path: &Path) -> anyhow::Result<FileConfig> {
    let contents = fs::read_to_string(path)
        .map_err(|err| anyhow::anyhow!("Failed to read config {}: {}", path.display(), err))?;
    let parsed: FileConfig = toml::from_str(&contents)
        .map_err(|err| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), err))?;
    Ok(parsed)
}
