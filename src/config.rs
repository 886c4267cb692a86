use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::client::LLMClient;
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::provider::HttpProvider;
use crate::types::{Input, InputBody, Message};

/// 端点配置 描述一个可调用的 chat-completion 服务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// 完整请求 URL 例如 `https://api.openai.com/v1/chat/completions`
    pub endpoint: String,
    #[serde(default)]
    pub credential: Credential,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// 每个请求附带的静态 header
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// 按模型族添加 JSON 输出参数
    #[serde(default)]
    pub json_response: bool,
    /// 附加请求字段 例如 top_p 或 max_tokens
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// 鉴权信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// 简单 API Key
    ApiKey {
        /// header 名称 留空时使用 `Authorization: Bearer`
        #[serde(default)]
        header: Option<String>,
        /// 密钥
        key: String,
    },
    /// Bearer Token
    Bearer { token: String },
    /// 无需鉴权的本地服务
    #[default]
    None,
}

impl Credential {
    fn header(&self) -> Option<(String, String)> {
        match self {
            Self::ApiKey {
                header: Some(name),
                key,
            } => Some((name.clone(), key.clone())),
            Self::ApiKey { header: None, key } | Self::Bearer { token: key } => {
                Some(("Authorization".to_string(), format!("Bearer {key}")))
            }
            Self::None => None,
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential: Credential::None,
            default_model: None,
            temperature: None,
            timeout_secs: None,
            headers: HashMap::new(),
            json_response: false,
            extra: Map::new(),
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_json_response(mut self, enabled: bool) -> Self {
        self.json_response = enabled;
        self
    }

    /// 从 JSON 文本读取并校验
    pub fn from_json_str(text: &str) -> Result<Self, LLMError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|err| LLMError::invalid_config("config", err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验字段取值
    pub fn validate(&self) -> Result<(), LLMError> {
        let endpoint = self.endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(LLMError::invalid_config(
                "endpoint",
                format!("expected an http(s) URL, got `{endpoint}`"),
            ));
        }
        match &self.credential {
            Credential::ApiKey { key, .. } if key.trim().is_empty() => {
                return Err(LLMError::invalid_config("credential", "api key is empty"));
            }
            Credential::Bearer { token } if token.trim().is_empty() => {
                return Err(LLMError::invalid_config("credential", "bearer token is empty"));
            }
            _ => {}
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(LLMError::invalid_config(
                    "temperature",
                    format!("{temperature} is outside 0.0..=2.0"),
                ));
            }
        }
        if self.timeout_secs == Some(0) {
            return Err(LLMError::invalid_config("timeout_secs", "must be greater than zero"));
        }
        Ok(())
    }

    /// 静态 header 加鉴权 header
    pub fn headers(&self) -> HashMap<String, String> {
        let mut headers = self.headers.clone();
        if let Some((name, value)) = self.credential.header() {
            headers.insert(name, value);
        }
        headers
    }

    /// 构建使用 HTTP 策略的 LLMClient
    pub fn build_client(&self, transport: DynHttpTransport) -> Result<LLMClient, LLMError> {
        self.validate()?;
        let mut provider = HttpProvider::new(transport);
        if let Some(secs) = self.timeout_secs {
            provider = provider.with_timeout(Duration::from_secs(secs));
        }
        Ok(LLMClient::new(Arc::new(provider)))
    }

    /// 用配置的模型 温度与附加字段构造请求
    pub fn input(&self, messages: Vec<Message>, stream: bool) -> Result<Input, LLMError> {
        let mut body = InputBody::chat(
            self.default_model.clone(),
            messages,
            stream,
            self.temperature,
            self.extra.clone(),
        );
        if self.json_response {
            body = body.with_json_response_format();
        }
        Input::chat(self.endpoint.clone(), body, self.headers())
    }
}
