//! Management backend: LLM provider configuration (`/api/v1/llm-providers`).
//!
//! A "factory" is a provider (OpenAI, Ollama, ...). Setting an API key on a factory imports all
//! of its predefined models; `add_llm` registers a single custom model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::client::{ApiClient, ApiError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Factory {
    pub name: String,
    #[serde(default)]
    pub logo: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub model_types: Vec<String>,
}

/// A configured model inside a factory group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MyLlm {
    #[serde(rename = "type")]
    pub typ: String,
    pub name: String,
    #[serde(default)]
    pub used_token: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MyLlmGroup {
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub llm: Vec<MyLlm>,
}

/// Entry of `list`, grouped by factory id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmItem {
    pub llm_name: String,
    pub model_type: String,
    pub fid: String,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetApiKey {
    pub llm_factory: String,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Provider-specific credentials for `add_llm`. The variant must match the factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    ApiKey(String),
    VolcEngine { ark_api_key: String, endpoint_id: String },
    TencentHunyuan { sid: String, sk: String },
    TencentCloud { sid: String, sk: String },
    Bedrock { ak: String, sk: String, region: String },
    GoogleCloud { project_id: String, region: String, service_account_key: String },
    /// Chat models use the API password only.
    SparkChat { api_password: String },
    SparkTts { app_id: String, api_secret: String, api_key: String },
    BaiduYiyan { ak: String, sk: String },
    FishAudio { ak: String, refid: String },
    Azure { api_key: String, api_version: Option<String> },
}

/// A custom model to register.
#[derive(Debug, Clone)]
pub struct AddLlm {
    pub llm_factory: String,
    pub llm_name: String,
    pub model_type: String,
    pub credentials: Credentials,
    pub api_base: Option<String>,
    pub max_tokens: Option<u64>,
    pub vision: bool,
}

pub const DEFAULT_MAX_TOKENS: u64 = 4096;
const DEFAULT_AZURE_API_VERSION: &str = "2024-02-01";

impl AddLlm {
    /// Flat request body in the shape the management server expects.
    pub fn to_body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "llm_factory": self.llm_factory,
            "llm_name": self.llm_name,
            "model_type": self.model_type,
            "api_base": self.api_base.clone().unwrap_or_default(),
            "max_tokens": self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if self.vision {
            body["vision"] = serde_json::Value::Bool(true);
        }
        let fields: Vec<(&str, &str)> = match &self.credentials {
            Credentials::ApiKey(k) => vec![("api_key", k.as_str())],
            Credentials::VolcEngine { ark_api_key, endpoint_id } => {
                vec![("ark_api_key", ark_api_key.as_str()), ("endpoint_id", endpoint_id.as_str())]
            }
            Credentials::TencentHunyuan { sid, sk } => {
                vec![("hunyuan_sid", sid.as_str()), ("hunyuan_sk", sk.as_str())]
            }
            Credentials::TencentCloud { sid, sk } => {
                vec![("tencent_cloud_sid", sid.as_str()), ("tencent_cloud_sk", sk.as_str())]
            }
            Credentials::Bedrock { ak, sk, region } => vec![
                ("bedrock_ak", ak.as_str()),
                ("bedrock_sk", sk.as_str()),
                ("bedrock_region", region.as_str()),
            ],
            Credentials::GoogleCloud {
                project_id,
                region,
                service_account_key,
            } => vec![
                ("google_project_id", project_id.as_str()),
                ("google_region", region.as_str()),
                ("google_service_account_key", service_account_key.as_str()),
            ],
            Credentials::SparkChat { api_password } => vec![("spark_api_password", api_password.as_str())],
            Credentials::SparkTts {
                app_id,
                api_secret,
                api_key,
            } => vec![
                ("spark_app_id", app_id.as_str()),
                ("spark_api_secret", api_secret.as_str()),
                ("spark_api_key", api_key.as_str()),
            ],
            Credentials::BaiduYiyan { ak, sk } => vec![("yiyan_ak", ak.as_str()), ("yiyan_sk", sk.as_str())],
            Credentials::FishAudio { ak, refid } => {
                vec![("fish_audio_ak", ak.as_str()), ("fish_audio_refid", refid.as_str())]
            }
            Credentials::Azure {
                api_key,
                api_version,
            } => vec![
                ("api_key", api_key.as_str()),
                (
                    "api_version",
                    api_version.as_deref().unwrap_or(DEFAULT_AZURE_API_VERSION),
                ),
            ],
        };
        for (k, v) in fields {
            body[k] = serde_json::Value::String(v.to_string());
        }
        body
    }

    /// Name under which the server stores the model. Some self-hosted factories get a suffix.
    pub fn stored_name(&self) -> String {
        match llm_name_suffix(&self.llm_factory) {
            Some(suffix) => format!("{}___{}", self.llm_name, suffix),
            None => self.llm_name.clone(),
        }
    }
}

fn llm_name_suffix(factory: &str) -> Option<&'static str> {
    match factory {
        "LocalAI" => Some("LocalAI"),
        "HuggingFace" => Some("HuggingFace"),
        "OpenAI-API-Compatible" => Some("OpenAI-API"),
        "VLLM" => Some("VLLM"),
        _ => None,
    }
}

impl ApiClient {
    pub async fn llm_factories(&self) -> Result<Vec<Factory>, ApiError> {
        self.get("api/v1/llm-providers/factories", &[]).await
    }

    pub async fn my_llms(&self) -> Result<BTreeMap<String, MyLlmGroup>, ApiError> {
        self.get("api/v1/llm-providers/my-llms", &[]).await
    }

    /// Returns the server message (e.g. how many models were imported).
    pub async fn set_api_key(&self, params: &SetApiKey) -> Result<String, ApiError> {
        self.send_unit(
            self.request(reqwest::Method::POST, "api/v1/llm-providers/set-api-key")
                .json(params),
        )
        .await
    }

    pub async fn add_llm(&self, params: &AddLlm) -> Result<String, ApiError> {
        self.send_unit(
            self.request(reqwest::Method::POST, "api/v1/llm-providers/add-llm")
                .json(&params.to_body()),
        )
        .await
    }

    pub async fn delete_llm(&self, llm_factory: &str, llm_name: &str) -> Result<String, ApiError> {
        let body = serde_json::json!({ "llm_factory": llm_factory, "llm_name": llm_name });
        self.send_unit(
            self.request(reqwest::Method::POST, "api/v1/llm-providers/delete-llm")
                .json(&body),
        )
        .await
    }

    pub async fn delete_factory(&self, llm_factory: &str) -> Result<String, ApiError> {
        let body = serde_json::json!({ "llm_factory": llm_factory });
        self.send_unit(
            self.request(reqwest::Method::POST, "api/v1/llm-providers/delete-factory")
                .json(&body),
        )
        .await
    }

    /// Models grouped by factory, with availability. `model_type` filters (e.g. "chat").
    pub async fn list_llms(
        &self,
        model_type: Option<&str>,
    ) -> Result<BTreeMap<String, Vec<LlmItem>>, ApiError> {
        let query: Vec<(&str, String)> = model_type
            .filter(|t| !t.is_empty())
            .map(|t| vec![("model_type", t.to_string())])
            .unwrap_or_default();
        self.get("api/v1/llm-providers/list", &query).await
    }
}
