use std::collections::HashMap;
use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LLMError;

/// 模型配置 描述一个可调用后端
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// 自定义句柄 例如 `default-openai`
    pub handle: String,
    pub provider: ProviderKind,
    pub credential: Credential,
    pub default_model: Option<String>,
    pub base_url: Option<String>,
    /// 附加设置 例如 service_tier 或 safetySettings
    #[serde(default)]
    pub extra: HashMap<String, Value>,
    /// 针对特定网关 (Azure / 自建代理) 的请求补丁
    #[serde(default)]
    pub patch: Option<RequestPatch>,
}

/// 供应商类型
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAiChat,
    OpenAiResponses,
    AnthropicMessages,
    GoogleGemini,
    /// xAI Grok, accessed through the OpenAI Chat Completions wire format.
    Grok,
    /// Any OpenAI-compatible gateway (OpenRouter, Together, Groq, self-hosted proxies...).
    OpenAiCompatible {
        /// Short identifier used for logging/metrics, e.g. `openrouter`.
        flavor: String,
    },
    /// Azure OpenAI, which reuses the Chat Completions schema behind a templated URL.
    AzureOpenAi {
        deployment: String,
    },
}

/// 鉴权信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// 简单 API Key
    ApiKey {
        /// header 名称 留空时按 provider 默认
        header: Option<String>,
        /// 密钥
        key: String,
    },
    /// Bearer Token
    Bearer { token: String },
    /// Google/GCP Service Account JSON
    ServiceAccount { json: Value },
    /// 无需鉴权的本地 provider
    None,
}

/// Authentication style used when talking to an OpenAI-compatible gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <token>`
    Bearer,
    /// A custom header carrying the raw key, e.g. `api-key` for Azure.
    ApiKeyHeader { name: String },
}

/// Per-request patch applied after the adapter builds its URL/headers/body.
///
/// This is how vendor-shape differences that don't warrant a whole new adapter (Azure's
/// `api-version` query parameter and `api-key` header, a proxy rewriting the path, a gateway
/// that wants extra fields merged into the body) get expressed without forking the codec.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequestPatch {
    /// Replaces the computed URL outright when set.
    pub url_override: Option<String>,
    /// Headers merged in after the adapter's own headers; patch wins on conflict.
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    /// JSON value recursively merged into the request body; patch wins on conflict.
    pub body_merge: Option<Value>,
}

impl RequestPatch {
    /// Applies this patch to an in-flight request's URL, headers and JSON body.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use kotoba_llm::config::RequestPatch;
    /// use serde_json::json;
    ///
    /// let patch = RequestPatch {
    ///     url_override: Some("https://proxy.local/v1/chat".to_string()),
    ///     extra_headers: HashMap::from([("api-key".to_string(), "secret".to_string())]),
    ///     body_merge: Some(json!({"stream_options": {"include_usage": true}})),
    /// };
    ///
    /// let mut url = "https://api.openai.com/v1/chat/completions".to_string();
    /// let mut headers = HashMap::new();
    /// let mut body = json!({"model": "gpt-4.1"});
    /// patch.apply(&mut url, &mut headers, &mut body);
    ///
    /// assert_eq!(url, "https://proxy.local/v1/chat");
    /// assert_eq!(headers.get("api-key"), Some(&"secret".to_string()));
    /// assert_eq!(body["stream_options"]["include_usage"], json!(true));
    /// ```
    pub fn apply(&self, url: &mut String, headers: &mut HashMap<String, String>, body: &mut Value) {
        if let Some(override_url) = &self.url_override {
            *url = override_url.clone();
        }
        for (key, value) in &self.extra_headers {
            headers.insert(key.clone(), value.clone());
        }
        if let Some(merge) = &self.body_merge {
            merge_json(body, merge);
        }
    }
}

fn merge_json(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                merge_json(base_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value.clone();
        }
    }
}

/// In-memory override store, checked before environment variables or the credentials file.
///
/// Callers populate this explicitly (e.g. from a secrets manager they already trust) when they
/// want to bypass the filesystem/env lookup entirely for a given handle.
#[derive(Debug, Default)]
pub struct ConfigStore {
    overrides: Mutex<HashMap<String, Credential>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an in-memory credential override for `handle`.
    pub fn set(&self, handle: impl Into<String>, credential: Credential) {
        self.overrides
            .lock()
            .expect("ConfigStore mutex poisoned")
            .insert(handle.into(), credential);
    }

    fn get(&self, handle: &str) -> Option<Credential> {
        self.overrides
            .lock()
            .expect("ConfigStore mutex poisoned")
            .get(handle)
            .cloned()
    }
}

/// Name of the environment variable holding the credentials file path override.
const CREDENTIALS_PATH_ENV: &str = "KOTOBA_CREDENTIALS_FILE";

static ENV_CACHE: OnceLock<Mutex<HashMap<String, Option<String>>>> = OnceLock::new();

fn cached_env_var(name: &str) -> Option<String> {
    let cache = ENV_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = cache.lock().expect("env cache mutex poisoned");
    if let Some(value) = guard.get(name) {
        return value.clone();
    }
    let value = env::var(name).ok();
    guard.insert(name.to_string(), value.clone());
    value
}

/// Resolves a credential for `handle`, trying each layer of the resolver chain in order:
/// 1. an explicit `override_credential` passed by the caller for this single call
/// 2. the in-memory [`ConfigStore`]
/// 3. an environment variable named `env_var`
/// 4. a `KEY=VALUE` credentials file (see [`load_credentials_file`])
/// 5. [`Credential::None`]
///
/// # Examples
///
/// ```
/// use kotoba_llm::config::{resolve_credential, ConfigStore, Credential};
///
/// let store = ConfigStore::new();
/// let resolved = resolve_credential(None, &store, "OPENAI_API_KEY", "openai", None);
/// assert!(matches!(resolved, Credential::None) || matches!(resolved, Credential::ApiKey { .. }) || matches!(resolved, Credential::Bearer { .. }));
/// ```
pub fn resolve_credential(
    override_credential: Option<Credential>,
    store: &ConfigStore,
    env_var: &str,
    handle: &str,
    profile: Option<&str>,
) -> Credential {
    if let Some(credential) = override_credential {
        return credential;
    }
    if let Some(credential) = store.get(handle) {
        return credential;
    }
    if let Some(key) = cached_env_var(env_var) {
        return Credential::Bearer { token: key };
    }
    if let Some(key) = load_credentials_file(handle, profile) {
        return Credential::Bearer { token: key };
    }
    Credential::None
}

/// Default location for the credentials file: `$XDG_CONFIG_HOME/kotoba/credentials`, falling
/// back to `$HOME/.config/kotoba/credentials` when `XDG_CONFIG_HOME` is unset.
fn credentials_file_path() -> Option<String> {
    if let Some(path) = cached_env_var(CREDENTIALS_PATH_ENV) {
        return Some(path);
    }
    if let Some(xdg) = cached_env_var("XDG_CONFIG_HOME") {
        return Some(format!("{xdg}/kotoba/credentials"));
    }
    let home = cached_env_var("HOME")?;
    Some(format!("{home}/.config/kotoba/credentials"))
}

/// Parses a `KEY=VALUE` credentials file with optional `[profile]` sections.
///
/// Lines starting with `#` are comments. A section header `[handle-or-profile]` scopes the
/// `KEY=VALUE` pairs that follow it until the next section. Looks up `profile` first (if given),
/// then `handle`, then an unscoped (pre-section) entry.
fn load_credentials_file(handle: &str, profile: Option<&str>) -> Option<String> {
    let path = credentials_file_path()?;
    let contents = fs::read_to_string(path).ok()?;

    let mut current_section = String::new();
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            current_section = line[1..line.len() - 1].to_string();
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            sections
                .entry(current_section.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    let candidates = [profile, Some(handle), Some("")];
    for candidate in candidates.into_iter().flatten() {
        if let Some(section) = sections.get(candidate) {
            if let Some(key) = section.get("key").or_else(|| section.get("token")) {
                return Some(key.clone());
            }
        }
    }
    None
}

/// Extracts a bearer/API key string from a [`Credential`], for adapters that only understand a
/// single secret string (everything except `ServiceAccount`).
pub(crate) fn credential_to_secret(credential: &Credential) -> Result<String, LLMError> {
    match credential {
        Credential::ApiKey { key, .. } => Ok(key.clone()),
        Credential::Bearer { token } => Ok(token.clone()),
        Credential::ServiceAccount { .. } => Err(LLMError::Auth {
            message: "service account credentials require a provider-specific adapter".to_string(),
        }),
        Credential::None => Err(LLMError::Auth {
            message: "no credential configured".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_patch_merges_body_and_overrides_url() {
        let patch = RequestPatch {
            url_override: Some("https://proxy.local/chat".to_string()),
            extra_headers: HashMap::from([("x-proxy".to_string(), "1".to_string())]),
            body_merge: Some(serde_json::json!({"model": "patched"})),
        };
        let mut url = "https://api.openai.com/v1/chat/completions".to_string();
        let mut headers = HashMap::new();
        let mut body = serde_json::json!({"model": "gpt-4.1", "messages": []});
        patch.apply(&mut url, &mut headers, &mut body);

        assert_eq!(url, "https://proxy.local/chat");
        assert_eq!(headers.get("x-proxy"), Some(&"1".to_string()));
        assert_eq!(body["model"], serde_json::json!("patched"));
        assert_eq!(body["messages"], serde_json::json!([]));
    }

    #[test]
    fn config_store_override_wins_before_env_and_file() {
        let store = ConfigStore::new();
        store.set("my-handle", Credential::Bearer { token: "from-store".to_string() });
        let resolved = resolve_credential(None, &store, "KOTOBA_TEST_UNSET_VAR_XYZ", "my-handle", None);
        match resolved {
            Credential::Bearer { token } => assert_eq!(token, "from-store"),
            other => panic!("expected Bearer credential, got {other:?}"),
        }
    }

    #[test]
    fn explicit_override_wins_over_everything() {
        let store = ConfigStore::new();
        store.set("my-handle", Credential::Bearer { token: "from-store".to_string() });
        let explicit = Credential::ApiKey {
            header: None,
            key: "explicit".to_string(),
        };
        let resolved = resolve_credential(Some(explicit), &store, "UNSET", "my-handle", None);
        match resolved {
            Credential::ApiKey { key, .. } => assert_eq!(key, "explicit"),
            other => panic!("expected ApiKey credential, got {other:?}"),
        }
    }
}
