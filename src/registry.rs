//! 模型解析与提供方注册表
//!
//! `ModelRegistry` 在 [`crate::client::LLMClient`] 的显式 handle 注册之上，增加了一层
//! 宽松的模型名解析:调用方可以传入供应商原生的模型名(如 `"gpt-4o"`)而不必先知道
//! 它属于哪个 handle,注册表会尝试用别名规则把它归类到某个 [`ModelId`] 变体。

use std::collections::HashMap;

use crate::error::LLMError;
use crate::provider::DynProvider;
use crate::types::CapabilityDescriptor;

/// 跨供应商的模型标识,每个变体携带该供应商自己的模型名字符串。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelId {
    OpenAiChat(String),
    OpenAiResponses(String),
    AnthropicMessages(String),
    GoogleGemini(String),
    Grok(String),
    OpenAiCompatible { flavor: String, model: String },
    AzureOpenAi { deployment: String },
    OpenRouter(String),
    Together(String),
    Replicate(String),
    Custom { provider: String, model: String },
}

impl ModelId {
    /// 该模型标识面向调用方时最自然的展示名。
    pub fn display_name(&self) -> String {
        match self {
            ModelId::OpenAiChat(m) => m.clone(),
            ModelId::OpenAiResponses(m) => m.clone(),
            ModelId::AnthropicMessages(m) => m.clone(),
            ModelId::GoogleGemini(m) => m.clone(),
            ModelId::Grok(m) => m.clone(),
            ModelId::OpenAiCompatible { model, .. } => model.clone(),
            ModelId::AzureOpenAi { deployment } => deployment.clone(),
            ModelId::OpenRouter(m) => m.clone(),
            ModelId::Together(m) => m.clone(),
            ModelId::Replicate(m) => m.clone(),
            ModelId::Custom { model, .. } => model.clone(),
        }
    }
}

struct RegisteredModel {
    model_id: ModelId,
    capabilities: CapabilityDescriptor,
}

/// 一条别名规则:当模型名包含(或以其开头)`pattern` 时,映射到对应的 [`ModelId`]。
///
/// 这是一张宽松的前缀/子串表,不是穷举映射——新模型上线的速度远快于本 crate 发版,
/// 未命中任何规则时解析会退化为 [`ModelId::Custom`] 而不是报错。
struct AliasRule {
    pattern: &'static str,
    build: fn(&str) -> ModelId,
}

fn default_aliases() -> Vec<AliasRule> {
    vec![
        AliasRule {
            pattern: "claude",
            build: |name| ModelId::AnthropicMessages(name.to_string()),
        },
        AliasRule {
            pattern: "gemini",
            build: |name| ModelId::GoogleGemini(name.to_string()),
        },
        AliasRule {
            pattern: "grok",
            build: |name| ModelId::Grok(name.to_string()),
        },
        AliasRule {
            pattern: "gpt-",
            build: |name| ModelId::OpenAiChat(name.to_string()),
        },
        AliasRule {
            pattern: "o1",
            build: |name| ModelId::OpenAiChat(name.to_string()),
        },
        AliasRule {
            pattern: "o3",
            build: |name| ModelId::OpenAiChat(name.to_string()),
        },
    ]
}

/// 显式 handle 注册 + 别名解析的模型注册表。
///
/// `LLMClient` 保留自己的 `HashMap<String, DynProvider>` 不变,作为底层的注册机制;
/// `ModelRegistry` 是更上层的门面,能把一个宽松的模型名解析成 handle 与能力描述,
/// 再委托给 `LLMClient` 或自己持有的 provider 表完成调用。
pub struct ModelRegistry {
    models: HashMap<String, RegisteredModel>,
    providers: HashMap<String, DynProvider>,
    aliases: Vec<AliasRule>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    /// 构建一个带默认别名表的空注册表。
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
            providers: HashMap::new(),
            aliases: default_aliases(),
        }
    }

    /// 在给定 handle 下显式注册一个模型及其能力描述。
    ///
    /// # Errors
    ///
    /// 若 handle 已被注册过,返回 [`LLMError::InvalidConfig`]。
    pub fn register(
        &mut self,
        handle: impl Into<String>,
        model_id: ModelId,
        capabilities: CapabilityDescriptor,
    ) -> Result<(), LLMError> {
        let handle = handle.into();
        if self.models.contains_key(&handle) {
            return Err(LLMError::InvalidConfig {
                field: "handle",
                reason: format!("handle '{handle}' is already registered"),
            });
        }
        self.models.insert(
            handle,
            RegisteredModel {
                model_id,
                capabilities,
            },
        );
        Ok(())
    }

    /// 将某个 handle 与实际可调用的 provider 关联起来,供 [`Self::provider_for`] 使用。
    pub fn register_provider(&mut self, handle: impl Into<String>, provider: DynProvider) {
        self.providers.insert(handle.into(), provider);
    }

    /// 解析一个名字:优先当作显式 handle,其次按别名规则归类,最后退化为 `Custom`。
    ///
    /// 未命中任何规则不是错误——只会记一条 debug 日志,因为新模型上线速度快于本 crate
    /// 的发布节奏,宽松解析比严格报错更实用。
    pub fn resolve(&self, name_or_handle: &str) -> Result<ModelId, LLMError> {
        if let Some(registered) = self.models.get(name_or_handle) {
            return Ok(registered.model_id.clone());
        }

        let lowered = name_or_handle.to_ascii_lowercase();
        for rule in &self.aliases {
            if lowered.contains(rule.pattern) {
                return Ok((rule.build)(name_or_handle));
            }
        }

        tracing::debug!(
            model = name_or_handle,
            "no explicit registration or alias match, falling back to ModelId::Custom"
        );
        Ok(ModelId::Custom {
            provider: "unknown".to_string(),
            model: name_or_handle.to_string(),
        })
    }

    /// 返回某个已注册 handle 的能力描述。
    pub fn capabilities_for(&self, handle: &str) -> Option<CapabilityDescriptor> {
        self.models.get(handle).map(|m| m.capabilities.clone())
    }

    /// 返回某个 handle 关联的 provider 句柄(若已通过 [`Self::register_provider`] 绑定)。
    pub fn provider_for(&self, handle: &str) -> Option<DynProvider> {
        self.providers.get(handle).cloned()
    }

    /// 列出所有显式注册的 handle。
    pub fn handles(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }
}
