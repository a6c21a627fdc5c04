//! Ollama-backed extraction client.
//!
//! Uses the `/api/generate` endpoint with `"format": "json"` and temperature
//! 0, one request per chain step. The model reply is parsed with
//! [`parse_oracle_output`], which tolerates fenced or prose-wrapped JSON.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::OracleError;
use crate::normalize::parse_oracle_output;

use super::{Extractor, OracleResult};

const ORACLE: &str = "ollama";

const EXTRACT_SYSTEM: &str = r#"你是医学知识图谱的构建助手。从用户给出的医学文本中识别与医疗相关的实体（疾病、药物、症状、治疗方法、检查项目、器官、激素、生理指标等），不要提取过于宽泛的实体。
只输出一个紧凑的JSON对象，不要任何解释。格式：
{"knowledge": "<原文>", "entities": [{"entity": "<名称>", "type": "<类别>", "description": "<简短描述>"}]}
示例输入：胰岛素是调节血糖水平的重要激素，胰腺是其主要分泌腺体。
示例输出：{"knowledge": "胰岛素是调节血糖水平的重要激素，胰腺是其主要分泌腺体。", "entities": [{"entity": "胰岛素", "type": "激素", "description": "调节血糖水平的激素"}, {"entity": "血糖水平", "type": "生理指标", "description": "血液中的葡萄糖含量"}, {"entity": "胰腺", "type": "器官", "description": "分泌胰岛素的腺体"}]}"#;

const SUMMARIZE_SYSTEM: &str = r#"你是医学知识图谱的构建助手。用户给出一个包含 knowledge 与 entities 的JSON对象。根据 knowledge 的内容，找出 entities 之间的关系，关系两端只能使用已给出的实体。
关系类型例如：导致症状、伴随症状、治疗方法、检查方法、药物治疗、药物副作用、病因、并发症、预防措施、相关疾病、临床表现、风险因素。
只输出一个紧凑的JSON对象，保留原有的 knowledge 和 entities，并增加 relation 列表：
{"knowledge": "...", "entities": [...], "relation": [{"entity1": "<实体>", "relation": "<关系>", "entity2": "<实体或实体列表>"}]}"#;

const REPAIR_SYSTEM: &str = r#"用户给出一个结构不完整的医学知识JSON对象。请补全并修正它，使其满足以下结构，不要改变已有内容的含义：
{"knowledge": "<字符串>", "entities": [{"entity": "<字符串>", "type": "<字符串>", "description": "<字符串>"}], "relation": [{"entity1": "<字符串或列表>", "relation": "<字符串>", "entity2": "<字符串或列表>"}]}
只输出修正后的紧凑JSON对象，不要任何解释。"#;

/// Configuration for the Ollama client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Base URL for the Ollama API.
    pub base_url: String,
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    pub temperature: f32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "qwen2.5".into(),
            timeout_secs: 120,
            temperature: 0.0,
        }
    }
}

/// Extraction oracle backed by an Ollama server.
pub struct OllamaExtractor {
    config: OllamaConfig,
    agent: ureq::Agent,
}

impl OllamaExtractor {
    pub fn new(config: OllamaConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self { config, agent }
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Generate a completion and return the raw `response` text.
    fn generate(&self, system: &str, prompt: &str) -> OracleResult<String> {
        let url = format!("{}/api/generate", self.config.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.config.model,
            "system": system,
            "prompt": prompt,
            "format": "json",
            "stream": false,
            "options": { "temperature": self.config.temperature },
        });

        let resp = self
            .agent
            .post(&url)
            .send_json(body)
            .map_err(|e| OracleError::RequestFailed {
                oracle: ORACLE.into(),
                message: e.to_string(),
            })?;

        let json: Value = resp.into_json().map_err(|e| OracleError::Malformed {
            oracle: ORACLE.into(),
            message: e.to_string(),
        })?;

        json["response"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| OracleError::Malformed {
                oracle: ORACLE.into(),
                message: "missing 'response' field".into(),
            })
    }

    /// Generate and parse a JSON object reply.
    fn generate_object(&self, system: &str, prompt: &str) -> OracleResult<Value> {
        let text = self.generate(system, prompt)?;
        match parse_oracle_output(&text) {
            Some(value) if value.as_object().is_some_and(|o| !o.is_empty()) => Ok(value),
            Some(_) => Err(OracleError::Malformed {
                oracle: ORACLE.into(),
                message: "empty JSON object".into(),
            }),
            None => Err(OracleError::Malformed {
                oracle: ORACLE.into(),
                message: format!("no JSON object in reply: {}", truncate(&text, 200)),
            }),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

impl Extractor for OllamaExtractor {
    fn extract(&self, text: &str) -> OracleResult<Value> {
        self.generate_object(EXTRACT_SYSTEM, text)
    }

    fn summarize(&self, entities: &Value) -> OracleResult<Value> {
        self.generate_object(SUMMARIZE_SYSTEM, &entities.to_string())
    }

    fn repair(&self, record: &Value) -> OracleResult<Value> {
        self.generate_object(REPAIR_SYSTEM, &record.to_string())
    }
}
