//! URL 验证与查询参数合并

use std::collections::BTreeMap;

use url::Url;

use crate::errors::{OctolinkError, Result};

/// 允许的最长跳转目标
pub const MAX_URL_LENGTH: usize = 2048;

/// 危险协议列表
const DANGEROUS_PROTOCOLS: &[&str] = &[
    "javascript:",
    "data:",
    "file:",
    "vbscript:",
    "about:",
    "blob:",
];

/// 验证 URL 安全性
///
/// 检查项目：
/// 1. URL 不为空且不超过长度上限
/// 2. 不是危险协议（javascript:, data:, file: 等）
/// 3. 必须是 http:// 或 https://
/// 4. URL 格式有效
pub fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();

    if url.is_empty() {
        return Err(OctolinkError::invalid_input("URL cannot be empty"));
    }
    if url.len() > MAX_URL_LENGTH {
        return Err(OctolinkError::invalid_input(format!(
            "URL exceeds {} characters",
            MAX_URL_LENGTH
        )));
    }

    let url_lower = url.to_lowercase();

    for proto in DANGEROUS_PROTOCOLS {
        if url_lower.starts_with(proto) {
            return Err(OctolinkError::invalid_input(format!(
                "Dangerous protocol blocked: {}",
                proto
            )));
        }
    }

    if !url_lower.starts_with("http://") && !url_lower.starts_with("https://") {
        return Err(OctolinkError::invalid_input(
            "URL must start with http:// or https://",
        ));
    }

    Url::parse(url)
        .map_err(|e| OctolinkError::invalid_input(format!("Invalid URL format: {}", e)))?;

    Ok(())
}

/// 将 `params` 合并到 `original` 的查询串
///
/// 传入的键替换该键的全部原值，其他键按原顺序保留全部取值，
/// 输出按键排序。无法解析的 URL 原样返回。
/// URL 其余部分逐字节保留，不会引入多余的斜杠。
pub fn merge_query(original: &str, params: &BTreeMap<String, String>) -> String {
    if params.is_empty() || Url::parse(original).is_err() {
        return original.to_string();
    }

    let (without_fragment, fragment) = match original.split_once('#') {
        Some((head, frag)) => (head, Some(frag)),
        None => (original, None),
    };
    let (base, query) = match without_fragment.split_once('?') {
        Some((base, query)) => (base, query),
        None => (without_fragment, ""),
    };

    // 重复的键保留全部取值
    let mut merged: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()).into_owned() {
        merged.entry(key).or_default().push(value);
    }
    for (key, value) in params {
        merged.insert(key.clone(), vec![value.clone()]);
    }

    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(
            merged
                .iter()
                .flat_map(|(key, values)| values.iter().map(move |v| (key, v))),
        )
        .finish();

    let mut out = String::with_capacity(original.len() + query.len() + 1);
    out.push_str(base);
    if !query.is_empty() {
        out.push('?');
        out.push_str(&query);
    }
    if let Some(frag) = fragment {
        out.push('#');
        out.push_str(frag);
    }
    out
}
