//! 缓存逻辑键布局
//!
//! 各后端在此基础上追加自己的命名空间前缀。

use crate::storage::ParamTemplate;

/// 请求组合键：无模板时为原始 URL，否则为 `url:{json}`，
/// 模板按键排序序列化，相同模板总得到相同的键
pub fn composite_key(url: &str, params: Option<&ParamTemplate>) -> String {
    match params.filter(|p| !p.is_empty()) {
        Some(p) => match serde_json::to_string(p) {
            Ok(json) => format!("{}:{}", url, json),
            // BTreeMap<String, String> 序列化不会失败
            Err(_) => url.to_string(),
        },
        None => url.to_string(),
    }
}

/// 组合键 -> 短码
pub fn url_key(composite: &str) -> String {
    format!("url:{}", composite)
}

/// 短码 -> 原始 URL
pub fn link_key(code: &str) -> String {
    format!("link:{}", code)
}

pub fn pv_key(code: &str) -> String {
    format!("pv:{}", code)
}

pub fn uv_key(code: &str, day: &str) -> String {
    format!("uv:{}:{}", code, day)
}

pub fn uv_prefix(code: &str) -> String {
    format!("uv:{}:", code)
}

pub fn source_key(code: &str, source: &str, day: &str) -> String {
    format!("source:{}:{}:{}", code, source, day)
}

pub fn source_prefix(code: &str) -> String {
    format!("source:{}:", code)
}

/// 从 `code` 的按天来源键中取出来源标签
pub fn source_label_from_key<'a>(code: &str, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix("source:")?.strip_prefix(code)?.strip_prefix(':')?;
    let (label, _day) = rest.rsplit_once(':')?;
    (!label.is_empty()).then_some(label)
}
