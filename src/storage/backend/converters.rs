use std::str::FromStr;

use sea_orm::ActiveValue::{NotSet, Set};
use tracing::warn;

use crate::errors::Result;
use crate::storage::{AccessEvent, LinkStatus, ParamTemplate, ShortLink};
use migration::entities::{access_log, short_link};

/// 将 Sea-ORM Model 转换为 ShortLink
pub fn model_to_shortlink(model: short_link::Model) -> ShortLink {
    let param_template = model.params.as_deref().and_then(|raw| {
        match serde_json::from_str::<ParamTemplate>(raw) {
            Ok(params) if !params.is_empty() => Some(params),
            Ok(_) => None,
            Err(e) => {
                warn!("Ignoring malformed params on '{}': {}", model.short_code, e);
                None
            }
        }
    });

    // 未知状态按禁用处理
    let status = LinkStatus::from_str(&model.status).unwrap_or_else(|_| {
        warn!("Unknown status '{}' on '{}'", model.status, model.short_code);
        LinkStatus::Disabled
    });

    ShortLink {
        code: model.short_code,
        original_url: model.original_url,
        param_template,
        created_at: model.created_at,
        expire_at: model.expire_at,
        status,
    }
}

/// 将 ShortLink 转换为 ActiveModel（仅用于插入）
pub fn shortlink_to_active_model(link: &ShortLink) -> Result<short_link::ActiveModel> {
    let params = link
        .param_template
        .as_ref()
        .filter(|p| !p.is_empty())
        .map(serde_json::to_string)
        .transpose()?;

    Ok(short_link::ActiveModel {
        short_code: Set(link.code.clone()),
        original_url: Set(link.original_url.clone()),
        params: Set(params),
        created_at: Set(link.created_at),
        expire_at: Set(link.expire_at),
        status: Set(link.status.as_ref().to_string()),
    })
}

pub fn model_to_access_event(model: access_log::Model) -> AccessEvent {
    AccessEvent {
        code: model.short_code,
        client_ip: model.client_ip,
        user_agent: model.user_agent.unwrap_or_default(),
        referer: model.referer.unwrap_or_default(),
        timestamp: model.access_time,
    }
}

pub fn access_event_to_active_model(event: &AccessEvent) -> access_log::ActiveModel {
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

    access_log::ActiveModel {
        id: NotSet,
        short_code: Set(event.code.clone()),
        client_ip: Set(event.client_ip.clone()),
        user_agent: Set(non_empty(&event.user_agent)),
        referer: Set(non_empty(&event.referer)),
        access_time: Set(event.timestamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use sea_orm::ActiveValue;

    fn model(params: Option<&str>, status: &str) -> short_link::Model {
        short_link::Model {
            short_code: "ABCD".to_string(),
            original_url: "https://example.com".to_string(),
            params: params.map(str::to_string),
            created_at: Utc::now(),
            expire_at: Some(Utc::now() + Duration::days(1)),
            status: status.to_string(),
        }
    }

    #[test]
    fn test_model_to_shortlink_with_params() {
        let link = model_to_shortlink(model(Some(r#"{"utm":"mail","a":"1"}"#), "active"));
        let params = link.param_template.unwrap();
        assert_eq!(params.get("utm").map(String::as_str), Some("mail"));
        assert_eq!(params.len(), 2);
        assert_eq!(link.status, LinkStatus::Active);
    }

    #[test]
    fn test_model_to_shortlink_malformed_params() {
        let link = model_to_shortlink(model(Some("not json"), "active"));
        assert!(link.param_template.is_none());
    }

    #[test]
    fn test_unknown_status_is_disabled() {
        let link = model_to_shortlink(model(None, "archived"));
        assert_eq!(link.status, LinkStatus::Disabled);
    }

    #[test]
    fn test_shortlink_to_active_model() {
        let mut params = ParamTemplate::new();
        params.insert("ref".to_string(), "x".to_string());
        let link = ShortLink::new("ABCD", "https://example.com", Some(params), None);

        let am = shortlink_to_active_model(&link).unwrap();
        assert_eq!(am.short_code, ActiveValue::Set("ABCD".to_string()));
        assert_eq!(am.params, ActiveValue::Set(Some(r#"{"ref":"x"}"#.to_string())));
        assert_eq!(am.status, ActiveValue::Set("active".to_string()));
    }

    #[test]
    fn test_access_event_empty_fields_become_null() {
        let event = AccessEvent::new("ABCD", "1.2.3.4", "", "");
        let am = access_event_to_active_model(&event);
        assert_eq!(am.user_agent, ActiveValue::Set(None));
        assert_eq!(am.referer, ActiveValue::Set(None));
        assert_eq!(am.id, ActiveValue::NotSet);
    }
}
