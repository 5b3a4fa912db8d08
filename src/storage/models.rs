use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// 生成时附带的参数模板
pub type ParamTemplate = BTreeMap<String, String>;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, AsRefStr, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LinkStatus {
    #[default]
    Active,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortLink {
    pub code: String,
    pub original_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param_template: Option<ParamTemplate>,
    pub created_at: DateTime<Utc>,
    pub expire_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: LinkStatus,
}

impl ShortLink {
    pub fn new(
        code: impl Into<String>,
        original_url: impl Into<String>,
        param_template: Option<ParamTemplate>,
        expire_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            code: code.into(),
            original_url: original_url.into(),
            // 空模板与无模板等价
            param_template: param_template.filter(|p| !p.is_empty()),
            created_at: Utc::now(),
            expire_at,
            status: LinkStatus::Active,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.is_some_and(|exp| exp <= now)
    }

    /// 未禁用且未超过 `expire_at` 即为有效
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == LinkStatus::Active && !self.is_expired_at(now)
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }
}

/// 重定向时记录的一次访问
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub code: String,
    pub client_ip: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub referer: String,
    pub timestamp: DateTime<Utc>,
}

impl AccessEvent {
    pub fn new(
        code: impl Into<String>,
        client_ip: impl Into<String>,
        user_agent: impl Into<String>,
        referer: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            client_ip: client_ip.into(),
            user_agent: user_agent.into(),
            referer: referer.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::str::FromStr;

    #[test]
    fn test_new_link_is_active() {
        let link = ShortLink::new("ABCD", "https://example.com", None, None);
        assert_eq!(link.status, LinkStatus::Active);
        assert!(link.is_active());
    }

    #[test]
    fn test_empty_template_is_dropped() {
        let link = ShortLink::new("ABCD", "https://example.com", Some(ParamTemplate::new()), None);
        assert!(link.param_template.is_none());
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let link = ShortLink::new(
            "ABCD",
            "https://example.com",
            None,
            Some(now - Duration::seconds(1)),
        );
        assert!(link.is_expired_at(now));
        assert!(!link.is_active_at(now));

        let future = ShortLink::new("ABCE", "https://example.com", None, Some(now + Duration::hours(1)));
        assert!(future.is_active_at(now));
    }

    #[test]
    fn test_disabled_is_inactive() {
        let mut link = ShortLink::new("ABCD", "https://example.com", None, None);
        link.status = LinkStatus::Disabled;
        assert!(!link.is_active());
    }

    #[test]
    fn test_status_string_form() {
        assert_eq!(LinkStatus::Active.as_ref(), "active");
        assert_eq!(LinkStatus::from_str("disabled").unwrap(), LinkStatus::Disabled);
        assert!(LinkStatus::from_str("archived").is_err());
    }
}
