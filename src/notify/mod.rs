// src/notify/mod.rs
pub mod feishu;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use zhconv::Variant;

use crate::item::Item;

pub use feishu::WebhookTransport;

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Outbound channel. `Err` means the request did not complete (connect
/// failure, timeout); any completed exchange is `Ok` whatever its status.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, endpoint: &str, body: &[u8]) -> Result<TransportResponse>;
}

/// Feishu custom-bot text message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeishuMessage {
    pub timestamp: String,
    pub sign: String,
    pub msg_type: String,
    pub content: TextContent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextContent {
    pub text: String,
}

impl FeishuMessage {
    pub fn text(timestamp: String, sign: String, item: &Item) -> Self {
        Self {
            timestamp,
            sign,
            msg_type: "text".to_string(),
            content: TextContent {
                text: render_text(item),
            },
        }
    }
}

/// Message body. Origin, title and content go out in Simplified Chinese
/// (Bybit zh-TW and KuCoin zh-hant feeds are Traditional); the item itself,
/// and so its dedup key, keeps the raw text.
pub fn render_text(item: &Item) -> String {
    format!(
        "来自: {}\n标题: {}\n发布时间: {}\n内容: {}",
        to_simplified(&item.origin),
        to_simplified(&item.title),
        item.published_at,
        to_simplified(&item.content)
    )
}

fn to_simplified(s: &str) -> String {
    zhconv::zhconv(s, Variant::ZhHans)
}

/// Feishu answers 200 even when it rejects a message and puts the reason in
/// `{"code": .., "msg": ..}`. Returns that pair when `code` is non-zero.
pub fn rejection_in_body(body: &str) -> Option<(i64, String)> {
    #[derive(Deserialize)]
    struct Ack {
        code: Option<i64>,
        #[serde(alias = "StatusCode")]
        status_code: Option<i64>,
        msg: Option<String>,
    }
    let ack: Ack = serde_json::from_str(body).ok()?;
    let code = ack.code.or(ack.status_code)?;
    (code != 0).then(|| (code, ack.msg.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_shape_matches_bot_api() {
        let item = Item::new("OKX_maintenance", "Sys upgrade", "2024-07-20", "details");
        let msg = FeishuMessage::text("1721800000".into(), "c2lnbg==".into(), &item);
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "timestamp": "1721800000",
                "sign": "c2lnbg==",
                "msg_type": "text",
                "content": {
                    "text": "来自: OKX_maintenance\n标题: Sys upgrade\n发布时间: 2024-07-20\n内容: details"
                }
            })
        );
    }

    #[test]
    fn traditional_text_is_rendered_simplified() {
        let item = Item::new("Bybit_維護和升級", "系統升級公告", "2024-07-20", "幣安");
        assert_eq!(
            render_text(&item),
            "来自: Bybit_维护和升级\n标题: 系统升级公告\n发布时间: 2024-07-20\n内容: 币安"
        );
        // Raw fields are untouched.
        assert_eq!(item.title, "系統升級公告");
    }

    #[test]
    fn only_exact_200_is_success() {
        for (status, ok) in [(200, true), (201, false), (204, false), (500, false)] {
            let r = TransportResponse { status, body: String::new() };
            assert_eq!(r.is_success(), ok);
        }
    }

    #[test]
    fn rejection_codes_are_surfaced() {
        assert_eq!(
            rejection_in_body(r#"{"code":19021,"msg":"sign match fail or timestamp is not within one hour from current time"}"#)
                .map(|(c, _)| c),
            Some(19021)
        );
        assert_eq!(rejection_in_body(r#"{"StatusCode":0,"StatusMessage":"success"}"#), None);
        assert_eq!(rejection_in_body(r#"{"code":0,"msg":"success"}"#), None);
        assert_eq!(rejection_in_body("ok"), None);
    }
}
