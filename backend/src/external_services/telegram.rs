use std::fmt::{Display, Formatter};
use std::sync::{PoisonError, RwLock};

use chrono_tz::Tz;
use rust_decimal::Decimal;
use sepay_shared::Transaction;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::error::SinkError;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum ChatId {
    Id(i64),
    Username(String),
}

impl ChatId {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();

        match value.parse::<i64>() {
            Ok(id) => ChatId::Id(id),
            Err(_) => ChatId::Username(value.to_string()),
        }
    }
}

impl Display for ChatId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatId::Id(id) => write!(f, "{id}"),
            ChatId::Username(name) => f.write_str(name),
        }
    }
}

/**
The chat that receives transaction alerts. The last registration wins.
 */
#[derive(Debug, Default)]
pub struct NotificationTarget {
    chat: RwLock<Option<ChatId>>,
}

impl NotificationTarget {
    pub fn new(initial: Option<ChatId>) -> Self {
        Self {
            chat: RwLock::new(initial),
        }
    }

    pub fn get(&self) -> Option<ChatId> {
        self.chat
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, chat: ChatId) {
        info!(chat_id = %chat, "notification target registered");

        *self.chat.write().unwrap_or_else(PoisonError::into_inner) = Some(chat);
    }
}

#[derive(Debug, Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

impl TelegramClient {
    pub fn new(client: reqwest::Client, api_url: &str, token: &str) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub async fn send_message(&self, chat: &ChatId, text: &str) -> Result<(), SinkError> {
        let response = self
            .client
            .post(format!("{}/bot{}/sendMessage", self.api_url, self.token))
            .json(&json!({
                "chat_id": chat,
                "text": text,
                "parse_mode": "HTML",
            }))
            .send()
            .await
            .map_err(SinkError::Notification)?;

        if !response.status().is_success() {
            return Err(SinkError::UnexpectedStatus {
                service: "telegram",
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }
}

/**
https://core.telegram.org/bots/api#update
 */
#[derive(Debug, Deserialize, Default)]
pub struct Update {
    pub message: Option<Message>,
    pub my_chat_member: Option<ChatMemberUpdated>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatMemberUpdated {
    pub chat: Chat,
    pub new_chat_member: ChatMember,
}

#[derive(Debug, Deserialize)]
pub struct ChatMember {
    pub status: String,
}

#[derive(Debug, PartialEq)]
pub enum Registration {
    Group { chat_id: i64, title: String },
    Start { chat_id: i64 },
}

impl Registration {
    pub fn chat_id(&self) -> ChatId {
        match self {
            Registration::Group { chat_id, .. } | Registration::Start { chat_id } => ChatId::Id(*chat_id),
        }
    }

    pub fn confirmation(&self) -> String {
        match self {
            Registration::Group { title, .. } => {
                format!("✅ Bot activated in group <b>{}</b>", escape_html(title))
            }
            Registration::Start { .. } => {
                "🚀 Bot is ready to receive SePay transfer notifications!".to_string()
            }
        }
    }
}

fn is_group(chat: &Chat) -> bool {
    chat.chat_type == "group" || chat.chat_type == "supergroup"
}

impl Update {
    /**
    A `/start` command, any message seen in a group, or the bot being added to a
    group registers that chat for alerts.
     */
    pub fn registration(&self) -> Option<Registration> {
        if let Some(message) = &self.message {
            if message
                .text
                .as_deref()
                .map_or(false, |text| text.trim_start().starts_with("/start"))
            {
                return Some(Registration::Start {
                    chat_id: message.chat.id,
                });
            }

            if is_group(&message.chat) {
                return Some(Registration::Group {
                    chat_id: message.chat.id,
                    title: message.chat.title.clone().unwrap_or_default(),
                });
            }
        }

        if let Some(member) = &self.my_chat_member {
            let joined = matches!(member.new_chat_member.status.as_str(), "member" | "administrator");

            if joined && is_group(&member.chat) {
                return Some(Registration::Group {
                    chat_id: member.chat.id,
                    title: member.chat.title.clone().unwrap_or_default(),
                });
            }
        }

        None
    }
}

/**
Only `&`, `<` and `>` are special in Telegram's HTML parse mode.
 */
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());

    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            c => escaped.push(c),
        }
    }

    escaped
}

/**
Groups thousands with `.` and uses `,` for decimals, as Vietnamese banks print amounts.
 */
pub fn format_amount(amount: Decimal) -> String {
    let text = amount.round_dp(2).normalize().to_string();
    let (integer, fraction) = match text.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (text.as_str(), None),
    };

    let (sign, digits) = match integer.strip_prefix('-') {
        Some(digits) => ("-", digits),
        None => ("", integer),
    };

    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }

    match fraction {
        Some(fraction) => format!("{sign}{grouped},{fraction}"),
        None => format!("{sign}{grouped}"),
    }
}

pub fn format_transaction_message(transaction: &Transaction, tz: Tz) -> String {
    let (label, amount) = if transaction.amount_in > Decimal::ZERO || transaction.amount_out.is_zero() {
        ("💰 Amount in", transaction.amount_in)
    } else {
        ("💸 Amount out", transaction.amount_out)
    };

    let reference = match &transaction.extracted_reference {
        Some(reference) => format!("<b>{}</b>", escape_html(reference)),
        None => "not found".to_string(),
    };

    let received = transaction
        .received_at
        .with_timezone(&tz)
        .format("%d/%m/%Y %H:%M:%S");

    format!(
        "💸 <b>New transaction!</b>\n\
         🏦 Bank: <b>{bank}</b>\n\
         👤 Sender: <b>{sender}</b>\n\
         {label}: <b>{amount} VND</b>\n\
         📝 Content: <i>{content}</i>\n\
         🕒 Time: {time} (received {received})\n\
         🔖 Reference code: <code>{code}</code>\n\
         🧾 Order/User code: {reference}",
        bank = escape_html(&transaction.bank_name),
        sender = escape_html(transaction.sender()),
        amount = format_amount(amount),
        content = escape_html(&transaction.content),
        time = escape_html(&transaction.occurred_at),
        code = escape_html(&transaction.reference_code),
    )
}

pub(crate) mod handler {
    use async_trait::async_trait;
    use chrono_tz::Tz;
    use sepay_shared::Transaction;
    use std::sync::Arc;

    use crate::error::SinkError;
    use crate::external_services::telegram::{format_transaction_message, NotificationTarget, TelegramClient};
    use crate::transaction_handler::{SinkOutcome, TransactionSink};

    pub struct TelegramNotifier {
        pub client: TelegramClient,
        pub target: Arc<NotificationTarget>,
        pub tz: Tz,
    }

    #[async_trait]
    impl TransactionSink for TelegramNotifier {
        fn name(&self) -> &'static str {
            "telegram"
        }

        async fn deliver(&self, transaction: &Transaction) -> Result<SinkOutcome, SinkError> {
            let Some(chat) = self.target.get() else {
                return Ok(SinkOutcome::Skipped("no telegram chat registered"));
            };

            self.client
                .send_message(&chat, &format_transaction_message(transaction, self.tz))
                .await?;

            Ok(SinkOutcome::Delivered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_transaction, spawn_recorder};
    use std::str::FromStr;
    use std::time::Duration;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(Decimal::from(0)), "0");
        assert_eq!(format_amount(Decimal::from(999)), "999");
        assert_eq!(format_amount(Decimal::from(10000)), "10.000");
        assert_eq!(format_amount(Decimal::from(1234567)), "1.234.567");
        assert_eq!(format_amount(Decimal::from_str("2277000.00").unwrap()), "2.277.000");
        assert_eq!(format_amount(Decimal::from_str("1234.5").unwrap()), "1.234,5");
    }

    #[test]
    fn test_chat_id_parse() {
        assert_eq!(ChatId::parse("-1001234"), ChatId::Id(-1001234));
        assert_eq!(ChatId::parse(" @payments "), ChatId::Username("@payments".to_string()));
        assert_eq!(serde_json::to_value(ChatId::Id(5)).unwrap(), json!(5));
    }

    #[test]
    fn test_notification_target_last_write_wins() {
        let target = NotificationTarget::new(None);
        assert_eq!(target.get(), None);

        target.set(ChatId::Id(1));
        target.set(ChatId::Id(2));
        assert_eq!(target.get(), Some(ChatId::Id(2)));
    }

    #[test]
    fn test_message_contains_transaction_details() {
        let mut transaction = sample_transaction("42");
        transaction.content = "pay_for DH42".to_string();

        let message = format_transaction_message(&transaction, chrono_tz::Asia::Ho_Chi_Minh);

        assert!(message.contains("<b>MBBank</b>"));
        assert!(message.contains("<b>10.000 VND</b>"));
        assert!(message.contains("<i>pay_for DH42</i>"));
        assert!(message.contains("<code>REF42</code>"));
        assert!(message.contains("<b>42</b>"));

        transaction.content = "a<b> & *bold* `x`".to_string();
        let message = format_transaction_message(&transaction, chrono_tz::Asia::Ho_Chi_Minh);
        assert!(message.contains("<i>a&lt;b&gt; &amp; *bold* `x`</i>"));

        transaction.extracted_reference = None;
        let message = format_transaction_message(&transaction, chrono_tz::Asia::Ho_Chi_Minh);
        assert!(message.contains("Order/User code: not found"));
    }

    #[test]
    fn test_registration_from_updates() {
        let group: Update = serde_json::from_value(json!({
            "update_id": 1,
            "message": {"message_id": 3, "chat": {"id": -100500, "type": "supergroup", "title": "Shop"}, "text": "hello"}
        }))
        .unwrap();
        assert_eq!(
            group.registration(),
            Some(Registration::Group { chat_id: -100500, title: "Shop".to_string() })
        );

        let start: Update = serde_json::from_value(json!({
            "message": {"chat": {"id": 77, "type": "private"}, "text": "/start"}
        }))
        .unwrap();
        assert_eq!(start.registration(), Some(Registration::Start { chat_id: 77 }));

        let private: Update = serde_json::from_value(json!({
            "message": {"chat": {"id": 77, "type": "private"}, "text": "hi"}
        }))
        .unwrap();
        assert_eq!(private.registration(), None);

        let added: Update = serde_json::from_value(json!({
            "my_chat_member": {
                "chat": {"id": -42, "type": "group", "title": "Ops"},
                "new_chat_member": {"status": "member", "user": {"id": 1}}
            }
        }))
        .unwrap();
        assert_eq!(added.registration().map(|r| r.chat_id()), Some(ChatId::Id(-42)));

        let kicked: Update = serde_json::from_value(json!({
            "my_chat_member": {
                "chat": {"id": -42, "type": "group", "title": "Ops"},
                "new_chat_member": {"status": "left"}
            }
        }))
        .unwrap();
        assert_eq!(kicked.registration(), None);
    }

    #[tokio::test]
    async fn test_send_message() {
        let recorder = spawn_recorder().await;
        let client = TelegramClient::new(reqwest::Client::new(), &recorder.url(), "123:abc");

        client.send_message(&ChatId::Id(-5), "hello").await.unwrap();

        let requests = recorder.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/bot123:abc/sendMessage");
        assert_eq!(requests[0].body["chat_id"], json!(-5));
        assert_eq!(requests[0].body["parse_mode"], json!("HTML"));
    }

    #[tokio::test]
    async fn test_send_message_to_stalled_api_times_out() {
        let recorder = spawn_recorder().await;
        recorder.stall_for(Duration::from_secs(10));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        let telegram = TelegramClient::new(client, &recorder.url(), "t");

        let started = tokio::time::Instant::now();
        let result = telegram.send_message(&ChatId::Id(1), "x").await;

        assert!(matches!(result, Err(SinkError::Notification(_))));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_send_message_rejected_status() {
        let recorder = spawn_recorder().await;
        recorder.fail_next(1);
        let client = TelegramClient::new(reqwest::Client::new(), &recorder.url(), "t");

        let result = client.send_message(&ChatId::Id(1), "x").await;
        assert!(matches!(result, Err(SinkError::UnexpectedStatus { status: 500, .. })));
    }
}
