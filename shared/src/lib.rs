use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Incoming,
    Outgoing,
    Undetermined,
}

impl Display for TransferDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TransferDirection::Incoming => {
                "incoming"
            }
            TransferDirection::Outgoing => {
                "outgoing"
            }
            TransferDirection::Undetermined => {
                "undetermined"
            }
        })
    }
}

/**
Canonical bank transfer record built from one gateway delivery.
 */
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Transaction {
    /**
    Gateway id, or `TXN_<millis>_<random>` when the gateway sent none.
     */
    pub id: String,
    pub bank_name: String,
    pub account_label: Option<String>,
    pub account_number: Option<String>,
    pub sub_account: Option<String>,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub accumulated: Decimal,
    pub content: String,
    pub reference_code: String,
    pub gateway_code: Option<String>,
    pub occurred_at: String,
    pub received_at: DateTime<Utc>,
    /**
    Order or user code found in `content`, copied verbatim.
     */
    pub extracted_reference: Option<String>,
    pub raw: Value,
}

impl Transaction {
    pub fn direction(&self) -> TransferDirection {
        if self.amount_in > Decimal::ZERO {
            TransferDirection::Incoming
        } else if self.amount_out > Decimal::ZERO {
            TransferDirection::Outgoing
        } else {
            TransferDirection::Undetermined
        }
    }

    /**
    Display name of the sender, falling back to the bank.
     */
    pub fn sender(&self) -> &str {
        self.account_label.as_deref().unwrap_or(&self.bank_name)
    }
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
    #[serde(rename = "transactionId")]
    pub transaction_id: Option<String>,
}

impl WebhookResponse {
    pub fn processed(transaction_id: String) -> Self {
        Self {
            success: true,
            message: "Webhook processed successfully".to_string(),
            transaction_id: Some(transaction_id),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            transaction_id: None,
        }
    }
}

/**
Body relayed to the downstream account-crediting service.
 */
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ForwardPayload {
    pub user_id: String,
    pub amount: Decimal,
    pub trans_id: String,
    pub sender: String,
    pub time: String,
    pub content: String,
    pub db_id: String,
}

impl ForwardPayload {
    /**
    `None` unless a reference was extracted from the transfer memo.
     */
    pub fn from_transaction(transaction: &Transaction) -> Option<Self> {
        let reference = transaction.extracted_reference.as_ref()?;

        Some(Self {
            user_id: reference.clone(),
            amount: transaction.amount_in,
            trans_id: transaction.reference_code.clone(),
            sender: transaction.bank_name.clone(),
            time: transaction.occurred_at.clone(),
            content: transaction.content.clone(),
            db_id: transaction.id.clone(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NoTransaction {
    pub message: String,
}

impl Default for NoTransaction {
    fn default() -> Self {
        Self {
            message: "no transaction yet".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transaction(amount_in: i64, amount_out: i64, reference: Option<&str>) -> Transaction {
        Transaction {
            id: "92704".to_string(),
            bank_name: "Vietcombank".to_string(),
            account_label: None,
            account_number: None,
            sub_account: None,
            amount_in: Decimal::from(amount_in),
            amount_out: Decimal::from(amount_out),
            accumulated: Decimal::ZERO,
            content: "DH5521".to_string(),
            reference_code: "MBVCB.3278907687".to_string(),
            gateway_code: None,
            occurred_at: "2023-03-25 14:02:37".to_string(),
            received_at: Utc::now(),
            extracted_reference: reference.map(String::from),
            raw: Value::Null,
        }
    }

    #[test]
    fn test_direction() {
        assert_eq!(transaction(10, 0, None).direction(), TransferDirection::Incoming);
        assert_eq!(transaction(0, 10, None).direction(), TransferDirection::Outgoing);
        assert_eq!(transaction(0, 0, None).direction(), TransferDirection::Undetermined);
    }

    #[test]
    fn test_forward_payload_needs_reference() {
        assert!(ForwardPayload::from_transaction(&transaction(10, 0, None)).is_none());

        let payload = ForwardPayload::from_transaction(&transaction(2277000, 0, Some("5521"))).unwrap();
        assert_eq!(payload.user_id, "5521");
        assert_eq!(payload.trans_id, "MBVCB.3278907687");
        assert_eq!(payload.sender, "Vietcombank");
        assert_eq!(payload.db_id, "92704");
    }

    #[test]
    fn test_webhook_response_shape() {
        assert_eq!(
            serde_json::to_value(WebhookResponse::processed("1".to_string())).unwrap(),
            json!({"success": true, "message": "Webhook processed successfully", "transactionId": "1"})
        );
        assert_eq!(
            serde_json::to_value(WebhookResponse::failed("No data received")).unwrap(),
            json!({"success": false, "message": "No data received"})
        );
    }
}
