use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use rust_decimal::Decimal;
use sepay_shared::Transaction;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::PayloadError;

/**
Candidate payload keys for every canonical transaction field, in priority order.

SePay changed its webhook shape a few times (`amount_in` / `transferAmount`,
`transaction_content` / `content` ...), and bank integrations add their own
aliases. A new shape is supported by extending these lists.
 */
#[derive(Debug, Clone)]
pub struct FieldAliases {
    pub id: &'static [&'static str],
    pub bank_name: &'static [&'static str],
    pub account_label: &'static [&'static str],
    pub account_number: &'static [&'static str],
    pub sub_account: &'static [&'static str],
    pub amount_in: &'static [&'static str],
    pub amount_out: &'static [&'static str],
    /**
    Single amount whose direction comes from `transfer_type`.
     */
    pub directional_amount: &'static [&'static str],
    pub transfer_type: &'static [&'static str],
    pub accumulated: &'static [&'static str],
    pub content: &'static [&'static str],
    pub reference_code: &'static [&'static str],
    pub gateway_code: &'static [&'static str],
    pub occurred_at: &'static [&'static str],
}

pub const SEPAY_FIELD_ALIASES: FieldAliases = FieldAliases {
    id: &["id", "transaction_id", "transferId"],
    bank_name: &["gateway", "bank_brand_name"],
    account_label: &["account_name", "accountName"],
    account_number: &["account_number", "accountNumber"],
    sub_account: &["sub_account", "subAccount"],
    amount_in: &["amount_in", "credit"],
    amount_out: &["amount_out", "debit"],
    directional_amount: &["transferAmount", "amount"],
    transfer_type: &["transferType", "transfer_type"],
    accumulated: &["accumulated", "balance"],
    content: &["transaction_content", "content", "description", "transferContent"],
    reference_code: &["referenceCode", "reference_number", "reference", "ref", "txn_id"],
    gateway_code: &["code", "transaction_code"],
    occurred_at: &["transactionDate", "transaction_date", "transaction_time", "when"],
};

pub struct PayloadNormalizer {
    aliases: FieldAliases,
    default_bank: String,
}

impl PayloadNormalizer {
    pub fn new(default_bank: impl Into<String>) -> Self {
        Self {
            aliases: SEPAY_FIELD_ALIASES,
            default_bank: default_bank.into(),
        }
    }

    /**
    Builds a [`Transaction`] from whatever SePay sent.

    Only a non-object or an empty object is rejected. Every missing field takes its
    default, since an error here would make the gateway retry a delivery that can
    never succeed.
     */
    pub fn normalize(&self, payload: Value) -> Result<Transaction, PayloadError> {
        let object = match &payload {
            Value::Object(object) if !object.is_empty() => object,
            Value::Object(_) => return Err(PayloadError::Malformed("empty object".to_string())),
            other => {
                return Err(PayloadError::Malformed(format!(
                    "expected a JSON object, got {}",
                    json_type(other)
                )))
            }
        };

        let aliases = &self.aliases;
        let received_at = Utc::now();

        let (amount_in, amount_out) = self.amounts(object);

        let transaction = Transaction {
            id: string_field(object, aliases.id).unwrap_or_else(generate_id),
            bank_name: string_field(object, aliases.bank_name)
                .unwrap_or_else(|| self.default_bank.clone()),
            account_label: string_field(object, aliases.account_label),
            account_number: string_field(object, aliases.account_number),
            sub_account: string_field(object, aliases.sub_account),
            amount_in,
            amount_out,
            accumulated: amount_field(object, aliases.accumulated)
                .map(|a| a.abs())
                .unwrap_or_default(),
            content: string_field(object, aliases.content)
                .map(|c| c.trim().to_string())
                .unwrap_or_default(),
            reference_code: string_field(object, aliases.reference_code).unwrap_or_default(),
            gateway_code: string_field(object, aliases.gateway_code),
            occurred_at: string_field(object, aliases.occurred_at)
                .unwrap_or_else(|| received_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            received_at,
            extracted_reference: None,
            raw: Value::Null,
        };

        Ok(Transaction {
            raw: payload,
            ..transaction
        })
    }

    fn amounts(&self, object: &Map<String, Value>) -> (Decimal, Decimal) {
        let explicit_in = amount_field(object, self.aliases.amount_in);
        let explicit_out = amount_field(object, self.aliases.amount_out);

        if explicit_in.is_some() || explicit_out.is_some() {
            return (
                explicit_in.map(|a| a.abs()).unwrap_or_default(),
                explicit_out.map(|a| a.abs()).unwrap_or_default(),
            );
        }

        let Some(amount) = amount_field(object, self.aliases.directional_amount) else {
            return (Decimal::ZERO, Decimal::ZERO);
        };

        let outgoing = amount.is_sign_negative()
            || string_field(object, self.aliases.transfer_type)
                .map_or(false, |t| t.trim().eq_ignore_ascii_case("out"));

        if outgoing {
            (Decimal::ZERO, amount.abs())
        } else {
            (amount, Decimal::ZERO)
        }
    }
}

fn first_present<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| match value {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        })
}

fn string_field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    first_present(object, keys).map(|value| match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/**
Unparseable amounts count as zero rather than failing the delivery.
 */
fn amount_field(object: &Map<String, Value>, keys: &[&str]) -> Option<Decimal> {
    first_present(object, keys).map(|value| match value {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s.trim()),
        _ => Decimal::ZERO,
    })
}

fn parse_decimal(s: &str) -> Decimal {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .unwrap_or_default()
}

fn generate_id() -> String {
    let random = Uuid::new_v4().simple().to_string();

    format!("TXN_{}_{}", Utc::now().timestamp_millis(), &random[..9])
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
