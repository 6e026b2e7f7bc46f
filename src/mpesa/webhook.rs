// Inbound callback decoding. Every input shape is reduced to a byte buffer first,
// then decoded through a single serde_json path.

use std::io::Read;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::mpesa::errors::MpesaError;

/// Raw forms a callback body can arrive in.
pub enum CallbackInput<'a> {
    /// JSON text.
    Text(&'a str),
    /// JSON bytes, e.g. an HTTP request body.
    Bytes(&'a [u8]),
    /// Byte source drained to the end before decoding.
    Stream(&'a mut dyn Read),
    /// Already-structured value; re-serialized and decoded into the target shape.
    Value(Value),
}

impl<'a> CallbackInput<'a> {
    /// Wraps any serializable value, typically a callback struct built in tests.
    pub fn from_typed<T: Serialize>(value: &T) -> Result<Self, MpesaError> {
        serde_json::to_value(value)
            .map(CallbackInput::Value)
            .map_err(|source| MpesaError::Encode {
                operation: "callback",
                source,
            })
    }

    fn into_bytes(self) -> Result<Vec<u8>, MpesaError> {
        match self {
            CallbackInput::Text(s) => Ok(s.as_bytes().to_vec()),
            CallbackInput::Bytes(b) => Ok(b.to_vec()),
            CallbackInput::Stream(r) => {
                let mut buf = Vec::new();
                r.read_to_end(&mut buf).map_err(|e| MpesaError::Decode {
                    operation: "callback",
                    status: None,
                    message: format!("read body: {e}"),
                })?;
                Ok(buf)
            }
            CallbackInput::Value(v) => serde_json::to_vec(&v).map_err(|source| MpesaError::Encode {
                operation: "callback",
                source,
            }),
        }
    }
}

impl<'a> From<&'a str> for CallbackInput<'a> {
    fn from(s: &'a str) -> Self {
        CallbackInput::Text(s)
    }
}

impl<'a> From<&'a [u8]> for CallbackInput<'a> {
    fn from(b: &'a [u8]) -> Self {
        CallbackInput::Bytes(b)
    }
}

impl From<Value> for CallbackInput<'_> {
    fn from(v: Value) -> Self {
        CallbackInput::Value(v)
    }
}

/// Decodes a callback body into `T`. Malformed JSON is an error; nothing is partially decoded.
pub fn decode_callback<'a, T: DeserializeOwned>(
    input: impl Into<CallbackInput<'a>>,
) -> Result<T, MpesaError> {
    let bytes = input.into().into_bytes()?;
    serde_json::from_slice(&bytes).map_err(|e| MpesaError::Decode {
        operation: "callback",
        status: None,
        message: e.to_string(),
    })
}

/// Decodes a body of either callback shape.
pub fn decode_any<'a>(input: impl Into<CallbackInput<'a>>) -> Result<CallbackEnvelope, MpesaError> {
    decode_callback(input)
}

/// Either of the two notification shapes M-Pesa posts back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallbackEnvelope {
    /// STK push confirmation.
    Checkout(StkPushCallback),
    /// B2C, B2B, balance and status results.
    Result(ResultCallback),
}

impl CallbackEnvelope {
    pub fn result_code(&self) -> i64 {
        match self {
            CallbackEnvelope::Checkout(c) => c.body.stk_callback.result_code,
            CallbackEnvelope::Result(r) => r.result.result_code,
        }
    }

    pub fn result_desc(&self) -> &str {
        match self {
            CallbackEnvelope::Checkout(c) => &c.body.stk_callback.result_desc,
            CallbackEnvelope::Result(r) => &r.result.result_desc,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result_code() == 0
    }
}

// Checkout (STK push) shape

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StkPushCallback {
    #[serde(rename = "Body")]
    pub body: StkPushCallbackBody,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StkPushCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    /// 0 on success; e.g. 1032 when the customer cancels.
    pub result_code: i64,
    pub result_desc: String,
    /// Only present for successful payments.
    #[serde(default)]
    pub callback_metadata: CallbackMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub item: Vec<CallbackItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl StkCallback {
    /// Looks up a metadata item such as `MpesaReceiptNumber` or `Amount`.
    pub fn metadata_value(&self, name: &str) -> Option<&Value> {
        self.callback_metadata
            .item
            .iter()
            .find(|i| i.name == name)
            .and_then(|i| i.value.as_ref())
    }
}

// Generic result shape

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultCallback {
    #[serde(rename = "Result")]
    pub result: CallbackResult,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallbackResult {
    #[serde(default, deserialize_with = "int_or_string")]
    pub result_type: i64,
    #[serde(deserialize_with = "int_or_string")]
    pub result_code: i64,
    pub result_desc: String,
    #[serde(rename = "OriginatorConversationID", default)]
    pub originator_conversation_id: String,
    #[serde(rename = "ConversationID", default)]
    pub conversation_id: String,
    #[serde(rename = "TransactionID", default)]
    pub transaction_id: String,
    #[serde(default)]
    pub result_parameters: ResultParameters,
    #[serde(default)]
    pub reference_data: ReferenceData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultParameters {
    #[serde(rename = "ResultParameter", default)]
    pub result_parameter: Vec<ResultParameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultParameter {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value", default)]
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceData {
    // B2C results carry a single object here, B2B results a list.
    #[serde(rename = "ReferenceItem", default, deserialize_with = "one_or_many")]
    pub reference_item: Vec<ReferenceItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceItem {
    #[serde(rename = "Key", default)]
    pub key: String,
    #[serde(rename = "Value", default)]
    pub value: Value,
}

// Result callbacks send codes as numbers, B2B ones sometimes as strings ("0").
fn int_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom(format!("code {n} is not an integer"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("code {s:?} is not an integer"))),
        other => Err(serde::de::Error::custom(format!("expected a code, got {other}"))),
    }
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        Some(OneOrMany::One(item)) => vec![item],
        Some(OneOrMany::Many(items)) => items,
        None => Vec::new(),
    })
}

impl CallbackResult {
    /// Looks up a result parameter such as `TransactionAmount` or `ReceiverPartyPublicName`.
    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.result_parameters
            .result_parameter
            .iter()
            .find(|p| p.key == key)
            .map(|p| &p.value)
    }

    /// Looks up a reference item such as `QueueTimeoutURL` or `BillReferenceNumber`.
    pub fn reference(&self, key: &str) -> Option<&Value> {
        self.reference_data
            .reference_item
            .iter()
            .find(|i| i.key == key)
            .map(|i| &i.value)
    }
}
