// Daraja request/response DTOs. Field names follow the wire format exactly.
use serde::{Deserialize, Serialize};

use crate::mpesa::errors::{Rejection, SUCCESS_CODE};

/// Unique command that tells M-Pesa which kind of transaction to run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum CommandId {
    AccountBalance,
    BusinessPayBill,
    #[default]
    BusinessPayment,
    PromotionPayment,
    SalaryPayment,
    TransactionStatusQuery,
}

/// STK push transaction type: paybill or till number.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TransactionType {
    #[default]
    CustomerPayBillOnline,
    CustomerBuyGoodsOnline,
}

/// What M-Pesa does when the C2B validation URL cannot be reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResponseType {
    Completed,
    #[serde(rename = "Cancelled", alias = "Canceled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DynamicQrTransactionType {
    /// Pay merchant (buy goods).
    #[default]
    #[serde(rename = "BG")]
    PayMerchantBuyGoods,
    /// Withdraw cash at agent till.
    #[serde(rename = "WA")]
    WithdrawCashAtAgentTill,
    #[serde(rename = "PB")]
    PaybillOrBusinessNumber,
    #[serde(rename = "SM")]
    SendMoneyViaMobileNumber,
    /// Sent to business; CPI is the business number in MSISDN format.
    #[serde(rename = "SB")]
    SentToBusiness,
}

/// Type of organization on either side of a transaction. Only shortcodes are
/// accepted by the APIs this crate calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentifierType {
    #[default]
    Shortcode,
}

impl IdentifierType {
    pub fn code(self) -> u8 {
        match self {
            IdentifierType::Shortcode => 4,
        }
    }
}

impl Serialize for IdentifierType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for IdentifierType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            4 => Ok(IdentifierType::Shortcode),
            other => Err(serde::de::Error::custom(format!(
                "unsupported identifier type {other}"
            ))),
        }
    }
}

// Requests

/// Lipa na M-Pesa online (STK push) request. `Password` and `Timestamp` are
/// filled in by the client right before sending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkPushRequest {
    pub business_short_code: u32,
    pub password: String,
    pub timestamp: String,
    pub transaction_type: TransactionType,
    pub amount: u64,
    pub party_a: u64,
    pub party_b: u32,
    pub phone_number: u64,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    /// Up to 12 characters, shown to the customer in the prompt.
    pub account_reference: String,
    /// Up to 13 characters.
    pub transaction_desc: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkQueryRequest {
    pub business_short_code: u32,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    pub password: String,
    pub timestamp: String,
}

/// Business to customer payment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct B2cRequest {
    pub initiator_name: String,
    pub security_credential: String,
    #[serde(rename = "CommandID")]
    pub command_id: CommandId,
    pub amount: u64,
    pub party_a: u32,
    /// Customer MSISDN including country code (254...).
    pub party_b: u64,
    pub remarks: String,
    #[serde(rename = "QueueTimeOutURL")]
    pub queue_timeout_url: String,
    #[serde(rename = "ResultURL")]
    pub result_url: String,
    pub occasion: String,
}

/// Business pay bill: move funds from one shortcode to a paybill.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BusinessPayBillRequest {
    pub initiator: String,
    pub security_credential: String,
    #[serde(rename = "CommandID")]
    pub command_id: CommandId,
    pub sender_identifier_type: IdentifierType,
    // Sic: the provider spells it this way.
    pub reciever_identifier_type: IdentifierType,
    pub amount: u64,
    pub party_a: u32,
    pub party_b: u32,
    pub account_reference: String,
    /// Customer MSISDN on whose behalf the business is paying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester: Option<u64>,
    pub remarks: String,
    #[serde(rename = "QueueTimeOutURL")]
    pub queue_timeout_url: String,
    #[serde(rename = "ResultURL")]
    pub result_url: String,
    pub occasion: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegisterC2bUrlRequest {
    pub short_code: u32,
    pub response_type: ResponseType,
    #[serde(rename = "ConfirmationURL")]
    pub confirmation_url: String,
    #[serde(rename = "ValidationURL")]
    pub validation_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DynamicQrRequest {
    #[serde(rename = "MerchantName")]
    pub merchant_name: String,
    #[serde(rename = "RefNo")]
    pub reference_no: String,
    #[serde(rename = "Amount")]
    pub amount: u64,
    #[serde(rename = "TrxCode")]
    pub transaction_type: DynamicQrTransactionType,
    /// Credit party identifier: till, paybill, agent or MSISDN depending on `TrxCode`.
    #[serde(rename = "CPI")]
    pub credit_party_identifier: String,
    /// Square image edge in pixels.
    #[serde(rename = "Size")]
    pub size: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactionStatusRequest {
    pub initiator: String,
    pub security_credential: String,
    #[serde(rename = "CommandID")]
    pub command_id: CommandId,
    #[serde(rename = "TransactionID")]
    pub transaction_id: String,
    #[serde(
        rename = "OriginatorConversationID",
        skip_serializing_if = "String::is_empty",
        default
    )]
    pub originator_conversation_id: String,
    pub party_a: u32,
    pub identifier_type: IdentifierType,
    #[serde(rename = "ResultURL")]
    pub result_url: String,
    #[serde(rename = "QueueTimeOutURL")]
    pub queue_timeout_url: String,
    pub remarks: String,
    pub occasion: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountBalanceRequest {
    pub initiator: String,
    pub security_credential: String,
    #[serde(rename = "CommandID")]
    pub command_id: CommandId,
    pub party_a: u32,
    pub identifier_type: IdentifierType,
    pub remarks: String,
    #[serde(rename = "QueueTimeOutURL")]
    pub queue_timeout_url: String,
    #[serde(rename = "ResultURL")]
    pub result_url: String,
}

// Responses

/// Anything the dispatcher can decode and classify.
pub trait ProviderResponse: serde::de::DeserializeOwned {
    /// `Some` when the body reports a provider-side failure.
    fn rejection(&self) -> Option<Rejection>;
}

/// Superset of the synchronous acknowledgement fields returned by every operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "MerchantRequestID", default, skip_serializing_if = "Option::is_none")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID", default, skip_serializing_if = "Option::is_none")]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ConversationID", default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(
        rename = "OriginatorConversationID",
        alias = "OriginatorCoversationID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub originator_conversation_id: Option<String>,
    #[serde(rename = "ResponseCode", default, skip_serializing_if = "Option::is_none")]
    pub response_code: Option<String>,
    #[serde(rename = "ResponseDescription", default, skip_serializing_if = "Option::is_none")]
    pub response_description: Option<String>,
    #[serde(rename = "ResultCode", default, skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,
    #[serde(rename = "ResultDesc", default, skip_serializing_if = "Option::is_none")]
    pub result_desc: Option<String>,
    #[serde(rename = "CustomerMessage", default, skip_serializing_if = "Option::is_none")]
    pub customer_message: Option<String>,
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(rename = "errorCode", default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(rename = "errorMessage", default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ResponseEnvelope {
    /// First of `ResponseCode` / `ResultCode` that is present and not the success sentinel.
    fn failing_code(&self) -> Option<(&str, Option<&String>)> {
        [
            (self.response_code.as_deref(), self.response_description.as_ref()),
            (self.result_code.as_deref(), self.result_desc.as_ref()),
        ]
        .into_iter()
        .find_map(|(code, desc)| match code {
            Some(code) if code.trim() != SUCCESS_CODE => Some((code, desc)),
            _ => None,
        })
    }

    fn request_id_or_default(&self) -> String {
        self.request_id
            .clone()
            .or_else(|| self.merchant_request_id.clone())
            .or_else(|| self.originator_conversation_id.clone())
            .unwrap_or_default()
    }
}

impl ProviderResponse for ResponseEnvelope {
    fn rejection(&self) -> Option<Rejection> {
        if let Some(code) = self.error_code.as_deref().filter(|c| !c.is_empty()) {
            return Some(Rejection {
                request_id: self.request_id_or_default(),
                code: code.to_string(),
                message: self.error_message.clone().unwrap_or_default(),
            });
        }

        self.failing_code().map(|(code, desc)| Rejection {
            request_id: self.request_id_or_default(),
            code: code.to_string(),
            message: desc.cloned().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicQrResponse {
    #[serde(rename = "ResponseCode", default, skip_serializing_if = "Option::is_none")]
    pub response_code: Option<String>,
    #[serde(rename = "ResponseDescription", default, skip_serializing_if = "Option::is_none")]
    pub response_description: Option<String>,
    /// Base64 PNG.
    #[serde(rename = "QRCode", default, skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(
        rename = "requestId",
        alias = "RequestID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub request_id: Option<String>,
    #[serde(rename = "errorCode", default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(rename = "errorMessage", default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ProviderResponse for DynamicQrResponse {
    // ResponseCode here is an acknowledgement id (e.g. "AG_20191219_0000..."), not a status.
    fn rejection(&self) -> Option<Rejection> {
        let code = self.error_code.as_deref().filter(|c| !c.is_empty())?;
        Some(Rejection {
            request_id: self.request_id.clone().unwrap_or_default(),
            code: code.to_string(),
            message: self.error_message.clone().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope() {
        let env: ResponseEnvelope = serde_json::from_str(
            r#"{"MerchantRequestID":"29115-34620561-1","CheckoutRequestID":"ws_CO_191220191020363925",
                "ResponseCode":"0","ResponseDescription":"Success. Request accepted for processing",
                "CustomerMessage":"Success. Request accepted for processing","errorCode":""}"#,
        )
        .unwrap();
        assert_eq!(env.rejection(), None);
    }

    #[test]
    fn test_error_code_wins_over_response_code() {
        let env: ResponseEnvelope = serde_json::from_str(
            r#"{"requestId":"11728-2929992-1","ResponseCode":"0",
                "errorCode":"401.002.01","errorMessage":"Error Occurred - Invalid Access Token"}"#,
        )
        .unwrap();
        let rejection = env.rejection().unwrap();
        assert_eq!(rejection.request_id, "11728-2929992-1");
        assert_eq!(rejection.code, "401.002.01");
        assert_eq!(rejection.message, "Error Occurred - Invalid Access Token");
    }

    #[test]
    fn test_non_zero_result_code() {
        // STK query: submission accepted, but the customer cancelled.
        let env: ResponseEnvelope = serde_json::from_str(
            r#"{"MerchantRequestID":"22205-34066-1","ResponseCode":"0",
                "ResponseDescription":"The service request has been accepted successsfully",
                "ResultCode":"1032","ResultDesc":"Request cancelled by user"}"#,
        )
        .unwrap();
        let rejection = env.rejection().unwrap();
        assert_eq!(rejection.code, "1032");
        assert_eq!(rejection.request_id, "22205-34066-1");
        assert_eq!(rejection.message, "Request cancelled by user");

        let env: ResponseEnvelope =
            serde_json::from_str(r#"{"ResponseCode":"0","ResultCode":"0","ResultDesc":"ok"}"#).unwrap();
        assert_eq!(env.rejection(), None);
    }

    #[test]
    fn test_originator_conversation_id_typo_accepted() {
        let env: ResponseEnvelope = serde_json::from_str(
            r#"{"OriginatorCoversationID":"6e86-45dd-91ac-fd5d4178ab523408729","ResponseCode":"0","ResponseDescription":"Success"}"#,
        )
        .unwrap();
        assert_eq!(
            env.originator_conversation_id.as_deref(),
            Some("6e86-45dd-91ac-fd5d4178ab523408729")
        );
    }

    #[test]
    fn test_qr_ack_id_is_not_a_failure() {
        let resp: DynamicQrResponse = serde_json::from_str(
            r#"{"ResponseCode":"AG_20191219_000043fdf61864fe9ff5","RequestID":"16738-27456357-1",
                "ResponseDescription":"QR Code Successfully Generated.","QRCode":"iVBORw0KGgo="}"#,
        )
        .unwrap();
        assert_eq!(resp.rejection(), None);
        assert_eq!(resp.request_id.as_deref(), Some("16738-27456357-1"));
    }

    #[test]
    fn test_request_wire_names() {
        let req = B2cRequest {
            initiator_name: "testapi".into(),
            command_id: CommandId::SalaryPayment,
            queue_timeout_url: "https://example.com/timeout".into(),
            ..Default::default()
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["InitiatorName"], "testapi");
        assert_eq!(v["CommandID"], "SalaryPayment");
        assert_eq!(v["QueueTimeOutURL"], "https://example.com/timeout");

        let bal = AccountBalanceRequest::default();
        let v = serde_json::to_value(&bal).unwrap();
        assert_eq!(v["IdentifierType"], 4);

        let qr = DynamicQrRequest {
            transaction_type: DynamicQrTransactionType::SendMoneyViaMobileNumber,
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&qr).unwrap()["TrxCode"], "SM");
    }

    #[test]
    fn test_stk_push_always_sends_amount() {
        let v = serde_json::to_value(StkPushRequest::default()).unwrap();
        assert_eq!(v["Amount"], 0);
        assert_eq!(v["CallBackURL"], "");
    }
}
