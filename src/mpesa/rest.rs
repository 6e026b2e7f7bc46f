// M-Pesa REST client
// Every operation goes through `dispatch`: serialize, attach a bearer token, send, decode, classify.
// Local preconditions (secrets, callback URL schemes) are checked before any network call.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Local, Utc};
use http::{HeaderValue, Method};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::mpesa::auth::{Authenticator, Clock};
use crate::mpesa::credential::{encrypt_security_credential, encrypt_with_certificate, rsa_public_key};
use crate::mpesa::errors::{CredentialError, MpesaError};
use crate::mpesa::http::{HttpClient, HttpRequest};
use crate::mpesa::types::{
    AccountBalanceRequest, B2cRequest, BusinessPayBillRequest, CommandId, DynamicQrRequest,
    DynamicQrResponse, DynamicQrTransactionType, IdentifierType, ProviderResponse,
    RegisterC2bUrlRequest, ResponseEnvelope, StkPushRequest, StkQueryRequest,
    TransactionStatusRequest,
};
use crate::mpesa::Environment;

pub const AUTH_PATH: &str = "/oauth/v1/generate?grant_type=client_credentials";
pub const ACCOUNT_BALANCE_PATH: &str = "/mpesa/accountbalance/v1/query";
pub const B2B_PATH: &str = "/mpesa/b2b/v1/paymentrequest";
pub const B2C_PATH: &str = "/mpesa/b2c/v1/paymentrequest";
pub const C2B_REGISTER_PATH: &str = "/mpesa/c2b/v1/registerurl";
pub const DYNAMIC_QR_PATH: &str = "/mpesa/qrcode/v1/generate";
pub const STK_PUSH_PATH: &str = "/mpesa/stkpush/v1/processrequest";
pub const STK_QUERY_PATH: &str = "/mpesa/stkpushquery/v1/query";
pub const TRANSACTION_STATUS_PATH: &str = "/mpesa/transactionstatus/v1/query";

/// Scheme every callback, result and timeout URL must use.
pub const REQUIRED_URL_SCHEME: &str = "https";

pub struct MpesaClient {
    pub(crate) http: Arc<dyn HttpClient>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) environment: Environment,
    pub(crate) base_url: String,
    pub(crate) auth: Authenticator,
    pub(crate) certificate: Option<Vec<u8>>,
}

/// Checks that `raw` parses as an absolute URL served over https.
pub fn validate_url(raw: &str) -> Result<(), MpesaError> {
    let url = url::Url::parse(raw).map_err(|e| MpesaError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.scheme() != REQUIRED_URL_SCHEME {
        return Err(MpesaError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("must use {REQUIRED_URL_SCHEME:?}"),
        });
    }
    Ok(())
}

/// Returns `(timestamp, password)` where the timestamp is local time as `YYYYMMDDHHmmss`
/// and the password is `base64(shortcode + passkey + timestamp)`.
pub fn generate_timestamp_and_password(
    shortcode: u32,
    passkey: &str,
    now: DateTime<Utc>,
) -> (String, String) {
    let timestamp = now.with_timezone(&Local).format("%Y%m%d%H%M%S").to_string();
    let password = STANDARD.encode(format!("{shortcode}{passkey}{timestamp}"));
    (timestamp, password)
}

fn require_passkey(passkey: &str) -> Result<(), MpesaError> {
    if passkey.is_empty() {
        return Err(MpesaError::InvalidPasskey);
    }
    Ok(())
}

fn require_initiator_password(initiator_password: &str) -> Result<(), MpesaError> {
    if initiator_password.is_empty() {
        return Err(MpesaError::InvalidInitiatorPassword);
    }
    Ok(())
}

impl MpesaClient {
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Bearer token for this client's consumer key, cached for 55 minutes.
    pub async fn get_access_token(&self) -> Result<String, MpesaError> {
        self.auth.get_access_token().await
    }

    /// Encrypts an initiator password with the configured certificate, falling back to
    /// the one embedded for this client's environment.
    pub fn security_credential(&self, initiator_password: &str) -> Result<String, MpesaError> {
        match &self.certificate {
            Some(bundle) => encrypt_with_certificate(bundle, initiator_password),
            None => encrypt_security_credential(initiator_password, self.environment),
        }
    }

    /// Checks that a usable RSA certificate is available for security credentials.
    pub fn verify_certificate(&self) -> Result<(), MpesaError> {
        let bundle = match &self.certificate {
            Some(bundle) => bundle.as_slice(),
            None => crate::mpesa::certs::certificate(self.environment),
        };
        match rsa_public_key(bundle) {
            Ok(_) => Ok(()),
            Err(CredentialError::MissingCertificate) if self.certificate.is_none() => {
                Err(CredentialError::NotEmbedded(self.environment.as_str()).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Sends `payload` to `endpoint` (a path under the environment's base URL) and
    /// classifies the generic response envelope.
    pub async fn execute<P>(
        &self,
        method: Method,
        endpoint: &str,
        payload: &P,
    ) -> Result<ResponseEnvelope, MpesaError>
    where
        P: Serialize + ?Sized,
    {
        self.dispatch("execute", method, endpoint, payload).await
    }

    async fn dispatch<P, R>(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        payload: &P,
    ) -> Result<R, MpesaError>
    where
        P: Serialize + ?Sized,
        R: ProviderResponse,
    {
        let body =
            serde_json::to_vec(payload).map_err(|source| MpesaError::Encode { operation, source })?;

        let token = self.auth.get_access_token().await?;
        let bearer =
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                MpesaError::MalformedToken {
                    status: None,
                    message: format!("access token is not a valid header value: {e}"),
                }
            })?;

        info!(
            target: "mpesa",
            method = %method,
            path = %path,
            operation = operation,
            "mpesa request"
        );

        let req = HttpRequest::new(method, format!("{}{}", self.base_url, path))
            .header(http::header::AUTHORIZATION, bearer)
            .json_body(body);
        let resp = self
            .http
            .send(req)
            .await
            .map_err(|source| MpesaError::Transport { operation, source })?;

        let status = resp.status;
        let decoded: R = serde_json::from_slice(&resp.body).map_err(|e| {
            warn!(target: "mpesa", operation = operation, status = status.as_u16(), "undecodable response body");
            MpesaError::Decode {
                operation,
                status: Some(status.as_u16()),
                message: e.to_string(),
            }
        })?;

        if let Some(rejection) = decoded.rejection() {
            warn!(
                target: "mpesa",
                operation = operation,
                status = status.as_u16(),
                request_id = %rejection.request_id,
                code = %rejection.code,
                "mpesa request rejected"
            );
            return Err(rejection.into());
        }

        if !status.is_success() {
            warn!(target: "mpesa", operation = operation, status = status.as_u16(), "mpesa request failed");
            return Err(MpesaError::Rejected {
                request_id: String::new(),
                code: status.as_u16().to_string(),
                message: resp.status_text(),
            });
        }

        Ok(decoded)
    }

    /// Initiates a Lipa na M-Pesa online payment: the customer gets a PIN prompt on their phone.
    #[instrument(skip(self, passkey, req), fields(method = "POST", path = STK_PUSH_PATH, shortcode = req.business_short_code))]
    pub async fn stk_push(
        &self,
        passkey: &str,
        mut req: StkPushRequest,
    ) -> Result<ResponseEnvelope, MpesaError> {
        require_passkey(passkey)?;
        validate_url(&req.callback_url)?;

        let (timestamp, password) =
            generate_timestamp_and_password(req.business_short_code, passkey, self.clock.now());
        req.timestamp = timestamp;
        req.password = password;

        self.dispatch("stk_push", Method::POST, STK_PUSH_PATH, &req).await
    }

    /// Checks the status of an STK push by its `CheckoutRequestID`.
    #[instrument(skip(self, passkey, req), fields(method = "POST", path = STK_QUERY_PATH, checkout_request_id = %req.checkout_request_id))]
    pub async fn stk_query(
        &self,
        passkey: &str,
        mut req: StkQueryRequest,
    ) -> Result<ResponseEnvelope, MpesaError> {
        require_passkey(passkey)?;

        let (timestamp, password) =
            generate_timestamp_and_password(req.business_short_code, passkey, self.clock.now());
        req.timestamp = timestamp;
        req.password = password;

        self.dispatch("stk_query", Method::POST, STK_QUERY_PATH, &req).await
    }

    /// Pays out from a B2C shortcode to a customer phone number.
    #[instrument(skip(self, initiator_password, req), fields(method = "POST", path = B2C_PATH, command_id = ?req.command_id))]
    pub async fn b2c(
        &self,
        initiator_password: &str,
        mut req: B2cRequest,
    ) -> Result<ResponseEnvelope, MpesaError> {
        require_initiator_password(initiator_password)?;
        validate_url(&req.queue_timeout_url)?;
        validate_url(&req.result_url)?;

        req.security_credential = self.security_credential(initiator_password)?;

        self.dispatch("b2c", Method::POST, B2C_PATH, &req).await
    }

    /// Moves funds from a business shortcode to a paybill.
    #[instrument(skip(self, initiator_password, req), fields(method = "POST", path = B2B_PATH, party_b = req.party_b))]
    pub async fn business_pay_bill(
        &self,
        initiator_password: &str,
        mut req: BusinessPayBillRequest,
    ) -> Result<ResponseEnvelope, MpesaError> {
        require_initiator_password(initiator_password)?;
        validate_url(&req.queue_timeout_url)?;
        validate_url(&req.result_url)?;

        req.security_credential = self.security_credential(initiator_password)?;
        req.command_id = CommandId::BusinessPayBill;
        req.sender_identifier_type = IdentifierType::Shortcode;
        req.reciever_identifier_type = IdentifierType::Shortcode;

        self.dispatch("business_pay_bill", Method::POST, B2B_PATH, &req).await
    }

    /// Registers the confirmation and validation URLs for C2B payments to a shortcode.
    #[instrument(skip(self, req), fields(method = "POST", path = C2B_REGISTER_PATH, shortcode = req.short_code))]
    pub async fn register_c2b_url(
        &self,
        req: RegisterC2bUrlRequest,
    ) -> Result<ResponseEnvelope, MpesaError> {
        validate_url(&req.confirmation_url)?;
        validate_url(&req.validation_url)?;

        self.dispatch("register_c2b_url", Method::POST, C2B_REGISTER_PATH, &req)
            .await
    }

    /// Generates a dynamic QR code; the image comes back base64-encoded in `QRCode`.
    #[instrument(skip(self, req), fields(method = "POST", path = DYNAMIC_QR_PATH, trx_code = ?transaction_type))]
    pub async fn dynamic_qr(
        &self,
        mut req: DynamicQrRequest,
        transaction_type: DynamicQrTransactionType,
    ) -> Result<DynamicQrResponse, MpesaError> {
        req.transaction_type = transaction_type;
        self.dispatch("dynamic_qr", Method::POST, DYNAMIC_QR_PATH, &req).await
    }

    /// Queries the status of a transaction; the outcome is posted to `ResultURL`.
    #[instrument(skip(self, initiator_password, req), fields(method = "POST", path = TRANSACTION_STATUS_PATH, transaction_id = %req.transaction_id))]
    pub async fn transaction_status(
        &self,
        initiator_password: &str,
        mut req: TransactionStatusRequest,
    ) -> Result<ResponseEnvelope, MpesaError> {
        require_initiator_password(initiator_password)?;
        validate_url(&req.queue_timeout_url)?;
        validate_url(&req.result_url)?;

        req.security_credential = self.security_credential(initiator_password)?;
        req.command_id = CommandId::TransactionStatusQuery;
        req.identifier_type = IdentifierType::Shortcode;

        self.dispatch("transaction_status", Method::POST, TRANSACTION_STATUS_PATH, &req)
            .await
    }

    /// Requests the balance of a shortcode; the figures are posted to `ResultURL`.
    #[instrument(skip(self, initiator_password, req), fields(method = "POST", path = ACCOUNT_BALANCE_PATH, party_a = req.party_a))]
    pub async fn account_balance(
        &self,
        initiator_password: &str,
        mut req: AccountBalanceRequest,
    ) -> Result<ResponseEnvelope, MpesaError> {
        require_initiator_password(initiator_password)?;
        validate_url(&req.queue_timeout_url)?;
        validate_url(&req.result_url)?;

        req.security_credential = self.security_credential(initiator_password)?;
        req.command_id = CommandId::AccountBalance;
        req.identifier_type = IdentifierType::Shortcode;

        self.dispatch("account_balance", Method::POST, ACCOUNT_BALANCE_PATH, &req)
            .await
    }
}
