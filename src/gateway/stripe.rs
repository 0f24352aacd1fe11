use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{
    ChargeOutcome, ChargeParams, GatewayError, PaymentGateway, RefundOutcome, RefundParams,
};
use crate::domain::{PaymentProvider, ProviderFields, CHARGE_ID, PAYMENT_INTENT_ID, REFUND_ID};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

const CARD_ERROR: &str = "card_error";
const CHARGE_ALREADY_REFUNDED: &str = "charge_already_refunded";

#[derive(Debug, Deserialize)]
struct PaymentIntentObject {
    id: String,
    #[serde(default)]
    latest_charge: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundObject {
    id: String,
    #[serde(default)]
    charge: Option<String>,
    #[serde(default)]
    payment_intent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: StripeApiError,
}

#[derive(Debug, Deserialize)]
struct StripeApiError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    decline_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    charge: Option<String>,
    #[serde(default)]
    payment_intent: Option<PaymentIntentObject>,
}

impl StripeApiError {
    fn into_api_error(self, status: u16) -> GatewayError {
        GatewayError::Api {
            status,
            code: self.code.unwrap_or_else(|| self.kind.clone()),
            message: self.message.unwrap_or_default(),
        }
    }
}

/// HTTP client for the Stripe payment intents and refunds APIs.
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    base_url: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_error(response: reqwest::Response) -> Result<(u16, StripeApiError), GatewayError> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        let parsed: ErrorBody = serde_json::from_str(&body).map_err(|_| {
            GatewayError::InvalidResponse(format!(
                "status {} with unparseable body: {}",
                status,
                body.chars().take(200).collect::<String>()
            ))
        })?;
        Ok((status, parsed.error))
    }
}

fn insert_handle(fields: &mut ProviderFields, key: &str, value: Option<String>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        fields.insert(key.to_string(), serde_json::Value::String(value));
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    async fn charge(&self, params: &ChargeParams) -> Result<ChargeOutcome, GatewayError> {
        let form = [
            ("amount", params.amount.to_string()),
            ("currency", params.currency.clone()),
            ("description", params.description.clone()),
            ("payment_method", params.payment_method.clone()),
            ("confirm", "true".to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("automatic_payment_methods[allow_redirects]", "never".to_string()),
            ("metadata[transaction_id]", params.transaction_id.clone()),
        ];

        let response = self
            .client
            .post(self.url("/v1/payment_intents"))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &params.idempotency_key)
            .form(&form)
            .send()
            .await?;

        if response.status().is_success() {
            let intent: PaymentIntentObject = response
                .json()
                .await
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

            let mut handles = ProviderFields::new();
            insert_handle(&mut handles, PAYMENT_INTENT_ID, Some(intent.id));
            insert_handle(&mut handles, CHARGE_ID, intent.latest_charge);
            return Ok(ChargeOutcome::Accepted { handles });
        }

        let (status, error) = Self::read_error(response).await?;
        if error.kind != CARD_ERROR {
            return Err(error.into_api_error(status));
        }

        let reason = error
            .decline_code
            .or(error.code)
            .unwrap_or_else(|| "card_declined".to_string());

        let mut handles = ProviderFields::new();
        let (intent_id, latest_charge) = match error.payment_intent {
            Some(intent) => (Some(intent.id), intent.latest_charge),
            None => (None, None),
        };
        insert_handle(&mut handles, PAYMENT_INTENT_ID, intent_id);
        insert_handle(&mut handles, CHARGE_ID, error.charge.or(latest_charge));

        Ok(ChargeOutcome::Declined { reason, handles })
    }

    async fn refund(&self, params: &RefundParams) -> Result<RefundOutcome, GatewayError> {
        let form = [
            ("charge", params.charge_id.as_str()),
            ("metadata[transaction_id]", params.transaction_id.as_str()),
        ];

        let response = self
            .client
            .post(self.url("/v1/refunds"))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &params.idempotency_key)
            .form(&form)
            .send()
            .await?;

        if response.status().is_success() {
            let refund: RefundObject = response
                .json()
                .await
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

            let mut handles = ProviderFields::new();
            insert_handle(&mut handles, REFUND_ID, Some(refund.id));
            insert_handle(&mut handles, CHARGE_ID, refund.charge);
            insert_handle(&mut handles, PAYMENT_INTENT_ID, refund.payment_intent);
            return Ok(RefundOutcome::Refunded { handles });
        }

        let (status, error) = Self::read_error(response).await?;
        if error.code.as_deref() == Some(CHARGE_ALREADY_REFUNDED) {
            return Ok(RefundOutcome::AlreadyRefunded);
        }

        Err(error.into_api_error(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn params() -> ChargeParams {
        ChargeParams {
            amount: 2000,
            currency: "usd".to_string(),
            payment_method: "pm_card_visa".to_string(),
            description: "Transaction for payment amount of 2000".to_string(),
            idempotency_key: "TXN_1".to_string(),
            transaction_id: "TXN_1".to_string(),
        }
    }

    fn gateway(url: String) -> StripeGateway {
        StripeGateway::new(url, "sk_test_123", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_charge_accepted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/payment_intents")
            .match_header("authorization", "Bearer sk_test_123")
            .match_header("idempotency-key", "TXN_1")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("amount".into(), "2000".into()),
                Matcher::UrlEncoded("currency".into(), "usd".into()),
                Matcher::UrlEncoded("confirm".into(), "true".into()),
                Matcher::UrlEncoded("metadata[transaction_id]".into(), "TXN_1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"pi_123","status":"succeeded","latest_charge":"ch_123"}"#)
            .create_async()
            .await;

        let outcome = gateway(server.url()).charge(&params()).await.unwrap();

        mock.assert_async().await;
        match outcome {
            ChargeOutcome::Accepted { handles } => {
                assert_eq!(handles[PAYMENT_INTENT_ID], "pi_123");
                assert_eq!(handles[CHARGE_ID], "ch_123");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_charge_card_error_is_decline() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/payment_intents")
            .with_status(402)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"error":{"type":"card_error","code":"card_declined","decline_code":"insufficient_funds",
                "message":"Your card has insufficient funds.","charge":"ch_999",
                "payment_intent":{"id":"pi_999","latest_charge":"ch_999"}}}"#,
            )
            .create_async()
            .await;

        let outcome = gateway(server.url()).charge(&params()).await.unwrap();

        match outcome {
            ChargeOutcome::Declined { reason, handles } => {
                assert_eq!(reason, "insufficient_funds");
                assert_eq!(handles[PAYMENT_INTENT_ID], "pi_999");
                assert_eq!(handles[CHARGE_ID], "ch_999");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_charge_non_card_error_propagates() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/payment_intents")
            .with_status(401)
            .with_body(r#"{"error":{"type":"invalid_request_error","code":"api_key_expired","message":"Expired API Key"}}"#)
            .create_async()
            .await;

        let err = gateway(server.url()).charge(&params()).await.unwrap_err();
        match err {
            GatewayError::Api { status, code, .. } => {
                assert_eq!(status, 401);
                assert_eq!(code, "api_key_expired");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_charge_garbage_error_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/payment_intents")
            .with_status(502)
            .with_body("<html>bad gateway</html>")
            .create_async()
            .await;

        let err = gateway(server.url()).charge(&params()).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_refund_succeeds() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/refunds")
            .match_header("idempotency-key", "TXN_1-refund-1")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("charge".into(), "ch_123".into()),
                Matcher::UrlEncoded("metadata[transaction_id]".into(), "TXN_1".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"id":"re_123","charge":"ch_123","payment_intent":"pi_123","status":"pending"}"#)
            .create_async()
            .await;

        let outcome = gateway(server.url())
            .refund(&RefundParams::new("ch_123", "TXN_1", 1))
            .await
            .unwrap();

        mock.assert_async().await;
        match outcome {
            RefundOutcome::Refunded { handles } => {
                assert_eq!(handles[REFUND_ID], "re_123");
                assert_eq!(handles[CHARGE_ID], "ch_123");
                assert_eq!(handles[PAYMENT_INTENT_ID], "pi_123");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refund_already_refunded() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/refunds")
            .with_status(400)
            .with_body(r#"{"error":{"type":"invalid_request_error","code":"charge_already_refunded","message":"Charge ch_123 has already been refunded."}}"#)
            .create_async()
            .await;

        let outcome = gateway(server.url())
            .refund(&RefundParams::new("ch_123", "TXN_1", 1))
            .await
            .unwrap();
        assert_eq!(outcome, RefundOutcome::AlreadyRefunded);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let gw = gateway("https://api.stripe.com/".to_string());
        assert_eq!(gw.url("/v1/refunds"), "https://api.stripe.com/v1/refunds");
    }
}
