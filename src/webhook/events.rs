//! Payment webhook event types.
//!
//! Provider payloads are parsed in two steps. [`InboundEvent::parse`] reads
//! only the envelope (event id and type) so the raw event can be persisted
//! before anything else happens. [`InboundEvent::classify`] then normalizes the
//! payload into the closed [`PaymentEvent`] enum the handler dispatches on.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{WebhookError, WebhookResult};

/// Payment provider that sent the webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Stripe,
    Paystack,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Stripe, Provider::Paystack];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Paystack => "paystack",
        }
    }

    /// Header carrying the provider's signature.
    pub fn signature_header(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe-signature",
            Self::Paystack => "x-paystack-signature",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(Self::Stripe),
            "paystack" => Ok(Self::Paystack),
            other => Err(WebhookError::MalformedPayload(format!(
                "unknown provider {other}"
            ))),
        }
    }
}

/// Identity of a webhook event: unique per provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WebhookEventId {
    pub provider: Provider,
    pub id: String,
}

impl WebhookEventId {
    pub fn new(provider: Provider, id: impl Into<String>) -> Self {
        Self {
            provider,
            id: id.into(),
        }
    }
}

impl fmt::Display for WebhookEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.id)
    }
}

/// Business facts shared by every payment event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    /// Booking the payment belongs to
    pub booking_reference: String,
    /// Provider-side payment or charge id
    pub provider_reference: Option<String>,
    /// Amount in the currency's minor unit
    pub amount_minor: Option<i64>,
    /// ISO currency code, upper-cased
    pub currency: Option<String>,
}

/// Normalized payment event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    PaymentSucceeded(PaymentDetails),
    PaymentFailed {
        details: PaymentDetails,
        reason: Option<String>,
    },
    Refunded(PaymentDetails),
    /// Any type we do not act on. Persisted and acknowledged.
    Unknown { event_type: String },
}

impl PaymentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PaymentSucceeded(_) => "payment_succeeded",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::Refunded(_) => "refunded",
            Self::Unknown { .. } => "unknown",
        }
    }

    pub fn details(&self) -> Option<&PaymentDetails> {
        match self {
            Self::PaymentSucceeded(d) | Self::Refunded(d) => Some(d),
            Self::PaymentFailed { details, .. } => Some(details),
            Self::Unknown { .. } => None,
        }
    }
}

/// Known event type strings, per provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KnownType {
    Succeeded,
    Failed,
    Refunded,
}

fn known_type(provider: Provider, event_type: &str) -> Option<KnownType> {
    match (provider, event_type) {
        (Provider::Stripe, "payment_intent.succeeded") => Some(KnownType::Succeeded),
        (Provider::Stripe, "payment_intent.payment_failed") => Some(KnownType::Failed),
        (Provider::Stripe, "charge.refunded") => Some(KnownType::Refunded),
        (Provider::Paystack, "charge.success") => Some(KnownType::Succeeded),
        (Provider::Paystack, "charge.failed") => Some(KnownType::Failed),
        (Provider::Paystack, "refund.processed") => Some(KnownType::Refunded),
        _ => None,
    }
}

// ============================================================================
// Provider envelopes
// ============================================================================

#[derive(Debug, Deserialize)]
struct StripeEnvelope {
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StripeObject {
    id: Option<String>,
    amount: Option<i64>,
    amount_refunded: Option<i64>,
    currency: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, Value>,
    last_payment_error: Option<StripePaymentError>,
}

#[derive(Debug, Deserialize)]
struct StripePaymentError {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope {
    event: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Default, Deserialize)]
struct PaystackData {
    reference: Option<String>,
    transaction_reference: Option<String>,
    amount: Option<i64>,
    currency: Option<String>,
    gateway_response: Option<String>,
    /// Paystack sends an empty string when no metadata was attached.
    #[serde(default)]
    metadata: Value,
}

/// Render a JSON scalar id as a string.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn metadata_reference(metadata: &Value) -> Option<String> {
    metadata
        .get("booking_reference")
        .and_then(scalar_to_string)
}

// ============================================================================
// Inbound event
// ============================================================================

/// An authenticated event whose envelope has been read.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub event_id: WebhookEventId,
    pub event_type: String,
    payload: Value,
}

impl InboundEvent {
    /// Read the envelope of a provider payload.
    ///
    /// Fails with `MalformedPayload` when the body is not JSON or carries no
    /// event id or type; such payloads cannot be deduplicated and are never
    /// persisted.
    pub fn parse(provider: Provider, raw_body: &[u8]) -> WebhookResult<Self> {
        let payload: Value = serde_json::from_slice(raw_body)
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

        let (id, event_type) = match provider {
            Provider::Stripe => {
                let envelope: StripeEnvelope = serde_json::from_value(payload.clone())
                    .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
                (envelope.id, envelope.event_type)
            }
            Provider::Paystack => {
                let envelope: PaystackEnvelope = serde_json::from_value(payload.clone())
                    .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
                // Paystack has no event id; the event name plus the data id
                // is stable across redeliveries.
                let id = envelope
                    .data
                    .get("id")
                    .and_then(scalar_to_string)
                    .zip(envelope.event.as_ref())
                    .map(|(data_id, event)| format!("{event}:{data_id}"));
                (id, envelope.event)
            }
        };

        let id = id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| WebhookError::MalformedPayload("missing event id".to_string()))?;
        let event_type = event_type
            .filter(|s| !s.is_empty())
            .ok_or_else(|| WebhookError::MalformedPayload("missing event type".to_string()))?;

        Ok(Self {
            event_id: WebhookEventId::new(provider, id),
            event_type,
            payload,
        })
    }

    pub fn provider(&self) -> Provider {
        self.event_id.provider
    }

    /// Normalize into a [`PaymentEvent`].
    ///
    /// Unrecognized types become `Unknown`. A recognized type without a
    /// booking reference is `MalformedPayload`.
    pub fn classify(&self) -> WebhookResult<PaymentEvent> {
        let Some(kind) = known_type(self.provider(), &self.event_type) else {
            return Ok(PaymentEvent::Unknown {
                event_type: self.event_type.clone(),
            });
        };

        let (details, failure_reason) = match self.provider() {
            Provider::Stripe => self.stripe_details(kind)?,
            Provider::Paystack => self.paystack_details()?,
        };

        Ok(match kind {
            KnownType::Succeeded => PaymentEvent::PaymentSucceeded(details),
            KnownType::Failed => PaymentEvent::PaymentFailed {
                details,
                reason: failure_reason,
            },
            KnownType::Refunded => PaymentEvent::Refunded(details),
        })
    }

    fn stripe_details(&self, kind: KnownType) -> WebhookResult<(PaymentDetails, Option<String>)> {
        let object = self
            .payload
            .pointer("/data/object")
            .cloned()
            .unwrap_or(Value::Null);
        let object: StripeObject = if object.is_null() {
            StripeObject::default()
        } else {
            serde_json::from_value(object)
                .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?
        };

        let booking_reference = object
            .metadata
            .get("booking_reference")
            .and_then(scalar_to_string)
            .ok_or_else(|| missing_reference(&self.event_type))?;

        let amount_minor = match kind {
            KnownType::Refunded => object.amount_refunded.or(object.amount),
            _ => object.amount,
        };
        let reason = object.last_payment_error.and_then(|e| e.message);

        Ok((
            PaymentDetails {
                booking_reference,
                provider_reference: object.id,
                amount_minor,
                currency: object.currency.map(|c| c.to_uppercase()),
            },
            reason,
        ))
    }

    fn paystack_details(&self) -> WebhookResult<(PaymentDetails, Option<String>)> {
        let data = self.payload.get("data").cloned().unwrap_or(Value::Null);
        let provider_reference = data.get("id").and_then(scalar_to_string);
        let data: PaystackData = if data.is_object() {
            serde_json::from_value(data)
                .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?
        } else {
            PaystackData::default()
        };

        let booking_reference = metadata_reference(&data.metadata)
            .or_else(|| data.reference.clone().filter(|r| !r.is_empty()))
            .or_else(|| data.transaction_reference.clone().filter(|r| !r.is_empty()))
            .ok_or_else(|| missing_reference(&self.event_type))?;

        Ok((
            PaymentDetails {
                booking_reference,
                provider_reference,
                amount_minor: data.amount,
                currency: data.currency.map(|c| c.to_uppercase()),
            },
            data.gateway_response,
        ))
    }
}

fn missing_reference(event_type: &str) -> WebhookError {
    WebhookError::MalformedPayload(format!("{event_type} event has no booking reference"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn stripe_body(event_type: &str, object: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": event_type,
            "created": 1_700_000_000,
            "data": { "object": object }
        }))
        .unwrap()
    }

    #[test]
    fn test_stripe_payment_succeeded() {
        let body = stripe_body(
            "payment_intent.succeeded",
            json!({
                "id": "pi_1",
                "amount": 4500,
                "currency": "ngn",
                "metadata": { "booking_reference": "BK-100" }
            }),
        );
        let inbound = InboundEvent::parse(Provider::Stripe, &body).unwrap();
        assert_eq!(inbound.event_id.to_string(), "stripe:evt_1");
        assert_eq!(
            inbound.classify().unwrap(),
            PaymentEvent::PaymentSucceeded(PaymentDetails {
                booking_reference: "BK-100".to_string(),
                provider_reference: Some("pi_1".to_string()),
                amount_minor: Some(4500),
                currency: Some("NGN".to_string()),
            })
        );
    }

    #[test]
    fn test_stripe_failure_reason() {
        let body = stripe_body(
            "payment_intent.payment_failed",
            json!({
                "id": "pi_2",
                "metadata": { "booking_reference": "BK-2" },
                "last_payment_error": { "message": "card declined" }
            }),
        );
        let event = InboundEvent::parse(Provider::Stripe, &body)
            .unwrap()
            .classify()
            .unwrap();
        match event {
            PaymentEvent::PaymentFailed { reason, details } => {
                assert_eq!(reason.as_deref(), Some("card declined"));
                assert_eq!(details.booking_reference, "BK-2");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_stripe_unknown_type() {
        let body = stripe_body("customer.created", json!({ "id": "cus_1" }));
        let event = InboundEvent::parse(Provider::Stripe, &body)
            .unwrap()
            .classify()
            .unwrap();
        assert_eq!(
            event,
            PaymentEvent::Unknown {
                event_type: "customer.created".to_string()
            }
        );
    }

    #[test]
    fn test_known_type_without_reference_is_malformed() {
        let body = stripe_body("charge.refunded", json!({ "id": "ch_1", "metadata": {} }));
        let inbound = InboundEvent::parse(Provider::Stripe, &body).unwrap();
        assert!(matches!(
            inbound.classify(),
            Err(WebhookError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_missing_id_rejected_at_parse() {
        let body = br#"{"type":"payment_intent.succeeded","data":{"object":{}}}"#;
        assert!(matches!(
            InboundEvent::parse(Provider::Stripe, body),
            Err(WebhookError::MalformedPayload(_))
        ));
        assert!(InboundEvent::parse(Provider::Stripe, b"not json").is_err());
    }

    #[test]
    fn test_paystack_reference_fallback() {
        let body = serde_json::to_vec(&json!({
            "event": "charge.success",
            "data": {
                "id": 302961,
                "reference": "BK-77",
                "amount": 10000,
                "currency": "NGN",
                "metadata": ""
            }
        }))
        .unwrap();
        let inbound = InboundEvent::parse(Provider::Paystack, &body).unwrap();
        assert_eq!(inbound.event_id.id, "charge.success:302961");
        let event = inbound.classify().unwrap();
        assert_eq!(event.details().unwrap().booking_reference, "BK-77");
        assert_eq!(event.details().unwrap().provider_reference.as_deref(), Some("302961"));
    }

    #[test]
    fn test_paystack_metadata_reference_wins() {
        let body = serde_json::to_vec(&json!({
            "event": "charge.failed",
            "data": {
                "id": "9",
                "reference": "psk-ref",
                "gateway_response": "Declined",
                "metadata": { "booking_reference": "BK-9" }
            }
        }))
        .unwrap();
        let event = InboundEvent::parse(Provider::Paystack, &body)
            .unwrap()
            .classify()
            .unwrap();
        assert_eq!(event.kind(), "payment_failed");
        assert_eq!(event.details().unwrap().booking_reference, "BK-9");
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!("paystack".parse::<Provider>().unwrap(), Provider::Paystack);
        assert!("paypal".parse::<Provider>().is_err());
    }
}
