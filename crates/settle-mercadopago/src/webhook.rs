//! # MercadoPago Notifications
//!
//! Parsing of payment notifications and the optional `x-signature` check.
//!
//! MercadoPago delivers the same event in several shapes:
//!
//! - JSON body `{"type": "payment", "data": {"id": "123"}}` (webhooks)
//! - JSON body `{"topic": "payment", "resource": ".../v1/payments/123"}` (legacy IPN)
//! - Query string `?type=payment&data.id=123` or `?topic=payment&id=123`
//!
//! Only the payment id is taken from a notification. Status and amounts are
//! always fetched from the API afterwards.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use settle_core::{InboundNotification, Notification, PaymentError, PaymentResult};
use tracing::{debug, warn};

/// Longest payment id accepted from a notification
pub const MAX_PAYMENT_ID_LEN: usize = 64;

/// 1-64 ASCII alphanumerics
pub fn is_valid_payment_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_PAYMENT_ID_LEN && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Topic and id as found in the notification, before validation
#[derive(Debug, Default, PartialEq, Eq)]
struct RawNotification {
    topic: Option<String>,
    id: Option<String>,
}

fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Legacy `resource` is either a bare id or a URL ending in one
fn id_from_resource(resource: &str) -> String {
    resource
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(resource)
        .to_string()
}

fn from_body(body: &[u8]) -> RawNotification {
    let Ok(json) = serde_json::from_slice::<Value>(body) else {
        return RawNotification::default();
    };

    let topic = json
        .get("type")
        .or_else(|| json.get("topic"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let id = json
        .get("data")
        .and_then(|data| data.get("id"))
        .and_then(value_as_id)
        .or_else(|| {
            json.get("resource")
                .and_then(Value::as_str)
                .map(id_from_resource)
        })
        .or_else(|| json.get("id").and_then(value_as_id));

    RawNotification { topic, id }
}

fn from_query(inbound: &InboundNotification) -> RawNotification {
    let query = &inbound.query;
    RawNotification {
        topic: query.get("type").or_else(|| query.get("topic")).cloned(),
        id: query.get("data.id").or_else(|| query.get("id")).cloned(),
    }
}

/// Extract the payment id a notification refers to.
///
/// Body fields win over query fields. Non-payment topics and malformed ids
/// are reported as [`Notification::Ignored`].
pub fn extract_payment_id(inbound: &InboundNotification) -> Notification {
    let body = from_body(&inbound.body);
    let query = from_query(inbound);

    let topic = body.topic.or(query.topic);
    if let Some(topic) = topic.as_deref() {
        if topic != "payment" {
            debug!(topic, "non-payment notification");
            return Notification::Ignored {
                reason: format!("topic {} is not handled", topic),
            };
        }
    }

    match body.id.or(query.id) {
        Some(id) if is_valid_payment_id(&id) => Notification::Payment { payment_id: id },
        Some(id) => {
            warn!(id_len = id.len(), "malformed payment id in notification");
            Notification::Ignored {
                reason: "malformed payment id".to_string(),
            }
        }
        None => Notification::Ignored {
            reason: "no payment id".to_string(),
        },
    }
}

// =============================================================================
// Signature Verification
// =============================================================================

struct SignatureHeader {
    timestamp: String,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> PaymentResult<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "ts" => timestamp = Some(value.to_string()),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        PaymentError::VerificationFailed("Missing ts in x-signature".to_string())
    })?;

    if signatures.is_empty() {
        return Err(PaymentError::VerificationFailed(
            "No v1 signature found".to_string(),
        ));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

/// `id:{data.id};request-id:{x-request-id};ts:{ts};` with absent parts left out
pub fn signature_manifest(data_id: &str, request_id: Option<&str>, ts: &str) -> String {
    let mut manifest = String::new();
    if !data_id.is_empty() {
        manifest.push_str(&format!("id:{};", data_id.to_ascii_lowercase()));
    }
    if let Some(request_id) = request_id.filter(|r| !r.is_empty()) {
        manifest.push_str(&format!("request-id:{};", request_id));
    }
    manifest.push_str(&format!("ts:{};", ts));
    manifest
}

pub(crate) fn compute_hmac_sha256(secret: &str, message: &str) -> PaymentResult<String> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::Configuration(format!("invalid webhook secret: {}", e)))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// `ts` values above this are milliseconds since the epoch, seconds otherwise
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

fn check_freshness(ts: &str, tolerance: Duration, now: DateTime<Utc>) -> PaymentResult<()> {
    let raw: i64 = ts.trim().parse().map_err(|_| {
        PaymentError::VerificationFailed("Invalid ts in x-signature".to_string())
    })?;
    let signed_at_ms = if raw > MILLIS_THRESHOLD {
        raw
    } else {
        raw.saturating_mul(1000)
    };
    let skew_ms = now.timestamp_millis().saturating_sub(signed_at_ms).unsigned_abs();
    if u128::from(skew_ms) > tolerance.as_millis() {
        return Err(PaymentError::VerificationFailed(
            "Stale signature timestamp".to_string(),
        ));
    }
    Ok(())
}

/// Check the `x-signature` header of a notification for `payment_id`.
///
/// With a `tolerance`, the signed `ts` must also be within that distance of now.
pub fn verify_signature(
    inbound: &InboundNotification,
    payment_id: &str,
    secret: &str,
    tolerance: Option<Duration>,
) -> PaymentResult<()> {
    verify_signature_at(inbound, payment_id, secret, tolerance, Utc::now())
}

pub fn verify_signature_at(
    inbound: &InboundNotification,
    payment_id: &str,
    secret: &str,
    tolerance: Option<Duration>,
    now: DateTime<Utc>,
) -> PaymentResult<()> {
    let header = inbound
        .header("x-signature")
        .ok_or_else(|| PaymentError::VerificationFailed("Missing x-signature".to_string()))?;
    let parsed = parse_signature_header(header)?;

    // The signed id is the query-string one when present.
    let data_id = inbound
        .query
        .get("data.id")
        .map(String::as_str)
        .unwrap_or(payment_id);
    let manifest = signature_manifest(data_id, inbound.header("x-request-id"), &parsed.timestamp);
    let expected = compute_hmac_sha256(secret, &manifest)?;

    if !parsed
        .signatures
        .iter()
        .any(|sig| constant_time_compare(sig, &expected))
    {
        return Err(PaymentError::VerificationFailed(
            "Signature mismatch".to_string(),
        ));
    }

    match tolerance {
        Some(tolerance) => check_freshness(&parsed.timestamp, tolerance, now),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn with_body(body: Value) -> InboundNotification {
        InboundNotification {
            body: serde_json::to_vec(&body).unwrap(),
            ..Default::default()
        }
    }

    fn with_query(pairs: &[(&str, &str)]) -> InboundNotification {
        InboundNotification {
            query: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    fn payment(id: &str) -> Notification {
        Notification::Payment {
            payment_id: id.to_string(),
        }
    }

    #[test]
    fn test_webhook_body_with_string_or_numeric_id() {
        let inbound = with_body(json!({"type": "payment", "action": "payment.created", "data": {"id": "144728647320"}}));
        assert_eq!(extract_payment_id(&inbound), payment("144728647320"));

        let inbound = with_body(json!({"type": "payment", "data": {"id": 144728647320u64}}));
        assert_eq!(extract_payment_id(&inbound), payment("144728647320"));
    }

    #[test]
    fn test_legacy_ipn_resource() {
        let inbound = with_body(json!({
            "topic": "payment",
            "resource": "https://api.mercadolibre.com/collections/notifications/144728647320"
        }));
        assert_eq!(extract_payment_id(&inbound), payment("144728647320"));

        let inbound = with_body(json!({"topic": "payment", "resource": "987"}));
        assert_eq!(extract_payment_id(&inbound), payment("987"));
    }

    #[test]
    fn test_query_string_forms() {
        let inbound = with_query(&[("type", "payment"), ("data.id", "111")]);
        assert_eq!(extract_payment_id(&inbound), payment("111"));

        let inbound = with_query(&[("topic", "payment"), ("id", "222")]);
        assert_eq!(extract_payment_id(&inbound), payment("222"));
    }

    #[test]
    fn test_other_topics_and_bad_ids_ignored() {
        let inbound = with_body(json!({"topic": "merchant_order", "resource": "123"}));
        assert!(matches!(extract_payment_id(&inbound), Notification::Ignored { .. }));

        let inbound = with_body(json!({"type": "payment", "data": {"id": "12; DROP TABLE"}}));
        assert!(matches!(extract_payment_id(&inbound), Notification::Ignored { .. }));

        let too_long = "9".repeat(65);
        let inbound = with_query(&[("type", "payment"), ("data.id", too_long.as_str())]);
        assert!(matches!(extract_payment_id(&inbound), Notification::Ignored { .. }));

        assert!(matches!(
            extract_payment_id(&InboundNotification::default()),
            Notification::Ignored { .. }
        ));
    }

    #[test]
    fn test_manifest_layout() {
        assert_eq!(
            signature_manifest("ABC123", Some("req-1"), "1700000000"),
            "id:abc123;request-id:req-1;ts:1700000000;"
        );
        assert_eq!(signature_manifest("1", None, "5"), "id:1;ts:5;");
    }

    fn signed(secret: &str, data_id: &str, ts: &str) -> InboundNotification {
        let manifest = signature_manifest(data_id, Some("req-9"), ts);
        let sig = compute_hmac_sha256(secret, &manifest).unwrap();
        assert_eq!(sig.len(), 64);

        let mut inbound = with_query(&[("type", "payment"), ("data.id", data_id)]);
        inbound
            .headers
            .insert("x-signature".to_string(), format!("ts={},v1={}", ts, sig));
        inbound
            .headers
            .insert("x-request-id".to_string(), "req-9".to_string());
        inbound
    }

    const FIVE_MINUTES: Option<Duration> = Some(Duration::from_secs(300));

    #[test]
    fn test_signature_round_trip() {
        let secret = "webhook-secret";
        let ts = Utc::now().timestamp().to_string();
        let mut inbound = signed(secret, "144728647320", &ts);

        assert!(verify_signature(&inbound, "144728647320", secret, FIVE_MINUTES).is_ok());
        assert!(verify_signature(&inbound, "144728647320", "other-secret", FIVE_MINUTES).is_err());

        inbound.headers.remove("x-signature");
        assert!(verify_signature(&inbound, "144728647320", secret, FIVE_MINUTES).is_err());
    }

    #[test]
    fn test_replayed_signature_outside_tolerance_rejected() {
        let secret = "webhook-secret";
        let now = Utc::now();
        let old_ts = (now.timestamp() - 600).to_string();
        let inbound = signed(secret, "144728647320", &old_ts);

        let err = verify_signature_at(&inbound, "144728647320", secret, FIVE_MINUTES, now).unwrap_err();
        assert!(matches!(err, PaymentError::VerificationFailed(ref m) if m.contains("Stale")));

        // Freshness check disabled
        assert!(verify_signature_at(&inbound, "144728647320", secret, None, now).is_ok());

        // Future-dated beyond tolerance
        let future_ts = (now.timestamp() + 600).to_string();
        let inbound = signed(secret, "144728647320", &future_ts);
        assert!(verify_signature_at(&inbound, "144728647320", secret, FIVE_MINUTES, now).is_err());
    }

    #[test]
    fn test_millisecond_timestamps_accepted() {
        let secret = "webhook-secret";
        let now = Utc::now();
        let ts = (now.timestamp_millis() - 30_000).to_string();
        let inbound = signed(secret, "144728647320", &ts);

        assert!(verify_signature_at(&inbound, "144728647320", secret, FIVE_MINUTES, now).is_ok());
    }

    #[test]
    fn test_parse_signature_header() {
        let parsed = parse_signature_header("ts=1234567890, v1=abc123").unwrap();
        assert_eq!(parsed.timestamp, "1234567890");
        assert_eq!(parsed.signatures, vec!["abc123".to_string()]);

        assert!(parse_signature_header("v1=abc").is_err());
        assert!(parse_signature_header("ts=1").is_err());
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc123", "abc123"));
        assert!(!constant_time_compare("abc123", "abc124"));
        assert!(!constant_time_compare("abc", "abcd"));
    }
}
