use serde_json::Value;

/// Masks payment instruments and credentials in JSON payloads before logging.
pub fn sanitize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sanitized = serde_json::Map::new();
            for (key, val) in map {
                let sanitized_val = if is_sensitive_field(key) {
                    mask_value(val)
                } else {
                    sanitize_json(val)
                };
                sanitized.insert(key.clone(), sanitized_val);
            }
            Value::Object(sanitized)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sanitize_json).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_field(key: &str) -> bool {
    matches!(
        key.to_lowercase().as_str(),
        "payment_method"
            | "client_secret"
            | "password"
            | "secret"
            | "token"
            | "api_key"
            | "authorization"
    )
}

fn mask_value(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > 8 => {
            let chars: Vec<char> = s.chars().collect();
            let visible: String = chars[..4].iter().collect();
            let end: String = chars[chars.len() - 4..].iter().collect();
            Value::String(format!("{}****{}", visible, end))
        }
        _ => Value::String("****".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_payment_method() {
        let input = json!({
            "payment_method": "pm_card_visa_4242",
            "amount": 2000
        });

        let sanitized = sanitize_json(&input);
        let method = sanitized["payment_method"].as_str().unwrap();

        assert_eq!(method, "pm_c****4242");
        assert_eq!(sanitized["amount"], 2000);
    }

    #[test]
    fn test_sanitize_nested_and_short() {
        let input = json!({
            "data": {
                "object": { "client_secret": "pi_1_secret_abc", "id": "pi_1" },
                "token": "tok"
            }
        });

        let sanitized = sanitize_json(&input);
        assert!(sanitized["data"]["object"]["client_secret"]
            .as_str()
            .unwrap()
            .contains("****"));
        assert_eq!(sanitized["data"]["object"]["id"], "pi_1");
        assert_eq!(sanitized["data"]["token"], "****");
    }
}
