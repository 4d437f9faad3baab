use evalctl_types::EvaluationEvent;
use serde_json::Value;

/// Flip the anomaly marker on an event's payload (§4.8 step 2: "append the
/// event to the log with an anomaly flag"). Non-destructive: if the
/// payload was `null`, it becomes `{"is_anomaly": true}`; if it was
/// already an object, the key is merged in.
pub fn mark_anomaly(event: &mut EvaluationEvent) {
    match &mut event.payload {
        Value::Object(map) => {
            map.insert("is_anomaly".to_string(), Value::Bool(true));
        }
        other => {
            let mut map = serde_json::Map::new();
            if !other.is_null() {
                map.insert("value".to_string(), other.clone());
            }
            map.insert("is_anomaly".to_string(), Value::Bool(true));
            *other = Value::Object(map);
        }
    }
}

/// `true` if [`mark_anomaly`] was applied to this event.
pub fn is_anomaly(event: &EvaluationEvent) -> bool {
    event
        .payload
        .get("is_anomaly")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use evalctl_types::{EvalId, EventKind};

    use super::*;

    #[test]
    fn mark_then_read_round_trips() {
        let mut event = EvaluationEvent::new(EvalId::generate(), EventKind::Completed, "evalctl-projection");
        assert!(!is_anomaly(&event));
        mark_anomaly(&mut event);
        assert!(is_anomaly(&event));
    }
}
