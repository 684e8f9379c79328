use serde_json::Value;

/// The single synchronous call surface every outbound message goes through.
///
/// A call can fail in three ways: by returning `Err`, by panicking, or by
/// returning a reply whose `error` member is set (see [`reply_error`]). The
/// bridge translates all three into [`BridgeError::Downstream`].
///
/// [`BridgeError::Downstream`]: crate::BridgeError::Downstream
pub trait DownstreamChannel: Send + Sync + 'static {
    /// Deliver `payload` to `destination_id` and return the reply.
    fn call(&self, destination_id: &str, payload: Value) -> anyhow::Result<Value>;
}

impl<F> DownstreamChannel for F
where
    F: Fn(&str, Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn call(&self, destination_id: &str, payload: Value) -> anyhow::Result<Value> {
        self(destination_id, payload)
    }
}

/// Returns the error description carried by an error-shaped reply.
///
/// A reply is error-shaped when it is an object with a truthy `error`
/// member: anything but `null`, `false`, `0` or `""`. String errors are
/// returned verbatim, other values as their JSON text.
pub fn reply_error(reply: &Value) -> Option<String> {
    let error = reply.as_object()?.get("error")?;
    match error {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_replies_are_not_errors() {
        assert_eq!(reply_error(&json!({"op": "pong"})), None);
        assert_eq!(reply_error(&json!("error")), None);
        assert_eq!(reply_error(&json!(["error"])), None);
        assert_eq!(reply_error(&Value::Null), None);
    }

    #[test]
    fn falsy_error_members_are_ignored() {
        for falsy in [json!(null), json!(false), json!(0), json!(""), json!(0.0)] {
            assert_eq!(reply_error(&json!({ "error": falsy })), None, "{falsy}");
        }
    }

    #[test]
    fn string_error_is_taken_verbatim() {
        assert_eq!(
            reply_error(&json!({"error": "no such port"})),
            Some("no such port".to_string())
        );
    }

    #[test]
    fn other_truthy_errors_render_as_json() {
        assert_eq!(reply_error(&json!({"error": true})), Some("true".into()));
        assert_eq!(reply_error(&json!({"error": 7})), Some("7".into()));
        assert_eq!(
            reply_error(&json!({"error": {"code": -1}})),
            Some(r#"{"code":-1}"#.into())
        );
    }

    #[test]
    fn closures_are_channels() {
        let channel = |destination_id: &str, payload: Value| -> anyhow::Result<Value> {
            Ok(json!({ "to": destination_id, "payload": payload }))
        };
        let reply = DownstreamChannel::call(&channel, "peer-1", json!(1)).unwrap();
        assert_eq!(reply, json!({"to": "peer-1", "payload": 1}));
    }
}
