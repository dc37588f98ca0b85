//! Reply values returned by the execute capability.

/// A value returned from Redis.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value (missing key, Lua `false`/`nil` over RESP2)
    Null,
    /// Simple string (status replies like "OK")
    Status(String),
    /// Bulk string (actual data)
    Bulk(Vec<u8>),
    /// Integer
    Integer(i64),
    /// Boolean (RESP3)
    Boolean(bool),
    /// Double (RESP3)
    Double(f64),
    /// Array of values
    Array(Vec<Value>),
    /// Map of key-value pairs (RESP3)
    Map(Vec<(Value, Value)>),
    /// Error reply
    Error(String),
}

impl Value {
    /// Build a bulk value from anything string-like.
    pub fn bulk(data: impl AsRef<[u8]>) -> Self {
        Value::Bulk(data.as_ref().to_vec())
    }

    /// Try to get as string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Status(s) => Some(s),
            Value::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Try to get as integer.
    ///
    /// Bulk strings holding a decimal integer are accepted, since Lua
    /// scripts and hash fields hand numbers back as strings.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Bulk(_) | Value::Status(_) => self.as_str()?.trim().parse().ok(),
            _ => None,
        }
    }

    /// Render a scalar reply as text. Aggregates and nulls yield `None`.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Status(s) => Some(s.clone()),
            Value::Bulk(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Double(d) => Some(d.to_string()),
            Value::Boolean(b) => Some(if *b { "1" } else { "0" }.to_string()),
            _ => None,
        }
    }

    /// Check if null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if error.
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_int_accepts_bulk_digits() {
        assert_eq!(Value::bulk("42").as_int(), Some(42));
        assert_eq!(Value::Integer(-3).as_int(), Some(-3));
        assert_eq!(Value::bulk("4.5").as_int(), None);
        assert_eq!(Value::Null.as_int(), None);
    }

    #[test]
    fn test_to_text() {
        assert_eq!(Value::bulk("abc").to_text(), Some("abc".to_string()));
        assert_eq!(Value::Integer(7).to_text(), Some("7".to_string()));
        assert_eq!(Value::Null.to_text(), None);
        assert_eq!(Value::Array(vec![]).to_text(), None);
    }
}
