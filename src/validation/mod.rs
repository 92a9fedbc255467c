use garde::Validate;

use crate::error::{AppError, Result, Violation};

/// Validates a request payload, turning every failed rule into a field-level violation.
///
/// Field names are reported in the camelCase form clients send.
pub fn validate<T>(payload: &T) -> Result<()>
where
    T: Validate,
    T::Context: Default,
{
    let Err(report) = payload.validate() else {
        return Ok(());
    };

    let violations: Vec<Violation> = report
        .iter()
        .map(|(path, error)| Violation {
            field: camel_case(&path.to_string()),
            message: error.message().to_string(),
        })
        .collect();

    let message = violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ");

    tracing::debug!("Payload rejected: {}", message);
    Err(AppError::Validation { message, violations })
}

fn camel_case(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut upper = false;
    for c in path.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Validate)]
    struct Signup {
        #[garde(email)]
        email: String,
        #[garde(length(chars, min = 32))]
        session_key: String,
    }

    #[test]
    fn test_valid_payload_passes() {
        let payload = Signup {
            email: "ada@example.com".to_string(),
            session_key: "k".repeat(32),
        };
        assert!(validate(&payload).is_ok());
    }

    #[test]
    fn test_violations_use_client_field_names() {
        let payload = Signup {
            email: "nope".to_string(),
            session_key: "short".to_string(),
        };

        let Err(AppError::Validation { violations, .. }) = validate(&payload) else {
            panic!("expected a validation error");
        };
        let fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
        assert!(fields.contains(&"email"));
        assert!(fields.contains(&"sessionKey"));
    }
}
