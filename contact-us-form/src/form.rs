use crate::email_address::EmailAddress;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

const FROM_NAME: &str = "fromName";
const FROM_EMAIL_ADDRESS: &str = "fromEmailAddress";
const SUBJECT: &str = "subject";
const MESSAGE: &str = "message";

const MAX_FROM_NAME_LENGTH: usize = 255;
const MAX_FROM_EMAIL_ADDRESS_LENGTH: usize = 255;
const MAX_SUBJECT_LENGTH: usize = 255;
const MAX_MESSAGE_LENGTH: usize = 2048;
const MAX_CAPTCHA_TOKEN_LENGTH: usize = 2048;

/// A contact form submission whose fields all passed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormInput {
    pub from_name: String,
    pub from_email_address: EmailAddress,
    pub subject: String,
    pub message: String,
    pub captcha_token: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("Request body is missing.")]
    MissingBody,
    #[error("Request body is malformed. Error parsing JSON.")]
    MalformedJson(String),
    #[error("Captcha token is missing from the request body.")]
    MissingCaptchaToken,
    #[error("{}", .0.join("\n"))]
    Invalid(Vec<String>),
}

impl FormError {
    /// Messages suitable for returning to the submitter, one per problem.
    pub fn messages(&self) -> Vec<String> {
        match self {
            FormError::Invalid(errors) => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}

impl FormInput {
    /// Parses a raw request body.
    ///
    /// When `captcha_field` is set, the body must carry a token under that key. Every invalid
    /// field is reported, not only the first one.
    pub fn parse(raw_body: Option<&str>, captcha_field: Option<&str>) -> Result<Self, FormError> {
        info!("Validating request body.");
        let Some(raw_body) = raw_body else {
            return Err(FormError::MissingBody);
        };
        let fields = match serde_json::from_str::<Value>(raw_body) {
            Ok(Value::Object(fields)) => fields,
            _ => return Err(FormError::MalformedJson(raw_body.into())),
        };
        if let Some(captcha_field) = captcha_field {
            if !fields.contains_key(captcha_field) {
                return Err(FormError::MissingCaptchaToken);
            }
        }

        let mut errors = Vec::new();
        let from_name = validate_string(&fields, FROM_NAME, MAX_FROM_NAME_LENGTH, &mut errors);
        let from_email_address = validate_string(
            &fields,
            FROM_EMAIL_ADDRESS,
            MAX_FROM_EMAIL_ADDRESS_LENGTH,
            &mut errors,
        )
        .and_then(|raw| match EmailAddress::parse(raw) {
            Ok(address) => Some(address),
            Err(_) => {
                errors.push(format!(
                    "Property \"{FROM_EMAIL_ADDRESS}\" must be a valid email address."
                ));
                None
            }
        });
        let subject = validate_string(&fields, SUBJECT, MAX_SUBJECT_LENGTH, &mut errors);
        let message = validate_string(&fields, MESSAGE, MAX_MESSAGE_LENGTH, &mut errors);
        let captcha_token = captcha_field.and_then(|captcha_field| {
            validate_string(&fields, captcha_field, MAX_CAPTCHA_TOKEN_LENGTH, &mut errors)
        });

        match (from_name, from_email_address, subject, message) {
            (Some(from_name), Some(from_email_address), Some(subject), Some(message))
                if errors.is_empty() =>
            {
                Ok(Self {
                    from_name,
                    from_email_address,
                    subject,
                    message,
                    captcha_token,
                })
            }
            _ => Err(FormError::Invalid(errors)),
        }
    }
}

fn validate_string(
    fields: &Map<String, Value>,
    name: &str,
    max_length: usize,
    errors: &mut Vec<String>,
) -> Option<String> {
    match fields.get(name) {
        None | Some(Value::Null) => {
            errors.push(format!("Property \"{name}\" is missing from the request body."));
            None
        }
        Some(Value::String(value)) if value.is_empty() => {
            errors.push(format!("Property \"{name}\" is missing from the request body."));
            None
        }
        Some(Value::String(value)) if value.chars().count() > max_length => {
            errors.push(format!(
                "Property \"{name}\" must be less than {} characters.",
                max_length + 1
            ));
            None
        }
        Some(Value::String(value)) => Some(value.clone()),
        Some(_) => {
            errors.push(format!("Property \"{name}\" must be a string."));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FormError, FormInput};
    use crate::email_address::EmailAddress;
    use googletest::prelude::*;
    use serde_json::{json, Value};

    const CAPTCHA_FIELD: &str = "cf-turnstile";

    fn valid_body() -> Value {
        json!({
            "fromName": "Dan",
            "fromEmailAddress": "danno@gmail.com",
            "subject": "Hello, World",
            "message": "Good morning",
            "cf-turnstile": "red-fox",
        })
    }

    fn with(mut body: Value, key: &str, value: Value) -> Value {
        body[key] = value;
        body
    }

    fn parse(
        body: &Value,
        captcha_field: Option<&str>,
    ) -> std::result::Result<FormInput, FormError> {
        FormInput::parse(Some(&body.to_string()), captcha_field)
    }

    #[test]
    fn parses_valid_body_verbatim() -> Result<()> {
        let result = parse(&valid_body(), Some(CAPTCHA_FIELD));

        verify_that!(
            result,
            ok(eq(FormInput {
                from_name: "Dan".into(),
                from_email_address: EmailAddress::parse("danno@gmail.com").unwrap(),
                subject: "Hello, World".into(),
                message: "Good morning".into(),
                captcha_token: Some("red-fox".into()),
            }))
        )
    }

    #[test]
    fn ignores_captcha_token_when_captcha_is_disabled() -> Result<()> {
        let result = parse(&valid_body(), None);

        verify_that!(
            result,
            ok(field!(FormInput.captcha_token, none()))
        )
    }

    #[test]
    fn ignores_unknown_fields() -> Result<()> {
        let body = with(valid_body(), "favouriteColour", json!("green"));

        verify_that!(parse(&body, None), ok(anything()))
    }

    #[test]
    fn accepts_fields_at_their_maximum_length() -> Result<()> {
        let body = with(valid_body(), "fromName", json!("n".repeat(255)));
        let body = with(body, "subject", json!("s".repeat(255)));
        let body = with(body, "message", json!("m".repeat(2048)));
        let body = with(body, CAPTCHA_FIELD, json!("t".repeat(2048)));

        verify_that!(parse(&body, Some(CAPTCHA_FIELD)), ok(anything()))
    }

    #[test]
    fn measures_length_in_characters() -> Result<()> {
        let body = with(valid_body(), "fromName", json!("é".repeat(255)));

        verify_that!(parse(&body, None), ok(anything()))
    }

    #[test]
    fn fails_when_body_is_missing() -> Result<()> {
        verify_that!(
            FormInput::parse(None, None),
            err(eq(FormError::MissingBody))
        )
    }

    #[test]
    fn fails_when_body_is_not_json() -> Result<()> {
        verify_that!(
            FormInput::parse(Some("{not json"), None),
            err(eq(FormError::MalformedJson("{not json".into())))
        )
    }

    #[test]
    fn fails_when_body_is_not_an_object() -> Result<()> {
        verify_that!(
            FormInput::parse(Some("[1, 2, 3]"), None),
            err(matches_pattern!(FormError::MalformedJson(anything())))
        )
    }

    #[test]
    fn fails_when_captcha_field_is_absent_before_checking_other_fields() -> Result<()> {
        let body = json!({ "fromName": 7 });

        verify_that!(
            parse(&body, Some(CAPTCHA_FIELD)),
            err(eq(FormError::MissingCaptchaToken))
        )
    }

    #[test]
    fn reports_empty_captcha_token_as_field_error() -> Result<()> {
        let body = with(valid_body(), CAPTCHA_FIELD, json!(""));

        verify_that!(
            parse(&body, Some(CAPTCHA_FIELD)),
            err(eq(FormError::Invalid(vec![
                "Property \"cf-turnstile\" is missing from the request body.".into()
            ])))
        )
    }

    #[test]
    fn reports_every_empty_field() -> Result<()> {
        let body = json!({
            "fromName": "",
            "fromEmailAddress": "",
            "subject": "",
            "message": "",
        });

        verify_that!(
            parse(&body, None),
            err(eq(FormError::Invalid(vec![
                "Property \"fromName\" is missing from the request body.".into(),
                "Property \"fromEmailAddress\" is missing from the request body.".into(),
                "Property \"subject\" is missing from the request body.".into(),
                "Property \"message\" is missing from the request body.".into(),
            ])))
        )
    }

    #[test]
    fn reports_missing_and_null_fields() -> Result<()> {
        let body = json!({ "fromName": null });

        verify_that!(
            parse(&body, None),
            err(matches_pattern!(FormError::Invalid(len(eq(4)))))
        )
    }

    #[test]
    fn reports_non_string_values_without_coercion() -> Result<()> {
        let body = json!({
            "fromName": 1,
            "fromEmailAddress": 2,
            "subject": true,
            "message": ["Good morning"],
        });

        verify_that!(
            parse(&body, None),
            err(eq(FormError::Invalid(vec![
                "Property \"fromName\" must be a string.".into(),
                "Property \"fromEmailAddress\" must be a string.".into(),
                "Property \"subject\" must be a string.".into(),
                "Property \"message\" must be a string.".into(),
            ])))
        )
    }

    #[test]
    fn enforces_max_lengths() -> Result<()> {
        let body = json!({
            "fromName": "n".repeat(256),
            "fromEmailAddress": format!("{}@gmail.com", "e".repeat(250)),
            "subject": "s".repeat(256),
            "message": "m".repeat(2049),
        });

        verify_that!(
            parse(&body, None),
            err(eq(FormError::Invalid(vec![
                "Property \"fromName\" must be less than 256 characters.".into(),
                "Property \"fromEmailAddress\" must be less than 256 characters.".into(),
                "Property \"subject\" must be less than 256 characters.".into(),
                "Property \"message\" must be less than 2049 characters.".into(),
            ])))
        )
    }

    #[test]
    fn enforces_captcha_token_max_length() -> Result<()> {
        let body = with(valid_body(), CAPTCHA_FIELD, json!("t".repeat(2049)));

        verify_that!(
            parse(&body, Some(CAPTCHA_FIELD)),
            err(eq(FormError::Invalid(vec![
                "Property \"cf-turnstile\" must be less than 2049 characters.".into()
            ])))
        )
    }

    #[test]
    fn reports_malformed_email_address() -> Result<()> {
        let body = with(valid_body(), "fromEmailAddress", json!("danno@@gmail.com"));

        verify_that!(
            parse(&body, None),
            err(eq(FormError::Invalid(vec![
                "Property \"fromEmailAddress\" must be a valid email address.".into()
            ])))
        )
    }

    #[test]
    fn reports_same_errors_when_parsed_again() -> Result<()> {
        let body = json!({ "fromName": 3, "message": "" });

        let first = parse(&body, None);
        let second = parse(&body, None);

        verify_that!(first, eq(second))
    }

    #[test]
    fn messages_of_field_errors_are_the_field_errors() -> Result<()> {
        let error = FormError::Invalid(vec!["one".into(), "two".into()]);

        verify_that!(error.messages(), elements_are![eq("one"), eq("two")])
    }

    #[test]
    fn messages_of_malformed_json_do_not_echo_the_body() -> Result<()> {
        let error = FormError::MalformedJson("<script>".into());

        verify_that!(
            error.messages(),
            elements_are![eq("Request body is malformed. Error parsing JSON.")]
        )
    }
}
