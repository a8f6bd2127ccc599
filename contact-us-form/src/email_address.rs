use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

const MAX_LOCAL_PART_LENGTH: usize = 64;
const MAX_DOMAIN_LENGTH: usize = 255;
const MAX_DOMAIN_LABEL_LENGTH: usize = 63;

static EMAIL_ADDRESS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[-!#$%&'*+/0-9=?A-Z^_a-z`{|}~](\.?[-!#$%&'*+/0-9=?A-Z^_a-z`{|}~])*@[a-zA-Z0-9](-*\.?[a-zA-Z0-9])*\.[a-zA-Z](-?[a-zA-Z0-9])+$",
    )
    .unwrap()
});

/// A syntactically valid email address.
///
/// There is intentionally no `Display` implementation: callers have to ask for the string with
/// [`EmailAddress::as_str`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailAddress(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Email address {0} is not valid.")]
pub struct InvalidEmailAddress(pub String);

impl EmailAddress {
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidEmailAddress> {
        let raw = raw.into();
        if is_well_formed(&raw) {
            Ok(Self(raw))
        } else {
            Err(InvalidEmailAddress(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn domain(&self) -> &str {
        self.0
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or_default()
    }
}

fn is_well_formed(raw: &str) -> bool {
    let Some((local_part, domain)) = raw.split_once('@') else {
        return false;
    };
    if local_part.len() > MAX_LOCAL_PART_LENGTH || domain.len() > MAX_DOMAIN_LENGTH {
        return false;
    }
    if domain
        .split('.')
        .any(|label| label.len() > MAX_DOMAIN_LABEL_LENGTH)
    {
        return false;
    }
    EMAIL_ADDRESS_REGEX.is_match(raw)
}
