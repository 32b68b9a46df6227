//! Token claims.

use std::collections::HashMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};

/// Errors while interacting with claims.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum Error {
    #[error("claim not present")]
    MissingClaim,
    #[error("cannot set registered claim as custom")]
    RegisteredClaim,
    #[error("cannot serialize value as json")]
    SerializeError,
    #[error("claim in unexpected format")]
    InvalidClaimFormat,
}

/// Registered claims. These can only be modified through the provided
/// setters, which keep the time claims in RFC3339 format.
pub const REGISTERED_CLAIMS: [&str; 7] = ["iss", "sub", "aud", "exp", "nbf", "iat", "jti"];

/// A collection of claims for a token.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Claims(HashMap<String, Value>);

impl Claims {
    /// Create a new set of claims valid from now for `lifetime`. This sets
    /// "Not Before" and "Issued At" to the current time and "Expiration" to
    /// the current time plus `lifetime`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerializeError`] if the expiration can't be
    /// represented.
    ///
    /// # Examples
    ///
    /// ```
    /// # use doorman::token::claims::{Claims, Error};
    /// # use serde_json::Value;
    /// # use time::Duration;
    /// # fn try_main() -> Result<(), Error> {
    /// let claims = Claims::issued_now(Duration::hours(1))?
    ///     .with_custom_claim("name", "User")?;
    ///
    /// assert_eq!(claims.get("name").and_then(Value::as_str), Some("User"));
    /// assert!(claims.expiration().unwrap() > claims.issued_at().unwrap());
    /// #     Ok(())
    /// # }
    /// # fn main() { try_main().unwrap(); }
    /// ```
    pub fn issued_now(lifetime: Duration) -> Result<Self, Error> {
        let iat = OffsetDateTime::now_utc();
        let exp = iat.checked_add(lifetime).ok_or(Error::SerializeError)?;

        Self(HashMap::new())
            .with_expiration(&exp)?
            .with_not_before(&iat)?
            .with_issued_at(&iat)
    }

    /// Get the JSON value of a claim.
    ///
    /// Returns [`None`] if the claim is not set.
    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.0.get(claim)
    }

    /// Deserialize a claim into `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the claim is missing or doesn't deserialize.
    pub fn get_as<T>(&self, claim: &str) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let value = self.get(claim).ok_or(Error::MissingClaim)?;

        T::deserialize(value).map_err(|_| Error::InvalidClaimFormat)
    }

    fn set_unchecked<V>(&mut self, claim: &str, value: V) -> Result<(), Error>
    where
        V: Serialize,
    {
        let value = serde_json::to_value(value).map_err(|_| Error::SerializeError)?;
        self.0.insert(claim.to_string(), value);

        Ok(())
    }

    /// Set a non-registered claim to a JSON-serializable value.
    ///
    /// # Errors
    ///
    /// Returns an error when attempting to set a registered claim or when the
    /// provided value can't be serialized to JSON.
    pub fn with_custom_claim<V>(mut self, claim: &str, value: V) -> Result<Self, Error>
    where
        V: Serialize,
    {
        if REGISTERED_CLAIMS.contains(&claim) {
            Err(Error::RegisteredClaim)
        } else {
            self.set_unchecked(claim, value)?;

            Ok(self)
        }
    }

    /// Get the token expiration date.
    ///
    /// Returns [`None`] if the expiration date is not set or malformed.
    pub fn expiration(&self) -> Option<OffsetDateTime> {
        self.time_claim("exp")
    }

    /// Get the token not before date.
    pub fn not_before(&self) -> Option<OffsetDateTime> {
        self.time_claim("nbf")
    }

    /// Get the token issued at date.
    pub fn issued_at(&self) -> Option<OffsetDateTime> {
        self.time_claim("iat")
    }

    fn time_claim(&self, claim: &str) -> Option<OffsetDateTime> {
        self.get(claim)
            .and_then(Value::as_str)
            .and_then(|t| OffsetDateTime::parse(t, &Rfc3339).ok())
    }

    /// Set the token expiration date.
    ///
    /// # Errors
    ///
    /// Will return an error if the provided OffsetDateTime cannot be
    /// represented as an RFC3339 timestamp.
    pub fn with_expiration(mut self, exp: &OffsetDateTime) -> Result<Self, Error> {
        self.set_unchecked("exp", format_time(exp)?)?;

        Ok(self)
    }

    /// Set the token not before date.
    pub fn with_not_before(mut self, nbf: &OffsetDateTime) -> Result<Self, Error> {
        self.set_unchecked("nbf", format_time(nbf)?)?;

        Ok(self)
    }

    /// Set the token issued at date.
    pub fn with_issued_at(mut self, iat: &OffsetDateTime) -> Result<Self, Error> {
        self.set_unchecked("iat", format_time(iat)?)?;

        Ok(self)
    }
}

fn format_time(time: &OffsetDateTime) -> Result<String, Error> {
    time.format(&Rfc3339).map_err(|_| Error::SerializeError)
}

type Rule = Box<dyn Fn(&Claims) -> bool + Send + Sync>;

/// A collection of rules to validate a set of claims against.
pub struct ClaimsValidator(Vec<Rule>);

impl ClaimsValidator {
    /// Create a claims validator. By default, the validator will check that
    /// "Not Before" is set and before the current time, "Issued At" is set
    /// and before the current time, and "Expiration" is set and after the
    /// current time.
    pub fn new() -> Self {
        Self(Vec::new()).with_rule(time_rule)
    }

    /// Add a new rule to a claims validator.
    pub fn with_rule<F>(mut self, rule: F) -> Self
    where
        F: Fn(&Claims) -> bool + Send + Sync + 'static,
    {
        self.0.push(Box::new(rule));

        self
    }

    /// Validate a set of claims with a claims validator.
    pub fn validate(&self, claims: &Claims) -> bool {
        self.0.iter().all(|rule| rule(claims))
    }
}

impl Default for ClaimsValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn time_rule(claims: &Claims) -> bool {
    match (claims.expiration(), claims.not_before(), claims.issued_at()) {
        (Some(exp), Some(nbf), Some(iat)) => {
            let now = OffsetDateTime::now_utc();

            exp >= now && nbf <= now && iat <= now
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_claims() {
        let now = OffsetDateTime::now_utc();
        let now_offset = now + Duration::days(14);

        let claims = Claims::issued_now(Duration::days(14)).expect("build claims");
        let exp = claims.expiration().expect("get expiration claim");
        let nbf = claims.not_before().expect("get not before claim");
        let iat = claims.issued_at().expect("get issued at claim");

        // now is taken at a slightly different time from when the claims are
        // generated, so use a 1 second threshold
        assert!(exp >= now_offset && exp - now_offset < Duration::seconds(1));
        assert!(nbf >= now && nbf - now < Duration::seconds(1));
        assert!(iat >= now && iat - now < Duration::seconds(1));
    }

    #[test]
    fn unrepresentable_expiration() {
        assert_eq!(
            Claims::issued_now(Duration::seconds(300_000_000_000)),
            Err(Error::SerializeError)
        );
        assert_eq!(
            Claims::issued_now(Duration::MAX),
            Err(Error::SerializeError)
        );
    }

    #[test]
    fn custom_claims() {
        let claims = Claims::issued_now(Duration::hours(1))
            .expect("build claims")
            .with_custom_claim("hello", "world")
            .expect("set custom claim");

        assert_eq!(
            claims.clone().with_custom_claim("exp", "never"),
            Err(Error::RegisteredClaim)
        );

        assert_eq!(claims.get("hello").expect("get custom claim"), "world");
        assert_eq!(claims.get_as::<String>("hello"), Ok("world".to_string()));
        assert_eq!(claims.get_as::<u32>("hello"), Err(Error::InvalidClaimFormat));
        assert_eq!(claims.get_as::<String>("nope"), Err(Error::MissingClaim));
    }

    #[test]
    fn validation() {
        let validator = ClaimsValidator::new();

        let normal = Claims::issued_now(Duration::hours(1)).expect("build claims");
        assert!(validator.validate(&normal));

        let bad_exp = normal
            .clone()
            .with_expiration(&OffsetDateTime::UNIX_EPOCH)
            .expect("set expiration");
        assert!(!validator.validate(&bad_exp));

        let later = OffsetDateTime::now_utc() + Duration::hours(1);

        let bad_nbf = normal.clone().with_not_before(&later).expect("set not before");
        assert!(!validator.validate(&bad_nbf));

        let bad_iat = normal.clone().with_issued_at(&later).expect("set issued at");
        assert!(!validator.validate(&bad_iat));

        let mut missing = normal.clone();
        missing.0.remove("nbf");
        assert!(!validator.validate(&missing));
    }

    #[test]
    fn extra_rules() {
        let validator = ClaimsValidator::new().with_rule(|c| c.get("session").is_some());

        let plain = Claims::issued_now(Duration::hours(1)).expect("build claims");
        assert!(!validator.validate(&plain));

        let with_session = plain
            .with_custom_claim("session", serde_json::json!({}))
            .expect("set custom claim");
        assert!(validator.validate(&with_session));
    }
}
