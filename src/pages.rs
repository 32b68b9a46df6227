//! HTML pages.

use crate::oidc::{IdentityClaims, OAuthError};

use handlebars::{Handlebars, RenderError, TemplateError};
use serde_json::json;

const HOME: &str = "home";
const ERROR: &str = "error";

/// The compiled page templates. Values are HTML-escaped when rendered.
#[derive(Clone, Debug)]
pub struct Pages(Handlebars<'static>);

impl Pages {
    pub fn new() -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();

        registry.register_template_string(HOME, include_str!("../templates/home.hbs"))?;
        registry.register_template_string(ERROR, include_str!("../templates/error.hbs"))?;

        Ok(Self(registry))
    }

    /// The home page: the user's claims and a logout link, or a login link.
    pub fn home(&self, user: Option<&IdentityClaims>) -> Result<String, RenderError> {
        // a map of JSON values always serializes
        let claims = user.map(|u| serde_json::to_string_pretty(&u.claims).unwrap_or_default());

        self.0.render(HOME, &json!({ "user": user, "claims": claims }))
    }

    /// The page shown when a login attempt fails.
    pub fn error(&self, error: &OAuthError) -> Result<String, RenderError> {
        self.0.render(
            ERROR,
            &json!({
                "reason": error.to_string(),
                "description": error.description(),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::Value;

    fn user(claims: Value) -> IdentityClaims {
        let Some(claims) = claims.as_object().cloned() else {
            panic!("not an object")
        };

        IdentityClaims::from_claims(claims).expect("claims with subject")
    }

    #[test]
    fn anonymous_home() {
        let page = Pages::new().expect("templates").home(None).expect("render");

        assert!(page.contains(r#"<a href="/login">login</a>"#));
        assert!(!page.contains("/logout"));
        assert!(!page.contains("<dl>"));
    }

    #[test]
    fn user_home() {
        let user = user(json!({"sub": "u1", "email": "a@b.com", "name": "A B"}));
        let page = Pages::new()
            .expect("templates")
            .home(Some(&user))
            .expect("render");

        assert!(page.contains("<dd>u1</dd>"));
        assert!(page.contains("<dd>a@b.com</dd>"));
        assert!(page.contains("<dd>A B</dd>"));
        assert!(page.contains(r#"<a href="/logout">logout</a>"#));
        assert!(!page.contains("/login"));
        assert!(!page.contains("<img"));
    }

    #[test]
    fn escapes_claims() {
        let user = user(json!({"sub": "u1", "name": "<script>alert(1)</script>"}));
        let page = Pages::new()
            .expect("templates")
            .home(Some(&user))
            .expect("render");

        assert!(!page.contains("<script>"));
        assert!(page.contains("&lt;script&gt;"));
    }

    #[test]
    fn error_page() {
        let pages = Pages::new().expect("templates");

        let denied = pages
            .error(&OAuthError::Provider {
                error: "access_denied".into(),
                description: Some("The user denied access".into()),
            })
            .expect("render");
        assert!(denied.contains("<h1>access_denied</h1>"));
        assert!(denied.contains("<p>The user denied access</p>"));

        let mismatch = pages.error(&OAuthError::StateMismatch).expect("render");
        assert!(mismatch.contains("<h1>state_mismatch</h1>"));
        assert!(!mismatch.contains("<p>"));
    }
}
