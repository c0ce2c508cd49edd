//! Authorization response assembly.
//!
//! Success and error responses share one renderer: a list of parameters
//! delivered through the negotiated response mode - query string, fragment,
//! or an auto-submitting `form_post` document.

use url::Url;

use crate::oauth::authorize::ResponseMode;

/// Parameters of an authorization response, success or error.
#[derive(Debug, Clone, Default)]
pub struct AuthorizeParams {
    pairs: Vec<(String, String)>,
}

impl AuthorizeParams {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a parameter.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.pairs.push((key.to_string(), value.into()));
        self
    }

    /// Appends a parameter when `value` is present.
    #[must_use]
    pub fn with_opt(self, key: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    /// The parameter pairs, in insertion order.
    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Renders the response for `redirect_uri` through `mode`.
    pub fn render(self, redirect_uri: &str, mode: ResponseMode) -> Result<AuthorizeReply, url::ParseError> {
        match mode {
            ResponseMode::Query => {
                let mut url = Url::parse(redirect_uri)?;
                {
                    let mut query = url.query_pairs_mut();
                    for (k, v) in &self.pairs {
                        query.append_pair(k, v);
                    }
                }
                Ok(AuthorizeReply::Redirect(url.to_string()))
            }
            ResponseMode::Fragment => {
                let url = Url::parse(redirect_uri)?;
                let fragment = serde_urlencode(&self.pairs);
                Ok(AuthorizeReply::Redirect(format!("{url}#{fragment}")))
            }
            ResponseMode::FormPost => {
                // Validate the target even though it lands in HTML.
                Url::parse(redirect_uri)?;
                Ok(AuthorizeReply::FormPost(render_form_post(
                    redirect_uri,
                    &self.pairs,
                )))
            }
        }
    }
}

/// How the response leaves the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeReply {
    /// 302 redirect to this location.
    Redirect(String),
    /// 200 with this auto-submitting HTML document.
    FormPost(String),
}

impl AuthorizeReply {
    /// The redirect location, when this is a redirect.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::Redirect(location) => Some(location),
            Self::FormPost(_) => None,
        }
    }
}

fn serde_urlencode(pairs: &[(String, String)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in pairs {
        serializer.append_pair(k, v);
    }
    serializer.finish()
}

fn render_form_post(action: &str, pairs: &[(String, String)]) -> String {
    let mut inputs = String::new();
    for (k, v) in pairs {
        inputs.push_str(&format!(
            r#"<input type="hidden" name="{}" value="{}"/>"#,
            html_escape(k),
            html_escape(v)
        ));
    }
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Submit This Form</title></head>
<body onload="document.forms[0].submit()">
<form method="post" action="{}">{}</form>
</body>
</html>"#,
        html_escape(action),
        inputs
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
