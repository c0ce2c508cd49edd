//! Authorization endpoint wire types.
//!
//! Request parsing plus the response-type and response-mode algebra the
//! flow engine validates against. Building the actual redirect is the flow
//! engine's job; these types only know how to render parameters into a
//! query string, a fragment, or a form_post document.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Authorization Request
// =============================================================================

/// Query parameters of `GET /authorize`.
///
/// Everything is optional at the parsing layer; the flow engine enforces
/// presence in its documented validation order so each failure maps to the
/// right OAuth error. The struct serializes so a multi-step flow can
/// snapshot it into the flow state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// Requested response type, space-separated tokens.
    #[serde(default)]
    pub response_type: Option<String>,

    /// Client identifier.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Redirect URI.
    #[serde(default)]
    pub redirect_uri: Option<String>,

    /// Requested scopes (space-separated).
    #[serde(default)]
    pub scope: Option<String>,

    /// CSRF state, reflected verbatim.
    #[serde(default)]
    pub state: Option<String>,

    /// OIDC nonce; required for any response containing an ID token.
    #[serde(default)]
    pub nonce: Option<String>,

    /// PKCE code challenge.
    #[serde(default)]
    pub code_challenge: Option<String>,

    /// PKCE code challenge method; only S256 is accepted.
    #[serde(default)]
    pub code_challenge_method: Option<String>,

    /// Response mode override: `query`, `fragment`, or `form_post`.
    #[serde(default)]
    pub response_mode: Option<String>,

    /// OIDC prompt parameter (`none`, `login`, `consent`).
    #[serde(default)]
    pub prompt: Option<String>,

    /// PAR request URI (`urn:ietf:params:oauth:request_uri:...`).
    #[serde(default)]
    pub request_uri: Option<String>,
}

// =============================================================================
// Response Types
// =============================================================================

/// A single response type token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResponseType {
    /// Authorization code.
    Code,
    /// ID token (implicit / hybrid).
    IdToken,
    /// Access token (implicit / hybrid).
    Token,
}

impl ResponseType {
    /// Returns the wire token.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::IdToken => "id_token",
            Self::Token => "token",
        }
    }
}

/// The set of response types in one authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseTypeSet(Vec<ResponseType>);

impl ResponseTypeSet {
    /// Parses a space-separated `response_type` value.
    ///
    /// Duplicate and unknown tokens are rejected. The set is kept in
    /// canonical (sorted) order, so `"id_token code"` and `"code id_token"`
    /// compare equal.
    pub fn parse(value: &str) -> Result<Self, String> {
        let mut types = Vec::new();
        for token in value.split_whitespace() {
            let parsed = match token {
                "code" => ResponseType::Code,
                "id_token" => ResponseType::IdToken,
                "token" => ResponseType::Token,
                other => return Err(other.to_string()),
            };
            if types.contains(&parsed) {
                return Err(value.to_string());
            }
            types.push(parsed);
        }
        if types.is_empty() {
            return Err(value.to_string());
        }
        types.sort();
        Ok(Self(types))
    }

    /// Returns `true` if the set contains `rt`.
    #[must_use]
    pub fn contains(&self, rt: ResponseType) -> bool {
        self.0.contains(&rt)
    }

    /// Canonical space-separated form, e.g. `"code id_token"`.
    #[must_use]
    pub fn canonical(&self) -> String {
        self.0
            .iter()
            .map(ResponseType::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Pure code flow: exactly `{code}`.
    #[must_use]
    pub fn is_code_only(&self) -> bool {
        self.0 == [ResponseType::Code]
    }

    /// Implicit or hybrid: anything issued directly from `/authorize`.
    #[must_use]
    pub fn issues_from_front_channel(&self) -> bool {
        self.contains(ResponseType::Token) || self.contains(ResponseType::IdToken)
    }
}

impl fmt::Display for ResponseTypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

// =============================================================================
// Response Mode
// =============================================================================

/// How authorization response parameters return to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Parameters in the redirect query string.
    Query,
    /// Parameters in the redirect fragment.
    Fragment,
    /// Auto-submitting HTML form POSTing the parameters.
    FormPost,
}

impl ResponseMode {
    /// Parses an explicit `response_mode` parameter.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "query" => Some(Self::Query),
            "fragment" => Some(Self::Fragment),
            "form_post" => Some(Self::FormPost),
            _ => None,
        }
    }

    /// The default mode for a response type set: `query` for the pure code
    /// flow, `fragment` whenever tokens ride on the front channel.
    #[must_use]
    pub fn default_for(response_types: &ResponseTypeSet) -> Self {
        if response_types.issues_from_front_channel() {
            Self::Fragment
        } else {
            Self::Query
        }
    }

    /// `query` may not carry front-channel tokens.
    #[must_use]
    pub fn is_allowed_for(&self, response_types: &ResponseTypeSet) -> bool {
        !(matches!(self, Self::Query) && response_types.issues_from_front_channel())
    }
}
