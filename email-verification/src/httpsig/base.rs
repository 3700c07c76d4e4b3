//! Request model and RFC 9421 signature base construction.
//!
//! The authority is always the one the caller hands in, never the `Host`
//! header of the request: behind a proxy the header is attacker controlled.

use std::fmt;

use crate::{
    crypto::{base64_encode, sha256},
    error::{EvpError, Result},
    httpsig::sfv::{self, BareItem, InnerList, Item, Member, Parameters},
};

/// Header carrying the signing key reference.
pub const SIGNATURE_KEY_HEADER: &str = "signature-key";
/// Header carrying the covered components and signature parameters.
pub const SIGNATURE_INPUT_HEADER: &str = "signature-input";
/// Header carrying the signature bytes.
pub const SIGNATURE_HEADER: &str = "signature";
/// Header carrying the body digest.
pub const CONTENT_DIGEST_HEADER: &str = "content-digest";

/// The parts of an HTTP request a signature can cover.
///
/// # Examples
///
/// ```
/// use email_verification::httpsig::HttpRequest;
///
/// let request = HttpRequest::new("POST", "issuer.example", "/issue")
///     .with_header("Content-Type", "application/json")
///     .with_body(br#"{"email":"user@example.com"}"#.to_vec());
///
/// assert_eq!(request.header("content-type").as_deref(), Some("application/json"));
/// assert!(request.has_body());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method, e.g. `POST`.
    pub method: String,
    /// Authority the server was addressed as, supplied by the caller.
    pub authority: String,
    /// Scheme, `https` unless set otherwise.
    pub scheme: String,
    /// Path without query.
    pub path: String,
    /// Query string without the leading `?`.
    pub query: Option<String>,
    headers: Vec<(String, String)>,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Creates a request without headers or body.
    #[must_use]
    pub fn new(method: &str, authority: &str, path: &str) -> Self {
        Self {
            method: method.to_owned(),
            authority: authority.to_owned(),
            scheme: "https".to_owned(),
            path: path.to_owned(),
            query: None,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Sets the query string.
    #[must_use]
    pub fn with_query(mut self, query: &str) -> Self {
        self.query = Some(query.trim_start_matches('?').to_owned());
        self
    }

    /// Sets the scheme.
    #[must_use]
    pub fn with_scheme(mut self, scheme: &str) -> Self {
        scheme.clone_into(&mut self.scheme);
        self
    }

    /// Appends a header field.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Replaces every field named `name` with a single `value`.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_owned(), value.to_owned()));
    }

    /// Returns the combined value of `name`, case-insensitively.
    ///
    /// Repeated fields are joined with `", "` and each value is trimmed.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self
            .headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.trim())
            .collect();
        (!values.is_empty()).then(|| values.join(", "))
    }

    /// Iterates header fields in insertion order.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Returns `true` if the body is non-empty.
    #[must_use]
    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }
}

/// A covered component identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Component {
    /// `@method`
    Method,
    /// `@authority`
    Authority,
    /// `@scheme`
    Scheme,
    /// `@path`
    Path,
    /// `@query`
    Query,
    /// `@target-uri`
    TargetUri,
    /// A header field, stored lowercased.
    Header(String),
}

impl Component {
    /// Shorthand for a header component.
    #[must_use]
    pub fn header(name: &str) -> Self {
        Self::Header(name.to_ascii_lowercase())
    }

    /// Parses a component identifier such as `@method` or `content-type`.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::TokenFormat`] for unknown derived components and
    /// malformed header names.
    pub fn parse(identifier: &str) -> Result<Self> {
        match identifier {
            "@method" => Ok(Self::Method),
            "@authority" => Ok(Self::Authority),
            "@scheme" => Ok(Self::Scheme),
            "@path" => Ok(Self::Path),
            "@query" => Ok(Self::Query),
            "@target-uri" => Ok(Self::TargetUri),
            other if other.starts_with('@') => {
                Err(EvpError::TokenFormat(format!("unsupported derived component '{other}'")))
            }
            other => {
                let valid = !other.is_empty()
                    && other.bytes().all(|c| {
                        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, b'-' | b'_' | b'.')
                    });
                if valid {
                    Ok(Self::Header(other.to_owned()))
                } else {
                    Err(EvpError::TokenFormat(format!("invalid component identifier '{other}'")))
                }
            }
        }
    }

    /// Returns the identifier as it appears in `Signature-Input`.
    #[must_use]
    pub fn identifier(&self) -> &str {
        match self {
            Self::Method => "@method",
            Self::Authority => "@authority",
            Self::Scheme => "@scheme",
            Self::Path => "@path",
            Self::Query => "@query",
            Self::TargetUri => "@target-uri",
            Self::Header(name) => name,
        }
    }

    /// Computes the component value for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::TokenFormat`] if a covered header is absent or a
    /// value contains a line break.
    pub fn value(&self, request: &HttpRequest) -> Result<String> {
        let value = match self {
            Self::Method => request.method.clone(),
            Self::Authority => request.authority.to_ascii_lowercase(),
            Self::Scheme => request.scheme.to_ascii_lowercase(),
            Self::Path => path_or_root(&request.path).to_owned(),
            Self::Query => format!("?{}", request.query.as_deref().unwrap_or_default()),
            Self::TargetUri => {
                let mut uri = format!(
                    "{}://{}{}",
                    request.scheme.to_ascii_lowercase(),
                    request.authority.to_ascii_lowercase(),
                    path_or_root(&request.path)
                );
                if let Some(query) = &request.query {
                    uri.push('?');
                    uri.push_str(query);
                }
                uri
            }
            Self::Header(name) => request.header(name).ok_or_else(|| {
                EvpError::TokenFormat(format!("covered header '{name}' is not present"))
            })?,
        };

        if value.contains(['\r', '\n']) {
            return Err(EvpError::TokenFormat(format!(
                "component '{}' contains a line break",
                self.identifier()
            )));
        }
        Ok(value)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

fn path_or_root(path: &str) -> &str {
    if path.is_empty() { "/" } else { path }
}

/// Default covered components for `request`.
///
/// Without a body: `@method @authority @path signature-key`. With a body
/// the `content-type` and `content-digest` headers are covered too.
#[must_use]
pub fn default_components(request: &HttpRequest) -> Vec<Component> {
    let mut components = vec![
        Component::Method,
        Component::Authority,
        Component::Path,
        Component::header(SIGNATURE_KEY_HEADER),
    ];
    if request.has_body() {
        components.push(Component::header("content-type"));
        components.push(Component::header(CONTENT_DIGEST_HEADER));
    }
    components
}

/// Computes the `Content-Digest` value for `body`: `sha-256=:<base64>:`.
///
/// # Examples
///
/// ```
/// use email_verification::httpsig::content_digest;
///
/// assert_eq!(
///     content_digest(b""),
///     "sha-256=:47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=:"
/// );
/// ```
#[must_use]
pub fn content_digest(body: &[u8]) -> String {
    format!("sha-256=:{}:", base64_encode(sha256(body)))
}

/// Checks a received `Content-Digest` value against `body`.
///
/// # Errors
///
/// Returns [`EvpError::TokenFormat`] if the header is malformed or has no
/// `sha-256` member, and [`EvpError::InvalidSignature`] if the digest does
/// not match.
pub fn verify_content_digest(header: &str, body: &[u8]) -> Result<()> {
    let dict = sfv::parse_dictionary(header)?;
    let Some(Member::Item(item)) = dict.get("sha-256") else {
        return Err(EvpError::TokenFormat("content-digest has no sha-256 member".into()));
    };
    let digest = item
        .bare
        .as_bytes()
        .ok_or_else(|| EvpError::TokenFormat("content-digest sha-256 is not a byte sequence".into()))?;

    if digest == sha256(body).as_slice() {
        Ok(())
    } else {
        Err(EvpError::InvalidSignature("content-digest does not match body".into()))
    }
}

/// Covered components plus signature parameters, the value of one
/// `Signature-Input` member.
///
/// Parameters keep their received order so the `@signature-params` line
/// is reproduced exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureParams {
    components: Vec<Component>,
    params: Parameters,
}

impl SignatureParams {
    /// Creates parameters with the given components and `created` time.
    #[must_use]
    pub fn new(components: Vec<Component>, created: u64) -> Self {
        let created = i64::try_from(created).unwrap_or(i64::MAX);
        Self { components, params: vec![("created".to_owned(), BareItem::Integer(created))] }
    }

    /// Adds a `nonce` parameter.
    #[must_use]
    pub fn with_nonce(self, nonce: &str) -> Self {
        self.with_param("nonce", BareItem::String(nonce.to_owned()))
    }

    /// Adds an `alg` parameter.
    #[must_use]
    pub fn with_alg(self, alg: &str) -> Self {
        self.with_param("alg", BareItem::String(alg.to_owned()))
    }

    /// Adds an `expires` parameter.
    #[must_use]
    pub fn with_expires(self, expires: u64) -> Self {
        self.with_param("expires", BareItem::Integer(i64::try_from(expires).unwrap_or(i64::MAX)))
    }

    fn with_param(mut self, key: &str, value: BareItem) -> Self {
        self.params.retain(|(k, _)| k != key);
        self.params.push((key.to_owned(), value));
        self
    }

    /// Reads parameters from a parsed `Signature-Input` member.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::TokenFormat`] for non-string or parameterized
    /// components, repeated components, a missing `created`, or a known
    /// parameter of the wrong type.
    pub fn from_inner_list(list: &InnerList) -> Result<Self> {
        let mut components: Vec<Component> = Vec::with_capacity(list.items.len());
        for item in &list.items {
            let identifier = item.bare.as_str().ok_or_else(|| {
                EvpError::TokenFormat("component identifiers must be strings".into())
            })?;
            if !item.params.is_empty() {
                return Err(EvpError::TokenFormat(format!(
                    "component parameters are not supported ('{identifier}')"
                )));
            }
            let component = Component::parse(identifier)?;
            if components.contains(&component) {
                return Err(EvpError::TokenFormat(format!("component '{identifier}' repeated")));
            }
            components.push(component);
        }

        match list.param("created") {
            Some(BareItem::Integer(created)) if *created >= 0 => {}
            Some(_) => {
                return Err(EvpError::TokenFormat("created must be a non-negative integer".into()));
            }
            None => return Err(EvpError::TokenFormat("signature parameters lack created".into())),
        }
        if list.param("expires").is_some_and(|e| !matches!(e, BareItem::Integer(i) if *i >= 0)) {
            return Err(EvpError::TokenFormat("expires must be a non-negative integer".into()));
        }
        for key in ["nonce", "alg", "keyid", "tag"] {
            if list.param(key).is_some_and(|value| value.as_str().is_none()) {
                return Err(EvpError::TokenFormat(format!("{key} must be a string")));
            }
        }

        Ok(Self { components, params: list.params.clone() })
    }

    /// Converts to the inner list serialized into `Signature-Input`.
    #[must_use]
    pub fn to_inner_list(&self) -> InnerList {
        InnerList {
            items: self
                .components
                .iter()
                .map(|c| Item::new(BareItem::String(c.identifier().to_owned())))
                .collect(),
            params: self.params.clone(),
        }
    }

    /// Covered components in order.
    #[must_use]
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Returns `true` if `component` is covered.
    #[must_use]
    pub fn covers(&self, component: &Component) -> bool {
        self.components.contains(component)
    }

    fn param(&self, key: &str) -> Option<&BareItem> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// The `created` timestamp.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.param("created")
            .and_then(BareItem::as_integer)
            .and_then(|c| u64::try_from(c).ok())
            .unwrap_or_default()
    }

    /// The `expires` timestamp, if any.
    #[must_use]
    pub fn expires(&self) -> Option<u64> {
        self.param("expires").and_then(BareItem::as_integer).and_then(|e| u64::try_from(e).ok())
    }

    /// The `nonce` parameter, if any.
    #[must_use]
    pub fn nonce(&self) -> Option<&str> {
        self.param("nonce").and_then(BareItem::as_str)
    }

    /// The `alg` parameter, if any.
    #[must_use]
    pub fn alg(&self) -> Option<&str> {
        self.param("alg").and_then(BareItem::as_str)
    }
}

/// The exact byte sequence that is signed.
///
/// # Examples
///
/// ```
/// use email_verification::httpsig::{Component, HttpRequest, SignatureBase, SignatureParams};
///
/// let request = HttpRequest::new("GET", "rp.example", "/login");
/// let params = SignatureParams::new(vec![Component::Method, Component::Path], 1_700_000_000);
/// let base = SignatureBase::build(&request, &params).unwrap();
///
/// assert_eq!(
///     base.as_str(),
///     "\"@method\": GET\n\"@path\": /login\n\"@signature-params\": (\"@method\" \"@path\");created=1700000000"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureBase {
    base: String,
    signature_params: String,
}

impl SignatureBase {
    /// Builds the base for `request` covering `params.components()`.
    ///
    /// # Errors
    ///
    /// Returns [`EvpError::TokenFormat`] if a covered component cannot be
    /// computed from the request.
    pub fn build(request: &HttpRequest, params: &SignatureParams) -> Result<Self> {
        let signature_params = sfv::serialize_inner_list(&params.to_inner_list())?;

        let mut base = String::new();
        for component in &params.components {
            base.push('"');
            base.push_str(component.identifier());
            base.push_str("\": ");
            base.push_str(&component.value(request)?);
            base.push('\n');
        }
        base.push_str("\"@signature-params\": ");
        base.push_str(&signature_params);

        Ok(Self { base, signature_params })
    }

    /// The base as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.base
    }

    /// The base as bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.base.as_bytes()
    }

    /// The serialized `@signature-params` value, reused as the
    /// `Signature-Input` member value.
    #[must_use]
    pub fn signature_params(&self) -> &str {
        &self.signature_params
    }
}
