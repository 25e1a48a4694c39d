//! Parsing of service discovery uris, e.g. `static://10.0.0.1:50051,10.0.0.2:50051`
//! or `dns://_grpc._tcp.greeter?intervalMs=3000`.

use crate::HelperError;

/// A service discovery uri split into its scheme and scheme-specific body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    scheme: String,
    body: String,
}

impl Target {
    /// Split `scheme://body`. Both are kept as written; the body is handed to
    /// the resolver untouched.
    pub fn parse(uri: &str) -> Result<Self, HelperError> {
        let (scheme, body) = uri
            .split_once("://")
            .ok_or_else(|| HelperError::InvalidTarget(format!("missing '://' in '{uri}'")))?;

        if scheme.is_empty() {
            return Err(HelperError::InvalidTarget(format!(
                "missing scheme in '{uri}'"
            )));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            body: body.to_string(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

/// Split a resolver body into its path and `key=value` query pairs.
///
/// Query entries without `=` are kept with an empty key so that resolvers
/// accepting a bare list (`greeter?host:2379,host:2380`) can read them.
pub(crate) fn split_query(body: &str) -> (&str, Vec<(&str, &str)>) {
    match body.split_once('?') {
        None => (body, Vec::new()),
        Some((path, query)) => {
            let pairs = query
                .split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| pair.split_once('=').unwrap_or(("", pair)))
                .collect();
            (path, pairs)
        }
    }
}
