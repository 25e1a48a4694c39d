use std::collections::HashMap;
use std::sync::Arc;

use http::uri::PathAndQuery;

use crate::HelperError;

/// The streaming shape of a gRPC method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Unary,
    ClientStreaming,
    ServerStreaming,
    Bidirectional,
}

/// Defines a gRPC service by its `package`, `service` name and methods,
/// as declared in the service's `.proto` file.
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    package: String,
    service: String,
    methods: Vec<(String, MethodKind)>,
}

impl ServiceDefinition {
    /// Create a [`ServiceDefinition`] from a valid `package` and `service` name.
    ///
    /// This function will fail if either is not a valid protobuf identifier;
    /// the package may be dotted, e.g. `grpc.health.v1`.
    pub fn new<P: ToString, S: ToString>(package: P, service: S) -> Result<Self, HelperError> {
        let package = package.to_string();
        let service = service.to_string();

        if !package.split('.').all(is_identifier) {
            return Err(HelperError::InvalidServiceDefinition(format!(
                "invalid 'package': '{package}'"
            )));
        }
        if !is_identifier(&service) {
            return Err(HelperError::InvalidServiceDefinition(format!(
                "invalid 'service': '{service}'"
            )));
        }

        Ok(Self {
            package,
            service,
            methods: Vec::new(),
        })
    }

    /// Declare a method of the service.
    pub fn method<T: ToString>(mut self, name: T, kind: MethodKind) -> Result<Self, HelperError> {
        let name = name.to_string();
        if !is_identifier(&name) {
            return Err(HelperError::InvalidServiceDefinition(format!(
                "invalid method name: '{name}'"
            )));
        }

        self.methods.push((name, kind));
        Ok(self)
    }

    /// Shorthand for [`method`](Self::method) with [`MethodKind::Unary`].
    pub fn unary<T: ToString>(self, name: T) -> Result<Self, HelperError> {
        self.method(name, MethodKind::Unary)
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// `package.Service`, the name used for paths and health checks.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.package, self.service)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A resolved method of a [`ServiceDefinition`].
#[derive(Debug, Clone)]
pub struct Method {
    package: String,
    service: String,
    name: String,
    kind: MethodKind,
    path: PathAndQuery,
}

impl Method {
    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    /// The request path, `/package.Service/Method`.
    pub fn path(&self) -> &PathAndQuery {
        &self.path
    }

    pub(crate) fn expect_kind(&self, expected: MethodKind) -> Result<(), HelperError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(HelperError::MethodKindMismatch {
                method: self.name.clone(),
                expected,
                actual: self.kind,
            })
        }
    }
}

/// Every method of a service keyed by name, built once from its [`ServiceDefinition`].
///
/// Methods are found by their proto name (`SayHello`) and by its snake_case
/// form (`say_hello`), matching the names of tonic generated clients.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, Arc<Method>>,
    names: Vec<String>,
}

impl MethodTable {
    pub fn new(definition: &ServiceDefinition) -> Result<Self, HelperError> {
        let full_name = definition.full_name();
        let mut table = MethodTable::default();

        for (name, kind) in &definition.methods {
            let path = PathAndQuery::try_from(format!("/{full_name}/{name}")).map_err(|err| {
                HelperError::InvalidServiceDefinition(format!("invalid method '{name}': {err}"))
            })?;
            let method = Arc::new(Method {
                package: definition.package.clone(),
                service: definition.service.clone(),
                name: name.clone(),
                kind: *kind,
                path,
            });

            let alias = snake_case(name);
            if alias != *name {
                table.methods.insert(alias, Arc::clone(&method));
            }
            table.methods.insert(name.clone(), method);
            table.names.push(name.clone());
        }

        Ok(table)
    }

    pub fn get(&self, name: &str) -> Result<&Arc<Method>, HelperError> {
        self.methods
            .get(name)
            .ok_or_else(|| HelperError::UnknownMethod(name.to_string()))
    }

    /// Proto names of every method, in declaration order.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

// A word starts at an upper case letter following a lower case letter or a
// digit, or at the last upper case letter of an acronym: `GetHTTPStatus` is
// `get_http_status`.
fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let starts_word = match i.checked_sub(1).map(|prev| chars[prev]) {
                None | Some('_') => false,
                Some(prev) if prev.is_ascii_lowercase() || prev.is_ascii_digit() => true,
                Some(prev) => {
                    prev.is_ascii_uppercase()
                        && chars.get(i + 1).is_some_and(|next| next.is_ascii_lowercase())
                }
            };
            if starts_word {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
