//! Addresses, membership updates and the diff between two address sets.

use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;

/// A backend identified by `host:port`.
///
/// Two addresses are equal when their strings are equal, nothing more is
/// parsed or normalised here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    pub fn new<T: Into<String>>(addr: T) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(addr: &str) -> Self {
        Self(addr.to_string())
    }
}

impl From<String> for Address {
    fn from(addr: String) -> Self {
        Self(addr)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Address {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Kind of membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateOp {
    Add,
    Del,
}

/// One membership change reported by a [`Watcher`](crate::Watcher).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Update {
    pub op: UpdateOp,
    pub addr: Address,
}

impl Update {
    pub fn add<A: Into<Address>>(addr: A) -> Self {
        Self {
            op: UpdateOp::Add,
            addr: addr.into(),
        }
    }

    pub fn del<A: Into<Address>>(addr: A) -> Self {
        Self {
            op: UpdateOp::Del,
            addr: addr.into(),
        }
    }
}

/// Compute the updates that turn `previous` into `current`.
///
/// Removals come first, then additions, each group sorted by address.
pub fn diff(previous: &HashSet<Address>, current: &HashSet<Address>) -> Vec<Update> {
    let mut removed: Vec<&Address> = previous.difference(current).collect();
    let mut added: Vec<&Address> = current.difference(previous).collect();
    removed.sort();
    added.sort();

    removed
        .into_iter()
        .map(|addr| Update::del(addr.clone()))
        .chain(added.into_iter().map(|addr| Update::add(addr.clone())))
        .collect()
}
