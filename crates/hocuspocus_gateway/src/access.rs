//! Authorization hook consulted before any event handler runs.

use crate::identity::Principal;
use crate::models::Model;

/// Decides whether a principal may exercise `ability` on a document.
pub trait AccessGate: Send + Sync {
    fn can(&self, principal: &Principal, ability: &str, document: &Model) -> bool;
}

impl<F> AccessGate for F
where
    F: Fn(&Principal, &str, &Model) -> bool + Send + Sync,
{
    fn can(&self, principal: &Principal, ability: &str, document: &Model) -> bool {
        self(principal, ability, document)
    }
}

/// Grants every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessGate for AllowAll {
    fn can(&self, _principal: &Principal, _ability: &str, _document: &Model) -> bool {
        true
    }
}

/// Denies every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl AccessGate for DenyAll {
    fn can(&self, _principal: &Principal, _ability: &str, _document: &Model) -> bool {
        false
    }
}
