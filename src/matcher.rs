//! Trap matching
//!
//! First-match-wins linear scan over the descriptor store.

use crate::descriptor::{TrapDescriptor, Trigger};
use crate::oid::Oid;
use crate::resolver::IdentifierResolver;
use crate::trap::IncomingTrap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TrapMatcher {
    resolver: IdentifierResolver,
}

impl TrapMatcher {
    pub fn new(resolver: IdentifierResolver) -> Self {
        Self { resolver }
    }

    /// Numeric identifier a descriptor is triggered by, if it has one.
    pub fn trigger_oid(&self, descriptor: &TrapDescriptor) -> Option<Oid> {
        match &descriptor.trigger {
            Trigger::Literal(oid) => Some(oid.clone()),
            Trigger::Symbolic(name) => match self.resolver.resolve(name) {
                Ok(oid) => Some(oid),
                Err(e) => {
                    debug!("trap definition {} cannot match: {}", descriptor.origin, e);
                    None
                }
            },
            Trigger::Unmatchable => None,
        }
    }

    /// Return the first descriptor whose trigger equals the trap's identifier.
    pub fn match_trap<'a>(
        &self,
        trap: &IncomingTrap,
        descriptors: &'a [TrapDescriptor],
    ) -> Option<&'a TrapDescriptor> {
        descriptors.iter().find(|descriptor| {
            let matched = self
                .trigger_oid(descriptor)
                .is_some_and(|oid| oid == trap.identifier);
            if matched {
                debug!("trap {} matched definition {}", trap.identifier, descriptor.origin);
            }
            matched
        })
    }
}
