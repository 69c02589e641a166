//! trapfwd library
//!
//! Listens for SNMP traps, matches them against trap definitions loaded from
//! disk, renders the configured event template with values taken from the
//! trap, and writes the event to the local Sensu client socket.

pub mod config;
pub mod decoder;
pub mod descriptor;
pub mod error;
pub mod extractor;
pub mod matcher;
pub mod oid;
pub mod processor;
pub mod publisher;
pub mod resolver;
pub mod snmp_listener;
pub mod templater;
pub mod trap;

pub use config::Config;
pub use descriptor::{DescriptorStore, TrapDescriptor};
pub use extractor::{DnsReverseLookup, ExtractedFields, FieldExtractor, ReverseLookup};
pub use matcher::TrapMatcher;
pub use oid::Oid;
pub use processor::{ProcessOutcome, TrapProcessor};
pub use publisher::{EventPublisher, SocketPublisher};
pub use resolver::{IdentifierResolver, MibCatalog, YamlDefinitions};
pub use snmp_listener::SnmpListener;
pub use templater::{render, OutputEvent};
pub use trap::{IncomingTrap, Notification, Value};
