//! Identity targets: what a configuration source applies to.
//!
//! A [`ConfigTarget`] pairs a [`TargetKind`] with a data string (network name,
//! `channel@network`, custom subtype, ...) and a numeric order. Targets are
//! compared for *precedence* with [`ConfigTarget::precedence_cmp`]; equality
//! only considers kind and data, so the two notions are kept apart and
//! `ConfigTarget` does not implement `Ord`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Order assigned to targets that do not specify one.
pub const DEFAULT_ORDER: i32 = 50_000;

/// The kind of scope a target describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    GlobalDefault,
    Global,
    Theme,
    Protocol,
    Ircd,
    Network,
    Server,
    Channel,
    Custom,
}

impl TargetKind {
    /// Specificity rank; higher ranks are consulted first in a cascade.
    ///
    /// Channel > Server > Network > Ircd > Protocol > Custom > Global >
    /// GlobalDefault > Theme.
    pub fn rank(self) -> u8 {
        match self {
            TargetKind::Channel => 8,
            TargetKind::Server => 7,
            TargetKind::Network => 6,
            TargetKind::Ircd => 5,
            TargetKind::Protocol => 4,
            TargetKind::Custom => 3,
            TargetKind::Global => 2,
            TargetKind::GlobalDefault => 1,
            TargetKind::Theme => 0,
        }
    }

    /// Whether targets of this kind carry no data.
    pub fn is_dataless(self) -> bool {
        matches!(
            self,
            TargetKind::Global | TargetKind::GlobalDefault | TargetKind::Theme
        )
    }

    /// Lower-case name, matching the key used in the `identity` domain.
    pub fn name(self) -> &'static str {
        match self {
            TargetKind::GlobalDefault => "globaldefault",
            TargetKind::Global => "global",
            TargetKind::Theme => "theme",
            TargetKind::Protocol => "protocol",
            TargetKind::Ircd => "ircd",
            TargetKind::Network => "network",
            TargetKind::Server => "server",
            TargetKind::Channel => "channel",
            TargetKind::Custom => "custom",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Describes what an identity applies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigTarget {
    kind: TargetKind,
    data: String,
    order: i32,
}

impl Default for ConfigTarget {
    fn default() -> Self {
        Self::global()
    }
}

impl ConfigTarget {
    fn with(kind: TargetKind, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
            order: DEFAULT_ORDER,
        }
    }

    pub fn global() -> Self {
        Self::with(TargetKind::Global, "")
    }

    pub fn global_default() -> Self {
        Self::with(TargetKind::GlobalDefault, "")
    }

    pub fn theme() -> Self {
        Self::with(TargetKind::Theme, "")
    }

    pub fn protocol(protocol: impl Into<String>) -> Self {
        Self::with(TargetKind::Protocol, protocol)
    }

    pub fn ircd(ircd: impl Into<String>) -> Self {
        Self::with(TargetKind::Ircd, ircd)
    }

    pub fn network(network: impl Into<String>) -> Self {
        Self::with(TargetKind::Network, network)
    }

    pub fn server(server: impl Into<String>) -> Self {
        Self::with(TargetKind::Server, server)
    }

    /// Targets a channel, given in the form `channel@network`.
    pub fn channel(channel: impl Into<String>) -> Self {
        Self::with(TargetKind::Channel, channel)
    }

    pub fn custom(subtype: impl Into<String>) -> Self {
        Self::with(TargetKind::Custom, subtype)
    }

    /// Builder-style order override.
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    fn set(&mut self, kind: TargetKind, data: impl Into<String>) {
        *self = Self {
            kind,
            data: data.into(),
            order: self.order,
        };
    }

    pub fn set_global(&mut self) {
        self.set(TargetKind::Global, "");
    }

    pub fn set_global_default(&mut self) {
        self.set(TargetKind::GlobalDefault, "");
    }

    pub fn set_theme(&mut self) {
        self.set(TargetKind::Theme, "");
    }

    pub fn set_protocol(&mut self, protocol: impl Into<String>) {
        self.set(TargetKind::Protocol, protocol);
    }

    pub fn set_ircd(&mut self, ircd: impl Into<String>) {
        self.set(TargetKind::Ircd, ircd);
    }

    pub fn set_network(&mut self, network: impl Into<String>) {
        self.set(TargetKind::Network, network);
    }

    pub fn set_server(&mut self, server: impl Into<String>) {
        self.set(TargetKind::Server, server);
    }

    pub fn set_channel(&mut self, channel: impl Into<String>) {
        self.set(TargetKind::Channel, channel);
    }

    pub fn set_custom(&mut self, subtype: impl Into<String>) {
        self.set(TargetKind::Custom, subtype);
    }

    pub fn set_order(&mut self, order: i32) {
        self.order = order;
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_custom(&self, subtype: &str) -> bool {
        self.kind == TargetKind::Custom && self.data == subtype
    }

    /// Compares two targets for cascade precedence.
    ///
    /// `Ordering::Less` means `self` is consulted before `other`. Different
    /// kinds are ordered by [`TargetKind::rank`]; within a kind the lower
    /// order comes first.
    pub fn precedence_cmp(&self, other: &Self) -> Ordering {
        other
            .kind
            .rank()
            .cmp(&self.kind.rank())
            .then_with(|| self.order.cmp(&other.order))
    }
}

impl PartialEq for ConfigTarget {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.data == other.data
    }
}

impl Eq for ConfigTarget {}

impl Hash for ConfigTarget {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.data.hash(state);
    }
}

impl fmt::Display for ConfigTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TargetKind::GlobalDefault => write!(f, "Global defaults"),
            TargetKind::Global => write!(f, "Global config"),
            TargetKind::Theme => write!(f, "Theme"),
            TargetKind::Protocol => write!(f, "Protocol specific: {}", self.data),
            TargetKind::Ircd => write!(f, "Ircd specific: {}", self.data),
            TargetKind::Network => write!(f, "Network specific: {}", self.data),
            TargetKind::Server => write!(f, "Server specific: {}", self.data),
            TargetKind::Channel => write!(f, "Channel specific: {}", self.data),
            TargetKind::Custom => write!(f, "Custom: {}", self.data),
        }
    }
}
