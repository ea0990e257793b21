use std::fmt::{self, Display};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Kind of entity a computation runs against.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetType {
    PortfolioNode,
    Position,
    Security,
    Primitive,
}

impl TargetType {
    /// Short name used when presenting targets in grids and traces.
    pub fn short_name(self) -> &'static str {
        match self {
            Self::PortfolioNode => "Agg",
            Self::Position => "Pos",
            Self::Security => "Sec",
            Self::Primitive => "Prim",
        }
    }

    /// Positions and portfolio nodes receive portfolio-wide requirements.
    pub fn is_portfolio_level(self) -> bool {
        matches!(self, Self::PortfolioNode | Self::Position)
    }
}

impl Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Opaque reference to a computation target. Compared by value.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetRef {
    target_type: TargetType,
    id: Arc<str>,
}

impl TargetRef {
    pub fn new(target_type: TargetType, id: impl Into<Arc<str>>) -> Self {
        Self {
            target_type,
            id: id.into(),
        }
    }

    pub fn portfolio_node(id: impl Into<Arc<str>>) -> Self {
        Self::new(TargetType::PortfolioNode, id)
    }

    pub fn position(id: impl Into<Arc<str>>) -> Self {
        Self::new(TargetType::Position, id)
    }

    pub fn security(id: impl Into<Arc<str>>) -> Self {
        Self::new(TargetType::Security, id)
    }

    pub fn primitive(id: impl Into<Arc<str>>) -> Self {
        Self::new(TargetType::Primitive, id)
    }

    pub fn target_type(&self) -> TargetType {
        self.target_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.target_type, self.id)
    }
}
