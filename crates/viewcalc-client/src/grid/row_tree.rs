use serde::ser::{Serialize, SerializeTuple, Serializer};

/// Nesting of portfolio rows. Each node spans the contiguous rows
/// `start..=end` and serializes as `[start, end, [children...]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowTree {
    start: u64,
    end: u64,
    children: Vec<RowTree>,
}

impl RowTree {
    pub fn leaf(row: u64) -> Self {
        Self {
            start: row,
            end: row,
            children: Vec::new(),
        }
    }

    /// A node on row `start` whose children follow it directly.
    pub fn node(start: u64, children: Vec<RowTree>) -> Self {
        let end = children.iter().map(|c| c.end).max().unwrap_or(start).max(start);
        Self {
            start,
            end,
            children,
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn children(&self) -> &[RowTree] {
        &self.children
    }

    pub fn row_count(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl Serialize for RowTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.start)?;
        tuple.serialize_element(&self.end)?;
        tuple.serialize_element(&self.children)?;
        tuple.end()
    }
}
