//! Rows and columns of a grid, derived from a view definition.

use rustc_hash::FxHashMap;
use serde_json::{Value as JsonValue, json};
use viewcalc_common::{TargetRef, TargetType, ValueProperties, ValueSpec};
use viewcalc_engine::ViewDefinition;

/// Which targets a grid shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridType {
    /// Portfolio nodes and positions, with the portfolio requirements as columns.
    Portfolio,
    /// Primitives and securities named by specific requirements.
    Primitives,
}

impl GridType {
    pub fn shows(self, target_type: TargetType) -> bool {
        match self {
            Self::Portfolio => target_type.is_portfolio_level(),
            Self::Primitives => !target_type.is_portfolio_level(),
        }
    }
}

/// A column is one requirement in one configuration, independent of target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnKey {
    pub config: String,
    pub value_name: String,
    pub properties: ValueProperties,
}

impl ColumnKey {
    pub fn matches(&self, config: &str, spec: &ValueSpec) -> bool {
        self.config == config
            && self.value_name == spec.value_name()
            && self.properties.is_satisfied_by(spec.properties())
    }
}

#[derive(Debug, Clone)]
pub struct GridColumn {
    pub id: u64,
    pub key: ColumnKey,
    pub header: String,
    pub description: String,
}

impl GridColumn {
    pub fn to_json(&self, null_value: &JsonValue, data_type: Option<&str>) -> JsonValue {
        let mut column = json!({
            "colId": self.id,
            "header": self.header,
            "description": self.description,
            "nullValue": null_value,
        });
        if let (Some(data_type), Some(obj)) = (data_type, column.as_object_mut()) {
            obj.insert("dataType".to_string(), JsonValue::from(data_type));
        }
        column
    }
}

#[derive(Debug, Clone)]
pub struct GridRow {
    pub id: u64,
    pub target: TargetRef,
}

impl GridRow {
    pub fn to_json(&self) -> JsonValue {
        json!({
            "rowId": self.id,
            "targetType": self.target.target_type().short_name(),
            "target": self.target.id(),
        })
    }
}

#[derive(Debug, Default)]
pub struct GridStructure {
    pub rows: Vec<GridRow>,
    pub columns: Vec<GridColumn>,
    row_by_target: FxHashMap<TargetRef, u64>,
}

impl GridStructure {
    pub fn build(grid_type: GridType, definition: &ViewDefinition) -> Self {
        let mut structure = Self::default();

        if grid_type == GridType::Portfolio {
            for target in definition.portfolio() {
                structure.add_row(target);
            }
        }

        for config in definition.configurations() {
            if grid_type == GridType::Portfolio {
                for (value_name, properties) in config.portfolio_requirements() {
                    structure.add_column(config.name(), value_name, properties);
                }
            }
            for requirement in config.specific_requirements() {
                if !grid_type.shows(requirement.target().target_type()) {
                    continue;
                }
                structure.add_row(requirement.target());
                structure.add_column(
                    config.name(),
                    requirement.value_name(),
                    requirement.constraints(),
                );
            }
        }
        structure
    }

    fn add_row(&mut self, target: &TargetRef) {
        if self.row_by_target.contains_key(target) {
            return;
        }
        let id = self.rows.len() as u64;
        self.row_by_target.insert(target.clone(), id);
        self.rows.push(GridRow {
            id,
            target: target.clone(),
        });
    }

    fn add_column(&mut self, config: &str, value_name: &str, properties: &ValueProperties) {
        let key = ColumnKey {
            config: config.to_string(),
            value_name: value_name.to_string(),
            properties: properties.clone(),
        };
        if self.columns.iter().any(|c| c.key == key) {
            return;
        }
        let description = if properties.is_empty() {
            format!("{value_name}/{config}")
        } else {
            format!("{value_name}/{config} {properties}")
        };
        self.columns.push(GridColumn {
            id: self.columns.len() as u64,
            header: value_name.to_string(),
            description,
            key,
        });
    }

    pub fn row_of(&self, target: &TargetRef) -> Option<u64> {
        self.row_by_target.get(target).copied()
    }

    pub fn column(&self, id: u64) -> Option<&GridColumn> {
        self.columns.get(id as usize)
    }

    /// First column whose requirement `spec` satisfies.
    pub fn column_for(&self, config: &str, spec: &ValueSpec) -> Option<&GridColumn> {
        self.columns.iter().find(|c| c.key.matches(config, spec))
    }
}
