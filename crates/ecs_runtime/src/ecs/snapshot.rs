use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EntityId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSnapshot {
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub components: Vec<ComponentSnapshot>,
    pub behaviors: Vec<String>,
}

impl EntitySnapshot {
    pub fn component(&self, type_name: &str) -> Option<&ComponentSnapshot> {
        self.components
            .iter()
            .find(|component| component.type_name == type_name)
    }
}

/// Enumerable copy of the live entity set, in applied order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub entities: Vec<EntitySnapshot>,
}

impl WorldSnapshot {
    pub fn entity(&self, id: EntityId) -> Option<&EntitySnapshot> {
        self.entities.iter().find(|entity| entity.id == id)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
