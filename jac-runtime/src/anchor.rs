//! Anchors: the persisted identity of every graph object.

use std::collections::BTreeMap;

use jac_core::value::Value;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnchorKind {
    Root,
    Node,
    Edge,
    Walker,
    Object,
}

impl AnchorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnchorKind::Root => "root",
            AnchorKind::Node => "node",
            AnchorKind::Edge => "edge",
            AnchorKind::Walker => "walker",
            AnchorKind::Object => "object",
        }
    }

    pub fn parse(text: &str) -> Option<AnchorKind> {
        Some(match text {
            "root" => AnchorKind::Root,
            "node" => AnchorKind::Node,
            "edge" => AnchorKind::Edge,
            "walker" => AnchorKind::Walker,
            "object" => AnchorKind::Object,
            _ => return None,
        })
    }
}

/// Anchor visibility to other user roots. New anchors default to private:
/// invisible to everyone but their owner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Access {
    Public,
    Protected,
    #[default]
    Private,
}

impl Access {
    pub fn as_str(self) -> &'static str {
        match self {
            Access::Public => "public",
            Access::Protected => "protected",
            Access::Private => "private",
        }
    }

    pub fn parse(text: &str) -> Option<Access> {
        Some(match text {
            "public" => Access::Public,
            "protected" => Access::Protected,
            "private" => Access::Private,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeEndpoints {
    pub src: Uuid,
    pub dst: Uuid,
    pub directed: bool,
}

impl EdgeEndpoints {
    /// The endpoint other than `current`, honoring direction: traversing a
    /// directed edge from its destination goes nowhere.
    pub fn other(&self, current: Uuid) -> Option<Uuid> {
        if current == self.src {
            Some(self.dst)
        } else if current == self.dst && !self.directed {
            Some(self.src)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug)]
pub struct Anchor {
    pub id: Uuid,
    pub kind: AnchorKind,
    pub archetype: String,
    pub fields: BTreeMap<String, Value>,
    pub owner_root_id: Uuid,
    pub access: Access,
    /// Endpoints, for edge anchors.
    pub edge: Option<EdgeEndpoints>,
    /// Incident edge ids in creation order, for node anchors.
    pub edges: Vec<Uuid>,
}

impl Anchor {
    pub fn new_root(id: Uuid) -> Self {
        Self {
            id,
            kind: AnchorKind::Root,
            archetype: "Root".to_string(),
            fields: BTreeMap::new(),
            owner_root_id: id,
            access: Access::Private,
            edge: None,
            edges: Vec::new(),
        }
    }

    pub fn new_node(archetype: impl Into<String>, owner: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: AnchorKind::Node,
            archetype: archetype.into(),
            fields: BTreeMap::new(),
            owner_root_id: owner,
            access: Access::Private,
            edge: None,
            edges: Vec::new(),
        }
    }

    pub fn new_edge(
        archetype: impl Into<String>,
        owner: Uuid,
        src: Uuid,
        dst: Uuid,
        directed: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: AnchorKind::Edge,
            archetype: archetype.into(),
            fields: BTreeMap::new(),
            owner_root_id: owner,
            access: Access::Private,
            edge: Some(EdgeEndpoints { src, dst, directed }),
            edges: Vec::new(),
        }
    }

    pub fn new_walker(archetype: impl Into<String>, owner: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: AnchorKind::Walker,
            archetype: archetype.into(),
            fields: BTreeMap::new(),
            owner_root_id: owner,
            access: Access::Private,
            edge: None,
            edges: Vec::new(),
        }
    }

    /// Whether `actor` may see and touch this anchor.
    pub fn accessible_by(&self, actor: Uuid) -> bool {
        match self.access {
            Access::Public => true,
            Access::Protected | Access::Private => self.owner_root_id == actor,
        }
    }

    /// JSON form used in reports and API payloads.
    pub fn to_json(&self) -> serde_json::Value {
        let fields: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        serde_json::json!({
            "id": self.id.to_string(),
            "kind": self.kind.as_str(),
            "archetype": self.archetype,
            "fields": fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directed_edge_other_endpoint() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let endpoints = EdgeEndpoints {
            src: a,
            dst: b,
            directed: true,
        };
        assert_eq!(endpoints.other(a), Some(b));
        assert_eq!(endpoints.other(b), None);
    }

    #[test]
    fn undirected_edge_works_both_ways() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let endpoints = EdgeEndpoints {
            src: a,
            dst: b,
            directed: false,
        };
        assert_eq!(endpoints.other(a), Some(b));
        assert_eq!(endpoints.other(b), Some(a));
    }

    #[test]
    fn access_defaults_to_private() {
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let anchor = Anchor::new_node("Task", owner);
        assert!(anchor.accessible_by(owner));
        assert!(!anchor.accessible_by(other));
    }

    #[test]
    fn public_anchor_is_visible_to_all() {
        let owner = Uuid::new_v4();
        let mut anchor = Anchor::new_node("Task", owner);
        anchor.access = Access::Public;
        assert!(anchor.accessible_by(Uuid::new_v4()));
    }

    #[test]
    fn root_owns_itself() {
        let id = Uuid::new_v4();
        let root = Anchor::new_root(id);
        assert_eq!(root.owner_root_id, id);
        assert_eq!(root.kind, AnchorKind::Root);
    }
}
