//! Mermaid diagram types.

use serde::{Deserialize, Serialize};

/// Diagram type, as declared by the first line of a Mermaid body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagramType {
    Flowchart,
    Sequence,
    Class,
    State,
    EntityRelationship,
    UserJourney,
    Gantt,
    Pie,
    Quadrant,
    Requirement,
    GitGraph,
    C4,
    Mindmap,
    Timeline,
    Sankey,
    XyChart,
    Block,
    Packet,
    Architecture,
    Kanban,
    Unknown,
}

/// Declaration keywords in match order.
///
/// Matching is a case-sensitive prefix test against the first non-empty line,
/// so longer variants must precede their prefixes (`stateDiagram-v2` before
/// `stateDiagram`).
pub(crate) const KEYWORDS: &[(&str, DiagramType)] = &[
    ("flowchart", DiagramType::Flowchart),
    ("graph", DiagramType::Flowchart),
    ("sequenceDiagram", DiagramType::Sequence),
    ("classDiagram-v2", DiagramType::Class),
    ("classDiagram", DiagramType::Class),
    ("stateDiagram-v2", DiagramType::State),
    ("stateDiagram", DiagramType::State),
    ("erDiagram", DiagramType::EntityRelationship),
    ("journey", DiagramType::UserJourney),
    ("gantt", DiagramType::Gantt),
    ("pie", DiagramType::Pie),
    ("quadrantChart", DiagramType::Quadrant),
    ("requirementDiagram", DiagramType::Requirement),
    ("gitGraph", DiagramType::GitGraph),
    ("C4Context", DiagramType::C4),
    ("C4Container", DiagramType::C4),
    ("C4Component", DiagramType::C4),
    ("C4Dynamic", DiagramType::C4),
    ("C4Deployment", DiagramType::C4),
    ("mindmap", DiagramType::Mindmap),
    ("timeline", DiagramType::Timeline),
    ("sankey-beta", DiagramType::Sankey),
    ("xychart-beta", DiagramType::XyChart),
    ("block-beta", DiagramType::Block),
    ("packet-beta", DiagramType::Packet),
    ("architecture-beta", DiagramType::Architecture),
    ("kanban", DiagramType::Kanban),
];

impl DiagramType {
    /// Short lowercase name, used in descriptive output file names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flowchart => "flowchart",
            Self::Sequence => "sequence",
            Self::Class => "class",
            Self::State => "state",
            Self::EntityRelationship => "er",
            Self::UserJourney => "journey",
            Self::Gantt => "gantt",
            Self::Pie => "pie",
            Self::Quadrant => "quadrant",
            Self::Requirement => "requirement",
            Self::GitGraph => "gitgraph",
            Self::C4 => "c4",
            Self::Mindmap => "mindmap",
            Self::Timeline => "timeline",
            Self::Sankey => "sankey",
            Self::XyChart => "xychart",
            Self::Block => "block",
            Self::Packet => "packet",
            Self::Architecture => "architecture",
            Self::Kanban => "kanban",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DiagramType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
