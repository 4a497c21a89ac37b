//! Workflow graph construction and structural validation.
//!
//! A ComfyUI workflow is a JSON object mapping node ids to node
//! descriptors. Node inputs are either literal values or links of the form
//! `["<node-id>", <output-index>]` pointing at another node's output.
//!
//! The builders here produce the two graphs the gateway submits:
//! a single-image transform and a masked edit. Both are pure functions of
//! their inputs.

use std::collections::{BTreeMap, HashSet};

use imgate_core::seed::{DEFAULT_IMAGE_TO_IMAGE_SEED, DEFAULT_MASKED_EDIT_SEED};
use serde::{Deserialize, Serialize};

use crate::api::AssetHandle;

// ---------------------------------------------------------------------------
// Node class types
// ---------------------------------------------------------------------------

/// Hosted image model node that performs the actual generation.
pub const GENERATION_NODE_CLASS: &str = "OpenAIGPTImage1";

/// Loads an uploaded input file.
pub const LOAD_IMAGE_CLASS: &str = "LoadImage";

/// Writes generated images to the server's output folder.
pub const SAVE_IMAGE_CLASS: &str = "SaveImage";

/// File name prefix given to saved outputs.
pub const DEFAULT_FILENAME_PREFIX: &str = "ComfyUI";

// ---------------------------------------------------------------------------
// Node ids
// ---------------------------------------------------------------------------

mod image_to_image_nodes {
    pub const GENERATE: &str = "10";
    pub const LOAD_IMAGE: &str = "14";
    pub const SAVE: &str = "15";
}

mod masked_edit_nodes {
    pub const GENERATE: &str = "25";
    pub const SAVE: &str = "28";
    pub const LOAD_IMAGE: &str = "29";
    pub const LOAD_MASK: &str = "32";
}

/// Output index of `LoadImage` carrying the mask channel.
const LOAD_IMAGE_MASK_OUTPUT: u32 = 1;

// ---------------------------------------------------------------------------
// Graph types
// ---------------------------------------------------------------------------

/// A complete workflow graph, serialized exactly as `/prompt` expects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowGraph {
    nodes: BTreeMap<String, WorkflowNode>,
}

/// One node of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub inputs: BTreeMap<String, NodeInput>,
    pub class_type: String,
    #[serde(rename = "_meta", default)]
    pub meta: NodeMeta,
}

/// Display metadata shown in the ComfyUI editor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub title: String,
}

/// A node input: either a link to another node's output or a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeInput {
    /// `(node_id, output_index)` of an upstream node.
    Link(String, u32),
    Literal(serde_json::Value),
}

impl NodeInput {
    pub fn link(node_id: &str, output: u32) -> Self {
        NodeInput::Link(node_id.to_string(), output)
    }

    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        NodeInput::Literal(value.into())
    }
}

/// Tunables bound into the generation node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOptions {
    pub size: String,
    pub quality: String,
    pub background: String,
    /// Number of images to produce per run.
    pub count: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            size: "1024x1024".into(),
            quality: "high".into(),
            background: "opaque".into(),
            count: 1,
        }
    }
}

/// Structural problems detected by [`WorkflowGraph::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("Node {node} input '{input}' links to missing node {target}")]
    DanglingLink {
        node: String,
        input: String,
        target: String,
    },

    #[error("Workflow has no {GENERATION_NODE_CLASS} node")]
    MissingGenerationNode,

    #[error("Expected exactly one save node fed by the generation node, found {0}")]
    SaveNodeCount(usize),
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Build the single-image transform graph:
/// `LoadImage → OpenAIGPTImage1 → SaveImage`.
pub fn image_to_image(
    prompt: &str,
    image: &AssetHandle,
    seed: Option<i64>,
    options: &GenerationOptions,
) -> WorkflowGraph {
    use image_to_image_nodes::*;

    let seed = seed.unwrap_or(DEFAULT_IMAGE_TO_IMAGE_SEED);
    let mut generate = generation_inputs(prompt, seed, options);
    generate.insert("image".into(), NodeInput::link(LOAD_IMAGE, 0));

    let mut graph = WorkflowGraph::default();
    graph.insert(GENERATE, GENERATION_NODE_CLASS, "OpenAI GPT Image 1", generate);
    graph.insert(LOAD_IMAGE, LOAD_IMAGE_CLASS, "Load Image", load_inputs(image));
    graph.insert(SAVE, SAVE_IMAGE_CLASS, "Save Image", save_inputs(GENERATE));
    graph
}

/// Build the masked edit graph: image and mask are loaded separately and
/// bound to the `image` and `mask` inputs of the generation node.
pub fn masked_edit(
    prompt: &str,
    image: &AssetHandle,
    mask: &AssetHandle,
    seed: Option<i64>,
    options: &GenerationOptions,
) -> WorkflowGraph {
    use masked_edit_nodes::*;

    let seed = seed.unwrap_or(DEFAULT_MASKED_EDIT_SEED);
    let mut generate = generation_inputs(prompt, seed, options);
    generate.insert("image".into(), NodeInput::link(LOAD_IMAGE, 0));
    generate.insert("mask".into(), NodeInput::link(LOAD_MASK, LOAD_IMAGE_MASK_OUTPUT));

    let mut graph = WorkflowGraph::default();
    graph.insert(GENERATE, GENERATION_NODE_CLASS, "OpenAI GPT Image 1", generate);
    graph.insert(SAVE, SAVE_IMAGE_CLASS, "Save Image", save_inputs(GENERATE));
    graph.insert(LOAD_IMAGE, LOAD_IMAGE_CLASS, "Load Image", load_inputs(image));
    graph.insert(LOAD_MASK, LOAD_IMAGE_CLASS, "Load Image", load_inputs(mask));
    graph
}

fn generation_inputs(
    prompt: &str,
    seed: i64,
    options: &GenerationOptions,
) -> BTreeMap<String, NodeInput> {
    BTreeMap::from([
        ("prompt".to_string(), NodeInput::literal(prompt)),
        ("seed".to_string(), NodeInput::literal(seed)),
        ("quality".to_string(), NodeInput::literal(options.quality.as_str())),
        ("background".to_string(), NodeInput::literal(options.background.as_str())),
        ("size".to_string(), NodeInput::literal(options.size.as_str())),
        ("n".to_string(), NodeInput::literal(options.count)),
    ])
}

fn load_inputs(asset: &AssetHandle) -> BTreeMap<String, NodeInput> {
    BTreeMap::from([(
        "image".to_string(),
        NodeInput::literal(asset.workflow_reference()),
    )])
}

fn save_inputs(source: &str) -> BTreeMap<String, NodeInput> {
    BTreeMap::from([
        (
            "filename_prefix".to_string(),
            NodeInput::literal(DEFAULT_FILENAME_PREFIX),
        ),
        ("images".to_string(), NodeInput::link(source, 0)),
    ])
}

// ---------------------------------------------------------------------------
// Graph operations
// ---------------------------------------------------------------------------

impl WorkflowGraph {
    fn insert(
        &mut self,
        id: &str,
        class_type: &str,
        title: &str,
        inputs: BTreeMap<String, NodeInput>,
    ) {
        self.nodes.insert(
            id.to_string(),
            WorkflowNode {
                inputs,
                class_type: class_type.to_string(),
                meta: NodeMeta {
                    title: title.to_string(),
                },
            },
        );
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, &WorkflowNode)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Id of the generation node, if the graph has one.
    pub fn generation_node_id(&self) -> Option<&str> {
        self.nodes()
            .find(|(_, node)| node.class_type == GENERATION_NODE_CLASS)
            .map(|(id, _)| id)
    }

    /// Check the structural invariants:
    ///
    /// - every link resolves to a node in this graph;
    /// - exactly one `SaveImage` node is (transitively) fed by the
    ///   generation node.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        for (id, node) in self.nodes() {
            for (input, value) in &node.inputs {
                if let NodeInput::Link(target, _) = value {
                    if !self.nodes.contains_key(target) {
                        return Err(WorkflowError::DanglingLink {
                            node: id.to_string(),
                            input: input.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
        }

        let generator = self
            .generation_node_id()
            .ok_or(WorkflowError::MissingGenerationNode)?;

        let reachable_saves = self
            .nodes()
            .filter(|(_, node)| node.class_type == SAVE_IMAGE_CLASS)
            .filter(|(id, _)| self.depends_on(id, generator))
            .count();

        if reachable_saves == 1 {
            Ok(())
        } else {
            Err(WorkflowError::SaveNodeCount(reachable_saves))
        }
    }

    /// `true` when `node_id` transitively consumes an output of `upstream`.
    fn depends_on(&self, node_id: &str, upstream: &str) -> bool {
        let mut stack = vec![node_id];
        let mut seen = HashSet::new();

        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            for input in node.inputs.values() {
                if let NodeInput::Link(target, _) = input {
                    if target == upstream {
                        return true;
                    }
                    stack.push(target.as_str());
                }
            }
        }
        false
    }
}
