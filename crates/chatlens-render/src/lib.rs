//! Chatlens Render
//!
//! DOT graph construction and Graphviz subprocess rendering.

use anyhow::{anyhow, bail, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::debug;

const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LAYOUT_ENGINE: &str = "circo";
const DEFAULT_DPI: u32 = 96;
const DEFAULT_NODE_FONT: &str = "simsun";
const EDGE_MIN_WIDTH: f64 = 1.0;
const EDGE_MAX_WIDTH: f64 = 5.0;

static FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A directed multigraph of reply relationships, rendered as Graphviz DOT.
///
/// Nodes are users keyed by id, edges carry a score and an explicit/implicit
/// flag. Edge widths are scaled linearly between [`EDGE_MIN_WIDTH`] and
/// [`EDGE_MAX_WIDTH`] relative to the highest score in the graph.
#[derive(Debug, Default)]
pub struct ReplyGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
}

#[derive(Debug)]
struct GraphNode {
    id: i64,
    label: String,
}

#[derive(Debug)]
struct GraphEdge {
    from: i64,
    to: i64,
    score: f64,
    explicit: bool,
}

impl ReplyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node unless one with the same id is already present.
    pub fn add_node(&mut self, id: i64, label: &str) {
        if self.nodes.iter().any(|n| n.id == id) {
            return;
        }
        self.nodes.push(GraphNode {
            id,
            label: label.to_string(),
        });
    }

    /// Adds a directed edge. Both endpoints must already be nodes; parallel
    /// edges between the same pair are allowed.
    pub fn add_edge(&mut self, from: i64, to: i64, score: f64, explicit: bool) {
        self.edges.push(GraphEdge {
            from,
            to,
            score,
            explicit,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Serializes the graph as a DOT digraph.
    pub fn to_dot(&self, explicit_edge_color: &str, implicit_edge_color: &str) -> String {
        let max_score = self
            .edges
            .iter()
            .map(|e| e.score)
            .fold(0.0_f64, f64::max)
            .max(f64::MIN_POSITIVE);

        let mut out = String::from("digraph G {\n");
        for node in &self.nodes {
            let _ = writeln!(
                out,
                "  {} [ label=\"{}\" fontname=\"{}\" ];",
                node.id,
                escape_label(&node.label),
                DEFAULT_NODE_FONT
            );
        }
        for edge in &self.edges {
            let width =
                EDGE_MIN_WIDTH + (EDGE_MAX_WIDTH - EDGE_MIN_WIDTH) * edge.score / max_score;
            let color = if edge.explicit {
                explicit_edge_color
            } else {
                implicit_edge_color
            };
            let _ = writeln!(
                out,
                "  {} -> {} [ label=\"{:.1}\" style=\"setlinewidth({:.2})\" color=\"{}\" ];",
                edge.from, edge.to, edge.score, width, color
            );
        }
        out.push_str("}\n");
        out
    }
}

fn escape_label(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Renders DOT sources to PNG by invoking the `dot` binary.
pub struct Graphviz {
    dot_path: String,
    temp_dir: PathBuf,
    timeout_secs: u64,
}

impl Graphviz {
    pub fn new(dot_path: &str, temp_dir: &Path) -> Self {
        Self {
            dot_path: dot_path.to_string(),
            temp_dir: temp_dir.to_path_buf(),
            timeout_secs: DEFAULT_RENDER_TIMEOUT_SECS,
        }
    }

    /// Writes the DOT source to a temp file, runs Graphviz over it and
    /// returns the path of the produced PNG. The caller is responsible for
    /// deleting the image once it has been uploaded.
    pub async fn render_png(&self, dot_source: &str) -> Result<PathBuf> {
        let stem = unique_file_stem();
        let dot_file = self.temp_dir.join(format!("{}.dot", stem));
        let png_file = self.temp_dir.join(format!("{}.png", stem));

        tokio::fs::write(&dot_file, dot_source)
            .await
            .map_err(|e| anyhow!("Failed to write {}: {}", dot_file.display(), e))?;

        let result = self.run_dot(&dot_file, &png_file).await;
        let _ = tokio::fs::remove_file(&dot_file).await;
        result?;

        Ok(png_file)
    }

    async fn run_dot(&self, dot_file: &Path, png_file: &Path) -> Result<()> {
        let mut process = Command::new(&self.dot_path);
        process
            .arg("-Tpng")
            .arg(format!("-K{}", DEFAULT_LAYOUT_ENGINE))
            .arg(format!("-Gdpi={}", DEFAULT_DPI))
            .arg(dot_file)
            .arg("-o")
            .arg(png_file)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(dot = %self.dot_path, input = %dot_file.display(), "running graphviz");

        let output = match timeout(Duration::from_secs(self.timeout_secs), process.output()).await
        {
            Ok(result) => {
                result.map_err(|e| anyhow!("Failed to execute '{}': {}", self.dot_path, e))?
            }
            Err(_) => bail!("Graphviz timed out after {}s", self.timeout_secs),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Graphviz exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        Ok(())
    }
}

fn unique_file_stem() -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let n = FILE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("network-{}-{}", ts, n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_output_contains_nodes_and_edges() {
        let mut graph = ReplyGraph::new();
        graph.add_node(1, "Alice");
        graph.add_node(2, "Bob");
        graph.add_edge(1, 2, 3.0, true);
        graph.add_edge(2, 1, 1.5, false);

        let dot = graph.to_dot("red", "blue");
        assert!(dot.starts_with("digraph G {"));
        assert!(dot.contains("1 [ label=\"Alice\""));
        assert!(dot.contains("2 [ label=\"Bob\""));
        assert!(dot.contains("1 -> 2 [ label=\"3.0\""));
        assert!(dot.contains("color=\"red\""));
        assert!(dot.contains("color=\"blue\""));
    }

    #[test]
    fn edge_widths_scale_with_score() {
        let mut graph = ReplyGraph::new();
        graph.add_node(1, "a");
        graph.add_node(2, "b");
        graph.add_edge(1, 2, 4.0, true);
        graph.add_edge(2, 1, 2.0, true);

        let dot = graph.to_dot("red", "blue");
        // Top score gets the max width, half the score sits halfway up.
        assert!(dot.contains("setlinewidth(5.00)"));
        assert!(dot.contains("setlinewidth(3.00)"));
    }

    #[test]
    fn duplicate_nodes_are_ignored() {
        let mut graph = ReplyGraph::new();
        graph.add_node(1, "first");
        graph.add_node(1, "second");
        let dot = graph.to_dot("red", "blue");
        assert!(dot.contains("first"));
        assert!(!dot.contains("second"));
    }

    #[test]
    fn labels_are_escaped() {
        let mut graph = ReplyGraph::new();
        graph.add_node(1, "say \"hi\"");
        let dot = graph.to_dot("red", "blue");
        assert!(dot.contains("label=\"say \\\"hi\\\"\""));
    }

    #[test]
    fn empty_graph_has_no_edges() {
        let graph = ReplyGraph::new();
        assert!(graph.is_empty());
    }
}
