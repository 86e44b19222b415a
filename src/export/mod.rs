//! Graph export formats
//!
//! - [`viz`]: node/edge/category shape consumed by chart front ends
//! - [`graphml`]: GraphML interchange, readable back into a graph

pub mod graphml;
pub mod viz;

pub use graphml::{read_graphml, write_graphml};
pub use viz::{VisualizationGraph, VizCategory, VizEdge, VizNode};

use crate::graph::GraphError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Malformed GraphML: {0}")]
    Malformed(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub type ExportResult<T> = Result<T, ExportError>;
