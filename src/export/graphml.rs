//! GraphML writer and reader
//!
//! Entities become `<node>` elements and relations `<edge>` elements of a
//! directed graph. Attribute values are declared with `<key>` elements up
//! front. Reading a document produced by [`write_graphml`] yields a graph
//! with the same entities, relations and category order.

use super::{ExportError, ExportResult};
use crate::graph::types::now_millis;
use crate::graph::{Entity, EntityId, EntityType, GraphId, GraphSnapshot, KnowledgeGraph, Relation, RelationId, RelationType};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

const GRAPHML_NS: &str = "http://graphml.graphdrawing.org/xmlns";

/// (id, for, attr.name, attr.type)
const KEYS: &[(&str, &str, &str, &str)] = &[
    ("g_name", "graph", "name", "string"),
    ("g_version", "graph", "version", "long"),
    ("g_categories", "graph", "categories", "string"),
    ("n_name", "node", "name", "string"),
    ("n_type", "node", "entity_type", "string"),
    ("n_description", "node", "description", "string"),
    ("n_confidence", "node", "confidence", "double"),
    ("n_sources", "node", "source_ids", "string"),
    ("e_type", "edge", "relation_type", "string"),
    ("e_weight", "edge", "weight", "double"),
    ("e_description", "edge", "description", "string"),
    ("e_confidence", "edge", "confidence", "double"),
    ("e_sources", "edge", "source_ids", "string"),
    ("e_self_loop", "edge", "allow_self_loop", "boolean"),
];

/// Separator for multi-valued attributes. Members prefix a literal separator
/// or backslash with a backslash.
const LIST_SEPARATOR: char = ';';
const LIST_ESCAPE: char = '\\';

pub fn write_graphml(graph: &KnowledgeGraph) -> ExportResult<Vec<u8>> {
    let snapshot = graph.snapshot();
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new("graphml");
    root.push_attribute(("xmlns", GRAPHML_NS));
    writer.write_event(Event::Start(root))?;

    for (id, target, name, ty) in KEYS {
        let mut key = BytesStart::new("key");
        key.push_attribute(("id", *id));
        key.push_attribute(("for", *target));
        key.push_attribute(("attr.name", *name));
        key.push_attribute(("attr.type", *ty));
        writer.write_event(Event::Empty(key))?;
    }

    let mut g = BytesStart::new("graph");
    g.push_attribute(("id", snapshot.id.as_str()));
    g.push_attribute(("edgedefault", "directed"));
    writer.write_event(Event::Start(g))?;
    write_data(&mut writer, "g_name", &snapshot.name)?;
    write_data(&mut writer, "g_version", &snapshot.version.to_string())?;
    // Entity types never contain whitespace
    let categories: Vec<&str> = snapshot.categories.iter().map(|c| c.as_str()).collect();
    write_data(&mut writer, "g_categories", &categories.join(" "))?;

    for entity in &snapshot.entities {
        let mut node = BytesStart::new("node");
        node.push_attribute(("id", entity.id.as_str()));
        writer.write_event(Event::Start(node))?;
        write_data(&mut writer, "n_name", &entity.name)?;
        write_data(&mut writer, "n_type", entity.entity_type.as_str())?;
        if let Some(description) = &entity.description {
            write_data(&mut writer, "n_description", description)?;
        }
        write_data(&mut writer, "n_confidence", &entity.confidence.to_string())?;
        if !entity.source_ids.is_empty() {
            write_data(&mut writer, "n_sources", &join_list(&entity.source_ids))?;
        }
        writer.write_event(Event::End(BytesEnd::new("node")))?;
    }

    for relation in &snapshot.relations {
        let mut edge = BytesStart::new("edge");
        edge.push_attribute(("id", relation.id.as_str()));
        edge.push_attribute(("source", relation.head.as_str()));
        edge.push_attribute(("target", relation.tail.as_str()));
        writer.write_event(Event::Start(edge))?;
        write_data(&mut writer, "e_type", relation.relation_type.as_str())?;
        write_data(&mut writer, "e_weight", &relation.weight.to_string())?;
        if let Some(description) = &relation.description {
            write_data(&mut writer, "e_description", description)?;
        }
        write_data(&mut writer, "e_confidence", &relation.confidence.to_string())?;
        if !relation.source_ids.is_empty() {
            write_data(&mut writer, "e_sources", &join_list(&relation.source_ids))?;
        }
        if relation.allow_self_loop {
            write_data(&mut writer, "e_self_loop", "true")?;
        }
        writer.write_event(Event::End(BytesEnd::new("edge")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("graph")))?;
    writer.write_event(Event::End(BytesEnd::new("graphml")))?;
    debug!(
        "Wrote GraphML for {}: {} nodes, {} edges",
        snapshot.id,
        snapshot.entities.len(),
        snapshot.relations.len()
    );
    Ok(writer.into_inner())
}

fn write_data(writer: &mut Writer<Vec<u8>>, key: &str, value: &str) -> ExportResult<()> {
    let mut data = BytesStart::new("data");
    data.push_attribute(("key", key));
    writer.write_event(Event::Start(data))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new("data")))?;
    Ok(())
}

fn join_list(values: &BTreeSet<String>) -> String {
    let mut joined = String::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            joined.push(LIST_SEPARATOR);
        }
        for c in value.chars() {
            if c == LIST_SEPARATOR || c == LIST_ESCAPE {
                joined.push(LIST_ESCAPE);
            }
            joined.push(c);
        }
    }
    joined
}

fn split_list(value: &str) -> BTreeSet<String> {
    let mut items = BTreeSet::new();
    let mut current = String::new();
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match c {
            LIST_ESCAPE => current.extend(chars.next()),
            LIST_SEPARATOR => {
                if !current.is_empty() {
                    items.insert(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        items.insert(current);
    }
    items
}

/// Element whose `<data>` children are being collected
#[derive(Debug)]
enum Element {
    Graph,
    Node { id: String },
    Edge { id: Option<String>, source: String, target: String },
}

#[derive(Debug, Default)]
struct GraphFields {
    id: Option<String>,
    name: Option<String>,
    version: u64,
    categories: Vec<String>,
}

fn attribute(element: &BytesStart, name: &[u8]) -> ExportResult<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn required(element: &BytesStart, name: &[u8], what: &str) -> ExportResult<String> {
    attribute(element, name)?.ok_or_else(|| {
        ExportError::Malformed(format!(
            "<{}> without {} attribute",
            what,
            String::from_utf8_lossy(name)
        ))
    })
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> ExportResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ExportError::Malformed(format!("{} is not a number: {:?}", key, value)))
}

/// Parse a GraphML document written by [`write_graphml`].
///
/// Unknown keys are ignored. Edges whose endpoints are not declared as nodes
/// are rejected.
pub fn read_graphml(bytes: &[u8]) -> ExportResult<KnowledgeGraph> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut fields = GraphFields::default();
    let mut entities: Vec<Entity> = Vec::new();
    let mut relations: Vec<Relation> = Vec::new();
    let mut current: Option<(Element, HashMap<String, String>)> = None;
    let mut data_key: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"graph" => {
                    fields.id = attribute(&e, b"id")?;
                    current = Some((Element::Graph, HashMap::new()));
                }
                b"node" => {
                    let id = required(&e, b"id", "node")?;
                    current = Some((Element::Node { id }, HashMap::new()));
                }
                b"edge" => {
                    let element = Element::Edge {
                        id: attribute(&e, b"id")?,
                        source: required(&e, b"source", "edge")?,
                        target: required(&e, b"target", "edge")?,
                    };
                    current = Some((element, HashMap::new()));
                }
                b"data" => data_key = Some(required(&e, b"key", "data")?),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"node" => {
                    let id = required(&e, b"id", "node")?;
                    entities.push(finish_node(id, HashMap::new())?);
                }
                b"edge" => {
                    let element = Element::Edge {
                        id: attribute(&e, b"id")?,
                        source: required(&e, b"source", "edge")?,
                        target: required(&e, b"target", "edge")?,
                    };
                    relations.push(finish_edge(element, HashMap::new())?);
                }
                _ => {}
            },
            Event::Text(t) => {
                if let (Some(key), Some((_, values))) = (&data_key, current.as_mut()) {
                    values.insert(key.clone(), t.unescape()?.into_owned());
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"data" => data_key = None,
                b"node" | b"edge" => {
                    if let Some((element, values)) = current.take() {
                        match element {
                            Element::Node { id } => entities.push(finish_node(id, values)?),
                            edge @ Element::Edge { .. } => relations.push(finish_edge(edge, values)?),
                            Element::Graph => {}
                        }
                    }
                    current = Some((Element::Graph, HashMap::new()));
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }

        // Graph-level data can appear before or between nodes
        if let Some((Element::Graph, values)) = current.as_mut() {
            if let Some(name) = values.remove("g_name") {
                fields.name = Some(name);
            }
            if let Some(version) = values.remove("g_version") {
                fields.version = parse_number("g_version", &version)?;
            }
            if let Some(categories) = values.remove("g_categories") {
                fields.categories = categories.split_whitespace().map(str::to_string).collect();
            }
        }
        buf.clear();
    }

    let known: BTreeSet<&EntityId> = entities.iter().map(|e| &e.id).collect();
    for relation in &relations {
        for endpoint in [&relation.head, &relation.tail] {
            if !known.contains(endpoint) {
                return Err(ExportError::Malformed(format!(
                    "edge {} references undeclared node {}",
                    relation.id, endpoint
                )));
            }
        }
    }

    let categories = fields
        .categories
        .iter()
        .map(EntityType::new)
        .collect::<Result<Vec<_>, _>>()?;
    let now = now_millis();
    let snapshot = GraphSnapshot {
        id: fields.id.map(GraphId::new).unwrap_or_else(GraphId::generate),
        name: fields.name.unwrap_or_default(),
        version: fields.version,
        created_at: now,
        updated_at: now,
        categories,
        entities,
        relations,
    };
    debug!(
        "Read GraphML for {}: {} nodes, {} edges",
        snapshot.id,
        snapshot.entities.len(),
        snapshot.relations.len()
    );
    Ok(KnowledgeGraph::restore(snapshot))
}

fn finish_node(id: String, mut values: HashMap<String, String>) -> ExportResult<Entity> {
    let entity_type = values
        .remove("n_type")
        .ok_or_else(|| ExportError::Malformed(format!("node {} has no entity type", id)))?;
    let name = values.remove("n_name").unwrap_or_else(|| id.clone());
    let mut entity = Entity::with_id(EntityId::new(id), name, EntityType::new(entity_type)?);
    entity.description = values.remove("n_description");
    if let Some(confidence) = values.remove("n_confidence") {
        entity = entity.with_confidence(parse_number("n_confidence", &confidence)?);
    }
    if let Some(sources) = values.remove("n_sources") {
        entity.source_ids = split_list(&sources);
    }
    Ok(entity)
}

fn finish_edge(element: Element, mut values: HashMap<String, String>) -> ExportResult<Relation> {
    let Element::Edge { id, source, target } = element else {
        return Err(ExportError::Malformed("expected an edge".to_string()));
    };
    let relation_type = values
        .remove("e_type")
        .ok_or_else(|| ExportError::Malformed(format!("edge {} -> {} has no relation type", source, target)))?;
    let mut relation = Relation::new(EntityId::new(source), EntityId::new(target), RelationType::new(relation_type)?);
    if let Some(id) = id {
        relation.id = RelationId::new(id);
    }
    if let Some(weight) = values.remove("e_weight") {
        relation.weight = parse_number("e_weight", &weight)?;
    }
    relation.description = values.remove("e_description");
    if let Some(confidence) = values.remove("e_confidence") {
        relation = relation.with_confidence(parse_number("e_confidence", &confidence)?);
    }
    if let Some(sources) = values.remove("e_sources") {
        relation.source_ids = split_list(&sources);
    }
    relation.allow_self_loop = values.remove("e_self_loop").is_some_and(|v| v.trim() == "true");
    Ok(relation)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new("Cities & <Countries>");
        let city = Entity::new("Beijing", EntityType::new("city").unwrap())
            .with_description("Capital \"city\" of China")
            .with_confidence(0.9)
            .with_source("doc-1")
            .with_source("doc-2");
        let country = Entity::new("China", EntityType::new("country").unwrap());
        let (b, c) = (city.id.clone(), country.id.clone());
        graph.upsert_entity(city);
        graph.upsert_entity(country);
        graph
            .upsert_relation(
                Relation::new(b, c, RelationType::new("capital_of").unwrap())
                    .with_weight(2.5)
                    .with_source("doc-1"),
            )
            .unwrap();
        graph
    }

    #[test]
    fn test_written_document_declares_keys() {
        let xml = String::from_utf8(write_graphml(&sample()).unwrap()).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<key id=\"n_name\" for=\"node\" attr.name=\"name\" attr.type=\"string\"/>"));
        assert!(xml.contains("edgedefault=\"directed\""));
        assert!(xml.contains("Cities &amp; &lt;Countries&gt;"));
    }

    #[test]
    fn test_reimport_preserves_records() {
        let original = sample();
        let restored = read_graphml(&write_graphml(&original).unwrap()).unwrap();

        assert_eq!(restored.id(), original.id());
        assert_eq!(restored.name(), original.name());
        assert_eq!(restored.version(), original.version());
        assert_eq!(restored.entity_ids(), original.entity_ids());
        assert_eq!(restored.relation_keys(), original.relation_keys());
        let categories: Vec<_> = restored.categories().collect();
        let expected: Vec<_> = original.categories().collect();
        assert_eq!(categories, expected);

        let beijing = &restored.find_by_name("Beijing")[0];
        assert_eq!(beijing.description.as_deref(), Some("Capital \"city\" of China"));
        assert_eq!(beijing.source_ids.len(), 2);
        let relation = restored.relations().next().unwrap();
        assert_eq!(relation.weight, 2.5);
    }

    #[test]
    fn test_source_ids_containing_separator_survive_reimport() {
        let mut graph = KnowledgeGraph::new("sources");
        let entity = Entity::new("Beijing", EntityType::new("city").unwrap())
            .with_source("doc;1")
            .with_source("C:\\corpus\\a.txt")
            .with_source("plain");
        let id = entity.id.clone();
        graph.upsert_entity(entity.clone());
        graph
            .upsert_relation(
                Relation::new(id.clone(), id.clone(), RelationType::new("mentions").unwrap())
                    .allowing_self_loop()
                    .with_source("page;2;3"),
            )
            .unwrap();

        let restored = read_graphml(&write_graphml(&graph).unwrap()).unwrap();
        assert_eq!(restored.entity(&id).unwrap().source_ids, entity.source_ids);
        let relation = restored.relations().next().unwrap();
        assert_eq!(relation.source_ids.iter().collect::<Vec<_>>(), vec!["page;2;3"]);
    }

    #[test]
    fn test_list_escaping() {
        let values: BTreeSet<String> = ["a;b", "c\\", "d"].iter().map(|s| s.to_string()).collect();
        let joined = join_list(&values);
        assert_eq!(joined, "a\\;b;c\\\\;d");
        assert_eq!(split_list(&joined), values);
        assert_eq!(split_list("x;;y;"), ["x", "y"].iter().map(|s| s.to_string()).collect());
    }

    #[test]
    fn test_dangling_edge_is_rejected() {
        let xml = r#"<?xml version="1.0"?>
<graphml><graph id="g" edgedefault="directed">
  <node id="a"><data key="n_type">thing</data></node>
  <edge source="a" target="ghost"><data key="e_type">links</data></edge>
</graph></graphml>"#;
        assert!(matches!(read_graphml(xml.as_bytes()), Err(ExportError::Malformed(_))));
    }

    #[test]
    fn test_node_without_type_is_rejected() {
        let xml = r#"<graphml><graph id="g"><node id="a"/></graph></graphml>"#;
        assert!(matches!(read_graphml(xml.as_bytes()), Err(ExportError::Malformed(_))));
    }
}
