//! Import and export between text formats and [`TreeNode`]s.
//!
//! JSON and YAML share one mapping: an object becomes a node whose scalar
//! members are attributes and whose nested members are children named after
//! their key; an array becomes a node with one `item` child per element; a
//! bare scalar becomes a node with a `value` attribute. The `jsonType`
//! attribute records which of the three shapes a node came from so
//! [`tree_to_json`] can restore it.
//!
//! XML is parsed with `nom`. CSV rows become `row` children carrying one
//! attribute per column.

use std::collections::{BTreeMap, HashMap};

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_until, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{map, recognize},
    error::{VerboseError, context},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated},
};
use thiserror::Error;

use super::{NodeKind, TreeNode, Value};

pub const JSON_TYPE: &str = "jsonType";
pub const VALUE_ATTRIBUTE: &str = "value";
pub const ITEM_NAME: &str = "item";
pub const HEADERS_ATTRIBUTE: &str = "headers";
pub const ROW_NAME: &str = "row";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    #[error("JSON error: {0}")]
    Json(String),
    #[error("YAML error: {0}")]
    Yaml(String),
    #[error("XML error: {0}")]
    Xml(String),
    #[error("CSV error: {0}")]
    Csv(String),
}

pub type FormatResult<T> = Result<T, FormatError>;

pub fn empty_json() -> TreeNode {
    let node = TreeNode::with_kind(NodeKind::Json, "root");
    node.set_attribute(JSON_TYPE, Value::str("object"));
    node
}

pub fn parse_json(text: &str) -> FormatResult<TreeNode> {
    let json: serde_json::Value =
        serde_json::from_str(text).map_err(|e| FormatError::Json(e.to_string()))?;
    Ok(json_to_tree(NodeKind::Json, "root", &json))
}

pub fn parse_yaml(text: &str) -> FormatResult<TreeNode> {
    let json: serde_json::Value =
        serde_yaml::from_str(text).map_err(|e| FormatError::Yaml(e.to_string()))?;
    Ok(json_to_tree(NodeKind::Yaml, "root", &json))
}

pub fn json_to_tree(kind: NodeKind, name: &str, json: &serde_json::Value) -> TreeNode {
    use serde_json::Value as Json;

    let node = TreeNode::with_kind(kind.clone(), name);
    match json {
        Json::Object(members) => {
            node.set_attribute(JSON_TYPE, Value::str("object"));
            for (key, member) in members {
                if member.is_object() || member.is_array() {
                    let child = json_to_tree(kind.clone(), key, member);
                    // a freshly built child cannot be an ancestor
                    let _ = node.add_child(&child);
                } else {
                    node.set_attribute(key.clone(), Value::from_json(member));
                }
            }
        }
        Json::Array(items) => {
            node.set_attribute(JSON_TYPE, Value::str("array"));
            for item in items {
                let child = json_to_tree(kind.clone(), ITEM_NAME, item);
                let _ = node.add_child(&child);
            }
        }
        scalar => {
            node.set_attribute(JSON_TYPE, Value::str("scalar"));
            node.set_attribute(VALUE_ATTRIBUTE, Value::from_json(scalar));
        }
    }
    node
}

/// Renders any tree as JSON. Nodes without a `jsonType` are treated as
/// objects; repeated child names collapse into an array.
pub fn tree_to_json(node: &TreeNode) -> serde_json::Value {
    use serde_json::Value as Json;

    let json_type = node.attribute(JSON_TYPE).map(|v| v.to_string());
    match json_type.as_deref() {
        Some("array") => Json::Array(node.children().iter().map(tree_to_json).collect()),
        Some("scalar") => node
            .attribute(VALUE_ATTRIBUTE)
            .map(|v| v.to_json())
            .unwrap_or(Json::Null),
        _ => {
            let mut object = serde_json::Map::new();
            let attributes: BTreeMap<_, _> = node.attributes().into_iter().collect();
            for (key, value) in attributes {
                if key != JSON_TYPE {
                    object.insert(key, value.to_json());
                }
            }
            if let Some(text) = node.text() {
                object.insert("text".to_string(), Json::String(text));
            }
            for child in node.children() {
                let name = child.name();
                let rendered = tree_to_json(&child);
                let repeated = json_type.is_none() && object.contains_key(&name);
                if !repeated {
                    object.insert(name, rendered);
                    continue;
                }
                match object.get_mut(&name) {
                    Some(Json::Array(existing)) => existing.push(rendered),
                    Some(existing) => {
                        let first = existing.take();
                        *existing = Json::Array(vec![first, rendered]);
                    }
                    None => {}
                }
            }
            Json::Object(object)
        }
    }
}

pub fn to_json_string(node: &TreeNode, pretty: bool) -> FormatResult<String> {
    let json = tree_to_json(node);
    let rendered = if pretty {
        serde_json::to_string_pretty(&json)
    } else {
        serde_json::to_string(&json)
    };
    rendered.map_err(|e| FormatError::Json(e.to_string()))
}

pub fn to_yaml(node: &TreeNode) -> FormatResult<String> {
    serde_yaml::to_string(&tree_to_json(node)).map_err(|e| FormatError::Yaml(e.to_string()))
}

/// Builds a map-backed node: scalar entries become attributes, nested maps
/// become children.
pub fn map_to_tree(name: &str, entries: &HashMap<String, Value>) -> TreeNode {
    let node = TreeNode::with_kind(NodeKind::Map, name);
    for (key, value) in entries {
        match value {
            Value::Map(nested) => {
                let child = map_to_tree(key, &nested.read());
                let _ = node.add_child(&child);
            }
            Value::Tree(child) => {
                let _ = node.add_child(&child.deep_clone());
            }
            other => node.set_attribute(key.clone(), other.clone()),
        }
    }
    node
}

/// Wraps rows from an external data source.
pub fn query_result(source: &str, columns: &[String], rows: Vec<Vec<Value>>) -> TreeNode {
    let node = TreeNode::with_kind(
        NodeKind::QueryResult {
            source: source.to_string(),
        },
        "result",
    );
    node.set_attribute(
        HEADERS_ATTRIBUTE,
        Value::array(columns.iter().map(|c| Value::str(c.clone())).collect()),
    );
    for row in rows {
        let child = TreeNode::with_kind(node.kind().clone(), ROW_NAME);
        for (i, cell) in row.into_iter().enumerate() {
            child.set_attribute(column_name(columns, i), cell);
        }
        let _ = node.add_child(&child);
    }
    node
}

fn column_name(headers: &[String], index: usize) -> String {
    headers
        .get(index)
        .cloned()
        .unwrap_or_else(|| format!("col_{}", index))
}

// ---------------------------------------------------------------------------
// XML
// ---------------------------------------------------------------------------

type XmlResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

enum XmlContent {
    Element(TreeNode),
    Text(String),
    Skip,
}

pub fn parse_xml(text: &str) -> FormatResult<TreeNode> {
    let result = preceded(many0(misc), terminated(element, many0(misc)))(text);
    match result {
        Ok(("", node)) => Ok(node),
        Ok((rest, _)) => Err(FormatError::Xml(format!(
            "unexpected content after root element: {}",
            rest.chars().take(20).collect::<String>()
        ))),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(FormatError::Xml(nom::error::convert_error(text, e)))
        }
        Err(nom::Err::Incomplete(_)) => Err(FormatError::Xml("incomplete document".into())),
    }
}

fn xml_name(input: &str) -> XmlResult<&str> {
    context(
        "name",
        recognize(pair(
            take_while1(|c: char| c.is_alphabetic() || c == '_' || c == ':'),
            take_while(|c: char| c.is_alphanumeric() || "_:-.".contains(c)),
        )),
    )(input)
}

fn comment(input: &str) -> XmlResult<()> {
    map(delimited(tag("<!--"), take_until("-->"), tag("-->")), |_| ())(input)
}

fn processing_instruction(input: &str) -> XmlResult<()> {
    map(delimited(tag("<?"), take_until("?>"), tag("?>")), |_| ())(input)
}

fn doctype(input: &str) -> XmlResult<()> {
    map(delimited(tag("<!DOCTYPE"), take_until(">"), tag(">")), |_| ())(input)
}

fn misc(input: &str) -> XmlResult<()> {
    alt((
        map(take_while1(|c: char| c.is_whitespace()), |_| ()),
        comment,
        processing_instruction,
        doctype,
    ))(input)
}

fn attribute(input: &str) -> XmlResult<(String, String)> {
    let (input, _) = multispace0(input)?;
    let (input, name) = xml_name(input)?;
    let (input, _) = delimited(multispace0, char('='), multispace0)(input)?;
    let (input, raw) = context(
        "attribute value",
        alt((
            delimited(char('"'), take_until("\""), char('"')),
            delimited(char('\''), take_until("'"), char('\'')),
        )),
    )(input)?;
    Ok((input, (name.to_string(), decode_entities(raw))))
}

fn element(input: &str) -> XmlResult<TreeNode> {
    let (input, _) = char('<')(input)?;
    let (input, name) = xml_name(input)?;
    let (input, attributes) = many0(attribute)(input)?;
    let (input, _) = multispace0(input)?;

    let node = TreeNode::with_kind(NodeKind::Xml, name);
    for (key, value) in attributes {
        node.set_attribute(key, Value::Str(value));
    }

    let (input, self_closing) = context(
        "end of start tag",
        alt((map(tag("/>"), |_| true), map(char('>'), |_| false))),
    )(input)?;
    if self_closing {
        return Ok((input, node));
    }

    let (input, contents) = many0(xml_content)(input)?;
    let mut text = String::new();
    for content in contents {
        match content {
            XmlContent::Element(child) => {
                let _ = node.add_child(&child);
            }
            XmlContent::Text(fragment) => text.push_str(&fragment),
            XmlContent::Skip => {}
        }
    }
    let text = text.trim();
    if !text.is_empty() {
        node.set_text(Some(text.to_string()));
    }

    let (input, _) = context("closing tag", tag("</"))(input)?;
    let (rest, closing) = xml_name(input)?;
    if closing != name {
        return Err(nom::Err::Failure(VerboseError {
            errors: vec![(
                input,
                nom::error::VerboseErrorKind::Context("matching closing tag"),
            )],
        }));
    }
    let (rest, _) = preceded(multispace0, char('>'))(rest)?;
    Ok((rest, node))
}

fn xml_content(input: &str) -> XmlResult<XmlContent> {
    alt((
        map(comment, |_| XmlContent::Skip),
        map(processing_instruction, |_| XmlContent::Skip),
        map(
            delimited(tag("<![CDATA["), take_until("]]>"), tag("]]>")),
            |data: &str| XmlContent::Text(data.to_string()),
        ),
        map(element, XmlContent::Element),
        map(take_while1(|c: char| c != '<'), |raw: &str| {
            XmlContent::Text(decode_entities(raw))
        }),
    ))(input)
}

fn decode_entities(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        let Some(end) = after.find(';') else {
            out.push_str(after);
            return out;
        };
        let entity = &after[1..end];
        let decoded = match entity {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "amp" => Some('&'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => out.push(c),
            None => out.push_str(&after[..=end]),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn to_xml(node: &TreeNode) -> String {
    let mut out = String::new();
    write_xml(node, 0, &mut out);
    out
}

fn write_xml(node: &TreeNode, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    let name = node.name();
    out.push_str(&pad);
    out.push('<');
    out.push_str(&name);

    let attributes: BTreeMap<_, _> = node.attributes().into_iter().collect();
    for (key, value) in attributes {
        if key == JSON_TYPE {
            continue;
        }
        out.push_str(&format!(" {}=\"{}\"", key, escape_xml(&value.to_string())));
    }

    let children = node.children();
    let text = node.text();
    if children.is_empty() && text.is_none() {
        out.push_str("/>\n");
        return;
    }
    out.push('>');
    if let Some(text) = &text {
        out.push_str(&escape_xml(text));
    }
    if !children.is_empty() {
        out.push('\n');
        for child in &children {
            write_xml(child, indent + 1, out);
        }
        out.push_str(&pad);
    }
    out.push_str(&format!("</{}>\n", name));
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

pub fn parse_csv(text: &str, has_headers: bool) -> FormatResult<TreeNode> {
    let mut records = read_records(text)?;
    let node = TreeNode::with_kind(NodeKind::Csv, "csv");

    let headers: Vec<String> = if has_headers && !records.is_empty() {
        records.remove(0)
    } else {
        let width = records.iter().map(Vec::len).max().unwrap_or(0);
        (0..width).map(|i| format!("col_{}", i)).collect()
    };
    node.set_attribute(
        HEADERS_ATTRIBUTE,
        Value::array(headers.iter().map(|h| Value::str(h.clone())).collect()),
    );

    for record in records {
        let row = TreeNode::with_kind(NodeKind::Csv, ROW_NAME);
        for (i, cell) in record.into_iter().enumerate() {
            row.set_attribute(column_name(&headers, i), Value::Str(cell));
        }
        let _ = node.add_child(&row);
    }
    Ok(node)
}

fn read_records(text: &str) -> FormatResult<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                other => field.push(other),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                if !(record.len() == 1 && record[0].is_empty()) {
                    records.push(std::mem::take(&mut record));
                } else {
                    record.clear();
                }
            }
            other => field.push(other),
        }
    }
    if in_quotes {
        return Err(FormatError::Csv("unterminated quoted field".into()));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

/// Column order comes from the `headers` attribute when present, otherwise
/// from the sorted union of row attribute names.
pub fn to_csv(node: &TreeNode) -> String {
    let rows = node.children();
    let headers: Vec<String> = match node.attribute(HEADERS_ATTRIBUTE) {
        Some(Value::Array(items)) => items.read().iter().map(|v| v.to_string()).collect(),
        _ => {
            let mut names: Vec<String> = rows
                .iter()
                .flat_map(|row| row.attributes().into_keys())
                .collect();
            names.sort();
            names.dedup();
            names
        }
    };

    let mut out = String::new();
    out.push_str(
        &headers
            .iter()
            .map(|h| csv_field(h))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push('\n');
    for row in rows {
        let line = headers
            .iter()
            .map(|h| csv_field(&row.attribute(h).map(|v| v.to_string()).unwrap_or_default()))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_json_roundtrip_shape() {
        let text = r#"{"name":"box","size":3,"tags":["a","b"],"inner":{"ok":true}}"#;
        let tree = parse_json(text).unwrap();

        assert_eq!(tree.attribute("name"), Some(Value::str("box")));
        assert_eq!(tree.find("tags").unwrap().child_count(), 2);
        assert_eq!(
            tree_to_json(&tree),
            serde_json::from_str::<serde_json::Value>(text).unwrap()
        );
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(parse_json("{"), Err(FormatError::Json(_))));
    }

    #[test]
    fn test_yaml_import() {
        let tree = parse_yaml("name: svc\nports:\n  - 80\n  - 443\n").unwrap();
        assert_eq!(*tree.kind(), NodeKind::Yaml);
        assert_eq!(tree.attribute("name"), Some(Value::str("svc")));
        let yaml = to_yaml(&tree).unwrap();
        assert!(yaml.contains("443"));
    }

    #[test]
    fn test_xml_parse() {
        let xml = r#"<?xml version="1.0"?>
<!-- catalog -->
<catalog owner="me &amp; you">
  <book id="1">Rust &lt;3</book>
  <book id="2"/>
</catalog>"#;
        let tree = parse_xml(xml).unwrap();
        assert_eq!(tree.name(), "catalog");
        assert_eq!(tree.attribute("owner"), Some(Value::str("me & you")));
        assert_eq!(tree.child_count(), 2);
        assert_eq!(tree.child(0).unwrap().text(), Some("Rust <3".to_string()));
        assert_eq!(
            tree.child(1).unwrap().attribute("id"),
            Some(Value::str("2"))
        );
    }

    #[test]
    fn test_xml_mismatched_tag() {
        assert!(matches!(parse_xml("<a><b></a></b>"), Err(FormatError::Xml(_))));
    }

    #[test]
    fn test_xml_export() {
        let tree = parse_xml(r#"<a x="1"><b>t</b><c/></a>"#).unwrap();
        let again = parse_xml(&to_xml(&tree)).unwrap();
        assert!(again.structurally_equal(&tree));
    }

    #[test]
    fn test_csv_with_quotes() {
        let csv = "name,note\nann,\"hello, world\"\nbob,\"say \"\"hi\"\"\"\n";
        let tree = parse_csv(csv, true).unwrap();
        assert_eq!(tree.child_count(), 2);
        assert_eq!(
            tree.child(0).unwrap().attribute("note"),
            Some(Value::str("hello, world"))
        );
        assert_eq!(
            tree.child(1).unwrap().attribute("note"),
            Some(Value::str("say \"hi\""))
        );
        assert_eq!(to_csv(&tree), csv);
    }

    #[test]
    fn test_csv_without_headers() {
        let tree = parse_csv("1,2\n3,4", false).unwrap();
        assert_eq!(
            tree.child(1).unwrap().attribute("col_1"),
            Some(Value::str("4"))
        );
    }

    #[test]
    fn test_query_result_node() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let node = query_result(
            "inventory",
            &columns,
            vec![vec![Value::Number(1.0), Value::str("bolt")]],
        );
        assert_eq!(
            *node.kind(),
            NodeKind::QueryResult {
                source: "inventory".into()
            }
        );
        assert_eq!(node.find("row").unwrap().attribute("name"), Some(Value::str("bolt")));
        assert!(to_csv(&node).starts_with("id,name\n1,bolt"));
    }

    #[test]
    fn test_map_node() {
        let mut nested = HashMap::new();
        nested.insert("x".to_string(), Value::Number(1.0));
        let mut entries = HashMap::new();
        entries.insert("label".to_string(), Value::str("top"));
        entries.insert("inner".to_string(), Value::map(nested));
        let node = map_to_tree("cfg", &entries);
        assert_eq!(*node.kind(), NodeKind::Map);
        assert_eq!(node.find("inner").unwrap().attribute("x"), Some(Value::Number(1.0)));
    }
}
