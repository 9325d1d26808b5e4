use itertools::Itertools;

use crate::error::{ChronorateError, Result};
use crate::gene_tree::{GeneTree, NodeId, TreeNode};

/// Parse a single Newick tree, with optional NHX-style node annotations
/// (`[&&NHX:D=Y:S=Primates]`). `D=` fills the typed duplication flag, every
/// other key is kept verbatim in the node's extension map. Plain bracket
/// comments are skipped.
pub fn parse(text: &str) -> Result<GeneTree> {
    let mut parser = Parser {
        chars: text.chars().collect(),
        pos: 0,
        tree: GeneTree::new(),
    };
    parser.skip_whitespace();
    let root = parser.tree.root();
    parser.parse_node(root)?;
    parser.skip_whitespace();
    parser.expect(';')?;
    parser.skip_whitespace();
    if parser.pos != parser.chars.len() {
        return Err(ChronorateError::parse(format!(
            "trailing characters after tree at offset {}",
            parser.pos
        )));
    }
    Ok(parser.tree)
}

/// Serialize back to Newick. With `with_annotations` the duplication flag and
/// extension tags are written as an NHX comment; the calibration tool gets
/// the plain form.
pub fn write(tree: &GeneTree, with_annotations: bool) -> String {
    let mut out = String::new();
    write_node(tree, tree.root(), with_annotations, &mut out);
    out.push(';');
    out
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    tree: GeneTree,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, want: char) -> Result<()> {
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(ChronorateError::parse(format!(
                "expected '{want}' at offset {}, found '{c}'",
                self.pos - 1
            ))),
            None => Err(ChronorateError::parse(format!(
                "expected '{want}' at offset {}, found end of input",
                self.pos
            ))),
        }
    }

    fn parse_node(&mut self, id: NodeId) -> Result<()> {
        self.skip_whitespace();
        if self.peek() == Some('(') {
            self.bump();
            loop {
                let child = self.tree.add_child(id);
                self.parse_node(child)?;
                self.skip_whitespace();
                match self.bump() {
                    Some(',') => continue,
                    Some(')') => break,
                    Some(c) => {
                        return Err(ChronorateError::parse(format!(
                            "expected ',' or ')' at offset {}, found '{c}'",
                            self.pos - 1
                        )));
                    }
                    None => {
                        return Err(ChronorateError::parse("unbalanced parentheses".to_string()));
                    }
                }
            }
        }
        self.skip_whitespace();
        let name = self.parse_label()?;
        if !name.is_empty() {
            self.tree.node_mut(id).name = Some(name);
        }
        self.skip_whitespace();
        self.parse_comment(id)?;
        self.skip_whitespace();
        if self.peek() == Some(':') {
            self.bump();
            let length = self.parse_number()?;
            if length < 0.0 {
                return Err(ChronorateError::parse(format!(
                    "negative branch length {length}"
                )));
            }
            self.tree.node_mut(id).branch_length = Some(length);
        }
        self.skip_whitespace();
        self.parse_comment(id)?;
        Ok(())
    }

    fn parse_label(&mut self) -> Result<String> {
        if self.peek() == Some('\'') {
            self.bump();
            let mut label = String::new();
            loop {
                match self.bump() {
                    Some('\'') => {
                        // doubled quote = literal quote
                        if self.peek() == Some('\'') {
                            self.bump();
                            label.push('\'');
                        } else {
                            return Ok(label);
                        }
                    }
                    Some(c) => label.push(c),
                    None => {
                        return Err(ChronorateError::parse("unterminated quoted label".to_string()));
                    }
                }
            }
        }
        let mut label = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, ':' | ',' | '(' | ')' | ';' | '[') {
                break;
            }
            label.push(c);
            self.pos += 1;
        }
        Ok(label)
    }

    fn parse_number(&mut self) -> Result<f64> {
        self.skip_whitespace();
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || matches!(c, '.' | '+' | '-' | 'e' | 'E') {
                text.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        text.parse::<f64>().map_err(|_| {
            ChronorateError::parse(format!("bad branch length '{text}' at offset {}", self.pos))
        })
    }

    fn parse_comment(&mut self, id: NodeId) -> Result<()> {
        if self.peek() != Some('[') {
            return Ok(());
        }
        self.bump();
        let mut inner = String::new();
        loop {
            match self.bump() {
                Some(']') => break,
                Some(c) => inner.push(c),
                None => return Err(ChronorateError::parse("unterminated comment".to_string())),
            }
        }
        if let Some(tags) = inner.strip_prefix("&&NHX") {
            for tag in tags.split(':').filter(|t| !t.is_empty()) {
                let Some((key, value)) = tag.split_once('=') else {
                    return Err(ChronorateError::parse(format!("bad NHX tag '{tag}'")));
                };
                let annotations = &mut self.tree.node_mut(id).annotations;
                if key == "D" {
                    annotations.duplication = Some(matches!(value, "Y" | "T" | "1"));
                } else {
                    annotations.extra.insert(key.to_string(), value.to_string());
                }
            }
        }
        Ok(())
    }
}

fn write_node(tree: &GeneTree, id: NodeId, with_annotations: bool, out: &mut String) {
    let node = tree.node(id);
    if !node.children.is_empty() {
        out.push('(');
        for (i, &child) in node.children.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_node(tree, child, with_annotations, out);
        }
        out.push(')');
    }
    if let Some(label) = node.label() {
        out.push_str(&quote_label(label));
    }
    if let Some(length) = node.branch_length {
        out.push(':');
        out.push_str(&format!("{length}"));
    }
    if with_annotations {
        write_nhx(node, out);
    }
}

fn quote_label(label: &str) -> String {
    let needs_quoting = label
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, ':' | ',' | '(' | ')' | ';' | '[' | ']' | '\''));
    if needs_quoting {
        format!("'{}'", label.replace('\'', "''"))
    } else {
        label.to_string()
    }
}

fn write_nhx(node: &TreeNode, out: &mut String) {
    let annotations = &node.annotations;
    if annotations.duplication.is_none() && annotations.extra.is_empty() {
        return;
    }
    out.push_str("[&&NHX");
    if let Some(duplication) = annotations.duplication {
        out.push_str(if duplication { ":D=Y" } else { ":D=N" });
    }
    for key in annotations.extra.keys().sorted() {
        out.push_str(&format!(":{key}={}", annotations.extra[key]));
    }
    out.push(']');
}
