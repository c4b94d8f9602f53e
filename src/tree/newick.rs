//! Parser for Newick tree-description text. Open groups live on an explicit
//! stack, so deeply nested trees cannot overflow the call stack.
//!
//! Grammar accepted here:
//! * tree ::= node [';']
//! * node ::= ['(' node (',' node)* ')'] [name] [':' length]
//! * name ::= quoted | unquoted, where quoted uses `'` and `''` escapes
//!
//! Whitespace and `[...]` comments may appear between tokens. Multifurcating
//! nodes are allowed. Child order is kept exactly as written.

use log::{debug, warn};
use thiserror::Error;

use super::{NodeId, Tree, TreeNode};

/// Characters that end an unquoted name.
const NAME_DELIMITERS: &[u8] = b":,();[";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("empty tree description")]
    Empty,
    #[error("empty node group `()`")]
    EmptyGroup,
    #[error("unexpected end of input inside a node group")]
    UnexpectedEnd,
    #[error("unbalanced closing bracket")]
    UnbalancedClose,
    #[error("unexpected character {0:?}")]
    UnexpectedChar(char),
    #[error("unclosed quoted name")]
    UnclosedQuote,
    #[error("unclosed comment")]
    UnclosedComment,
    #[error("unexpected content after the tree terminator")]
    TrailingContent,
    #[error("parser made no progress")]
    Stalled,
}

/// Malformed tree-description text, with the byte offset where parsing stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at position {position}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub position: usize,
}

/// A parsed tree together with the exact slice of text it came from.
#[derive(Debug, Clone)]
pub struct ParsedTree<'a> {
    pub tree: Tree,
    pub source: &'a str,
}

/// Parse exactly one tree. A trailing `;` is optional; anything after it
/// other than whitespace or comments is rejected.
pub fn parse(text: &str) -> Result<Tree, ParseError> {
    let trimmed_start = text.len() - text.trim_start().len();
    let mut body = text.trim();
    if let Some(stripped) = body.strip_suffix(';') {
        body = stripped;
    }

    let mut parser = NewickParser::new(text, trimmed_start, trimmed_start + body.len());
    parser.skip_trivia()?;
    if parser.at_end() {
        return Err(parser.error(ParseErrorKind::Empty));
    }

    let tree = parser.parse_tree()?;
    parser.skip_trivia()?;
    if parser.peek() == Some(b';') {
        parser.pos += 1;
        parser.skip_trivia()?;
    }
    parser.expect_end()?;
    Ok(tree)
}

/// Lazily parse the `;`-terminated trees of `text`, in order. The iterator
/// stops after the first error; a text without trees yields nothing.
pub fn parse_each(text: &str) -> TreeIter<'_> {
    TreeIter {
        parser: NewickParser::new(text, 0, text.len()),
        failed: false,
    }
}

pub struct TreeIter<'a> {
    parser: NewickParser<'a>,
    failed: bool,
}

impl<'a> TreeIter<'a> {
    fn next_tree(&mut self) -> Result<Option<ParsedTree<'a>>, ParseError> {
        let parser = &mut self.parser;
        let text = parser.text;
        parser.skip_trivia()?;
        if parser.at_end() {
            return Ok(None);
        }
        if parser.peek() == Some(b';') {
            return Err(parser.error(ParseErrorKind::Empty));
        }

        let start = parser.pos;
        let tree = parser.parse_tree()?;
        parser.skip_trivia()?;
        match parser.peek() {
            Some(b';') => parser.pos += 1,
            None => {}
            Some(b')') => return Err(parser.error(ParseErrorKind::UnbalancedClose)),
            Some(_) => return Err(parser.error(ParseErrorKind::TrailingContent)),
        }

        Ok(Some(ParsedTree {
            tree,
            source: text[start..parser.pos].trim_end(),
        }))
    }
}

impl<'a> Iterator for TreeIter<'a> {
    type Item = Result<ParsedTree<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let next = self.next_tree();
        self.failed = next.is_err();
        next.transpose()
    }
}

struct NewickParser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    end: usize,
    nodes: Vec<TreeNode>,
}

impl<'a> NewickParser<'a> {
    fn new(text: &'a str, start: usize, end: usize) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: start,
            end,
            nodes: Vec::new(),
        }
    }

    fn parse_tree(&mut self) -> Result<Tree, ParseError> {
        self.nodes.clear();
        let root = self.parse_nodes()?;
        let nodes = std::mem::take(&mut self.nodes);
        let tree = Tree::from_nodes(nodes, root);

        let negative = tree.negative_length_count();
        if negative > 0 {
            warn!("tree contains {negative} negative branch length(s); drawing them as-is");
        }
        Ok(tree)
    }

    fn push_node(&mut self, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(TreeNode::new(id, parent));
        if let Some(parent) = parent {
            self.nodes[parent].children.push(id);
        }
        id
    }

    /// Parse one node and everything below it.
    fn parse_nodes(&mut self) -> Result<NodeId, ParseError> {
        let root = self.push_node(None);
        let mut open: Vec<NodeId> = Vec::new();
        let mut current = root;
        // False right after `)`: the group's own label follows, not a child group.
        let mut may_open = true;

        loop {
            let before = self.pos;
            self.skip_trivia()?;
            if may_open && self.peek() == Some(b'(') {
                self.pos += 1;
                self.skip_trivia()?;
                if self.peek() == Some(b')') {
                    return Err(self.error(ParseErrorKind::EmptyGroup));
                }
                open.push(current);
                current = self.push_node(Some(current));
                continue;
            }

            self.parse_label(current)?;
            let Some(&parent) = open.last() else {
                return Ok(root);
            };

            self.skip_trivia()?;
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                    current = self.push_node(Some(parent));
                    may_open = true;
                }
                Some(b')') => {
                    self.pos += 1;
                    open.pop();
                    current = parent;
                    may_open = false;
                }
                None => return Err(self.error(ParseErrorKind::UnexpectedEnd)),
                Some(_) => {
                    let c = self.current_char().unwrap_or('\u{fffd}');
                    return Err(self.error(ParseErrorKind::UnexpectedChar(c)));
                }
            }

            if self.pos == before {
                return Err(self.error(ParseErrorKind::Stalled));
            }
        }
    }

    /// `[name] [':' length]` of node `id`.
    fn parse_label(&mut self, id: NodeId) -> Result<(), ParseError> {
        self.skip_trivia()?;
        self.nodes[id].name = self.parse_name()?;

        self.skip_trivia()?;
        if self.peek() == Some(b':') {
            self.pos += 1;
            self.skip_trivia()?;
            self.nodes[id].length = self.parse_length();
        }
        Ok(())
    }

    fn parse_name(&mut self) -> Result<String, ParseError> {
        if self.peek() == Some(b'\'') {
            return self.parse_quoted_name();
        }

        let start = self.pos;
        while let Some(byte) = self.peek() {
            if NAME_DELIMITERS.contains(&byte) {
                break;
            }
            self.pos += 1;
        }
        Ok(self.text[start..self.pos].trim().to_owned())
    }

    fn parse_quoted_name(&mut self) -> Result<String, ParseError> {
        let open = self.pos;
        self.pos += 1;
        let mut name = String::new();
        let mut segment_start = self.pos;

        loop {
            match self.peek() {
                None => {
                    self.pos = open;
                    return Err(self.error(ParseErrorKind::UnclosedQuote));
                }
                Some(b'\'') => {
                    name.push_str(&self.text[segment_start..self.pos]);
                    self.pos += 1;
                    if self.peek() == Some(b'\'') {
                        name.push('\'');
                        self.pos += 1;
                        segment_start = self.pos;
                    } else {
                        return Ok(name);
                    }
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    /// Branch lengths that are missing or unparsable become 0.
    fn parse_length(&mut self) -> f64 {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_digit() || matches!(byte, b'.' | b'-' | b'+' | b'e' | b'E') {
                self.pos += 1;
            } else {
                break;
            }
        }

        let raw = &self.text[start..self.pos];
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => value,
            _ => {
                if !raw.is_empty() {
                    debug!("unparsable branch length {raw:?} at position {start}; using 0");
                }
                0.0
            }
        }
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(byte) if byte.is_ascii_whitespace() => self.pos += 1,
                Some(b'[') => {
                    let open = self.pos;
                    match self.text[self.pos..self.end].find(']') {
                        Some(offset) => self.pos += offset + 1,
                        None => {
                            self.pos = open;
                            return Err(self.error(ParseErrorKind::UnclosedComment));
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn expect_end(&self) -> Result<(), ParseError> {
        match self.peek() {
            None => Ok(()),
            Some(b')') => Err(self.error(ParseErrorKind::UnbalancedClose)),
            Some(_) => Err(self.error(ParseErrorKind::TrailingContent)),
        }
    }

    fn peek(&self) -> Option<u8> {
        if self.pos < self.end {
            Some(self.bytes[self.pos])
        } else {
            None
        }
    }

    fn current_char(&self) -> Option<char> {
        self.text[self.pos..self.end].chars().next()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.end
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            kind,
            position: self.pos,
        }
    }
}
