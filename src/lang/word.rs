use super::position::{Position, Span};

/// Flavor of a word definition, chosen by its begin marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordKind {
    /// `:name ... ;`
    Plain,
    /// `:@name ... ;`: consecutive table siblings form one jump table.
    Table,
    /// `:=name ... ;`: body is spliced into every call site.
    Inline,
}

impl WordKind {
    pub fn marker(self) -> &'static str {
        match self {
            WordKind::Plain => ":",
            WordKind::Table => ":@",
            WordKind::Inline => ":=",
        }
    }
}

/// Pre-link operation. Symbolic variants are resolved by the linker against
/// the enclosing lexical scopes.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    PushNumber(f64),
    /// `\name` or `` `name ``: push the resolved index of a table word.
    PushWordIndex(String),
    Call(String),
    /// ISA index of a builtin word such as `drop` or `arrpush`.
    Builtin(usize),
    /// ISA index of a one-character operator such as `+`.
    OneCharOp(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    pub kind: OpKind,
    pub pos: Position,
}

/// A node of the word tree produced by the parser.
///
/// The synthetic root has no name, no span, and never holds ops.
#[derive(Debug, Clone)]
pub struct Word {
    pub name: Option<String>,
    pub kind: WordKind,
    pub ops: Vec<Op>,
    pub children: Vec<Word>,
    /// Pre-order definition serial; the root is 0.
    pub serial: u32,
    pub span: Option<Span>,
}

impl Word {
    pub fn root() -> Self {
        Self {
            name: None,
            kind: WordKind::Plain,
            ops: Vec::new(),
            children: Vec::new(),
            serial: 0,
            span: None,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn is_root(&self) -> bool {
        self.name.is_none()
    }

    /// Colon-joined path of the innermost definition containing the given
    /// position, or an empty string when no definition contains it.
    pub fn word_path_at(&self, file: &str, line: u32, col: u32) -> String {
        let mut path: Vec<&str> = Vec::new();
        let mut scope = self;
        while let Some(child) = scope.children.iter().find(|w| {
            w.span
                .as_ref()
                .is_some_and(|s| s.contains(file, line, col))
        }) {
            path.push(child.name());
            scope = child;
        }
        path.join(":")
    }

    /// Depth-first visit of every named word with its colon-joined path.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&str, &'a Word)) {
        fn rec<'a>(word: &'a Word, prefix: &str, f: &mut impl FnMut(&str, &'a Word)) {
            for child in &word.children {
                let path = if prefix.is_empty() {
                    child.name().to_string()
                } else {
                    format!("{}:{}", prefix, child.name())
                };
                f(&path, child);
                rec(child, &path, f);
            }
        }
        rec(self, "", f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_source;

    const NESTED: &str = ":outer\n  :inner\n    420\n  ;\n  22 inner +\n;";

    fn path_at(line: u32, col: u32) -> String {
        let root = parse_source("<test.4st>", NESTED).unwrap();
        root.word_path_at("<test.4st>", line, col)
    }

    #[test]
    fn test_word_path_on_begin_line() {
        assert_eq!(path_at(0, 0), "outer");
        assert_eq!(path_at(0, 1), "outer");
        assert_eq!(path_at(0, 4), "outer");
        assert_eq!(path_at(0, 5), "outer");
    }

    #[test]
    fn test_word_path_enters_inner_at_marker() {
        assert_eq!(path_at(1, 0), "outer");
        assert_eq!(path_at(1, 1), "outer");
        assert_eq!(path_at(1, 2), "outer:inner");
        assert_eq!(path_at(1, 7), "outer:inner");
        assert_eq!(path_at(2, 0), "outer:inner");
    }

    #[test]
    fn test_word_path_leaves_inner_past_terminator() {
        assert_eq!(path_at(3, 0), "outer:inner");
        assert_eq!(path_at(3, 2), "outer:inner");
        assert_eq!(path_at(3, 3), "outer");
        assert_eq!(path_at(4, 0), "outer");
        assert_eq!(path_at(5, 0), "outer");
        assert_eq!(path_at(5, 1), "");
    }

    #[test]
    fn test_word_path_other_file() {
        let root = parse_source("<test.4st>", NESTED).unwrap();
        assert_eq!(root.word_path_at("<other.4st>", 2, 0), "");
    }

    #[test]
    fn test_walk_yields_paths_in_definition_order() {
        let root = parse_source("a.4st", ":a :b ; ; :c ;").unwrap();
        let mut seen = Vec::new();
        root.walk(&mut |path, w| seen.push((path.to_string(), w.serial)));
        assert_eq!(
            seen,
            vec![
                ("a".to_string(), 1),
                ("a:b".to_string(), 2),
                ("c".to_string(), 3)
            ]
        );
    }
}
