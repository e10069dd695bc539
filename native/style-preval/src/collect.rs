//! Syntax Collector
//!
//! Finds every template tagged with the marker identifier, in pre-order, so
//! an outer occurrence always precedes occurrences nested in its
//! interpolations. Tags other than a bare identifier (`styles.css`,
//! `css()`) are skipped.

use crate::ast::*;
use crate::error::SourceLocation;
use crate::lower::ParsedModule;
use crate::visit::{self, Visit};

/// One tagged-template site.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub span: Span,
    pub file: String,
    pub location: SourceLocation,
    /// Literal segments, one more than `expressions`.
    pub quasis: Vec<Quasi>,
    pub expressions: Vec<Expr>,
}

impl Occurrence {
    /// Raw text of every literal segment.
    pub fn raw_segments(&self) -> impl Iterator<Item = &str> {
        self.quasis.iter().map(|q| q.raw.as_str())
    }
}

pub fn collect_occurrences(module: &ParsedModule, tag: &str) -> Vec<Occurrence> {
    let mut collector = Collector {
        module,
        tag,
        found: Vec::new(),
    };
    collector.visit_program(&module.program);
    collector.found
}

struct Collector<'a> {
    module: &'a ParsedModule,
    tag: &'a str,
    found: Vec<Occurrence>,
}

impl Visit for Collector<'_> {
    fn visit_tagged_template(&mut self, tagged: &TaggedTemplate) {
        if matches!(&*tagged.tag, Expr::Ident(id) if id.name == self.tag) {
            self.found.push(Occurrence {
                span: tagged.span,
                file: self.module.filename.clone(),
                location: self.module.location(tagged.span),
                quasis: tagged.quasi.quasis.clone(),
                expressions: tagged.quasi.expressions.clone(),
            });
        }
        visit::walk_tagged_template(self, tagged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::parse_module;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_collects_in_source_order() {
        let src = "const a = css`.a { color: ${red}; }`;\nfunction f() { return css`.b {}`; }";
        let module = parse_module(src, "a.tsx").unwrap();
        let found = collect_occurrences(&module, "css");

        assert_eq!(found.len(), 2);
        assert_eq!(
            found[0].raw_segments().collect::<Vec<_>>(),
            vec![".a { color: ", "; }"]
        );
        assert_eq!(found[0].expressions.len(), 1);
        assert_eq!(found[0].location, SourceLocation { line: 1, column: 11 });
        assert_eq!(found[1].raw_segments().collect::<Vec<_>>(), vec![".b {}"]);
        assert_eq!(found[1].location.line, 2);
    }

    #[test]
    fn test_skips_other_tags() {
        let src = "a = styles.css`.x {}`; b = css()`.y {}`; c = html`.z {}`; d = css`.w {}`;";
        let module = parse_module(src, "a.js").unwrap();
        let found = collect_occurrences(&module, "css");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].quasis[0].raw, ".w {}");
    }

    #[test]
    fn test_nested_occurrence_after_outer() {
        let src = "a = css`.x { ${css`.inner {}`} }`;";
        let module = parse_module(src, "a.js").unwrap();
        let found = collect_occurrences(&module, "css");
        assert_eq!(found.len(), 2);
        assert!(found[0].span.contains(found[1].span));
    }

    #[test]
    fn test_raw_segments_keep_escapes() {
        let src = r"a = css`.x::before { content: '\2014'; }`;";
        let module = parse_module(src, "a.js").unwrap();
        let found = collect_occurrences(&module, "css");
        assert_eq!(found[0].quasis[0].raw, r".x::before { content: '\2014'; }");
    }
}
