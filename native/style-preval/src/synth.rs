//! Program Synthesizer
//!
//! Builds the throwaway evaluation program for one file: the hoisted working
//! copy, an error-catching wrapper, and one exported array holding a wrapped
//! thunk per lazy expression in first-seen order:
//!
//! ```text
//! <working copy, occurrences replaced by {}>
//! const _wrap = (fn) => { try { return fn(); } catch (e) { return e; } };
//! exports.__preval = [_wrap(() => e0), _wrap(() => e1)];
//! ```

use std::collections::HashSet;

use crate::ast::*;
use crate::printer::print_program;
use crate::scope::ScopeAnalysis;
use crate::visit::{self, with_expr_mut, VisitMut};

/// Export member carrying the thunk results.
pub const PREVAL_EXPORT: &str = "__preval";

#[derive(Debug, Clone, PartialEq)]
pub struct Synthesized {
    pub code: String,
    pub wrapper_name: String,
}

/// `_wrap`, else `wrap_1`, `wrap_2`, ... whichever no binding uses.
pub fn free_wrapper_name(used: &HashSet<String>) -> String {
    let mut name = "_wrap".to_string();
    let mut idx = 0;
    while used.contains(&name) {
        idx += 1;
        name = format!("wrap_{}", idx);
    }
    name
}

/// `source` is the file text the working copy was parsed from; nodes the
/// printer cannot express are copied from it verbatim.
pub fn synthesize(
    mut program: Program,
    lazy: &[Expr],
    occurrence_spans: &[Span],
    tag: &str,
    source: &str,
) -> Synthesized {
    // Top-level code must not invoke the marker tag.
    for span in occurrence_spans {
        with_expr_mut(&mut program, *span, |expr| *expr = empty_object());
    }

    let wrapper_name = free_wrapper_name(ScopeAnalysis::new(&program).all_names());

    let thunks = lazy
        .iter()
        .map(|expr| {
            let mut expr = expr.clone();
            ReplaceTagged { tag }.visit_expr(&mut expr);
            Some(ExprOrSpread::plain(Expr::call(
                Expr::ident(&wrapper_name),
                vec![Expr::arrow(Vec::new(), expr)],
            )))
        })
        .collect();

    program.body.push(wrapper(&wrapper_name));
    program.body.push(Stmt::Expr {
        span: Span::SYNTHETIC,
        expr: Expr::Assign {
            span: Span::SYNTHETIC,
            operator: AssignmentOperator::Assign,
            target: Box::new(Pattern::Expr(Box::new(Expr::static_member(
                Expr::ident("exports"),
                PREVAL_EXPORT,
            )))),
            value: Box::new(Expr::Array {
                span: Span::SYNTHETIC,
                elements: thunks,
            }),
        },
    });

    Synthesized {
        code: print_program(&program, Some(source)),
        wrapper_name,
    }
}

fn empty_object() -> Expr {
    Expr::Object {
        span: Span::SYNTHETIC,
        props: Vec::new(),
    }
}

/// `const <name> = (fn) => { try { return fn(); } catch (e) { return e; } };`
fn wrapper(name: &str) -> Stmt {
    let ret = |argument: Expr| Stmt::Return {
        span: Span::SYNTHETIC,
        argument: Some(argument),
    };
    let block = |body: Vec<Stmt>| Block {
        span: Span::SYNTHETIC,
        body,
    };
    let body = Stmt::Try(Box::new(TryStmt {
        span: Span::SYNTHETIC,
        block: block(vec![ret(Expr::call(Expr::ident("fn"), Vec::new()))]),
        handler: Some(CatchClause {
            span: Span::SYNTHETIC,
            param: Some(Pattern::Ident(Ident::synthetic("e"))),
            body: block(vec![ret(Expr::ident("e"))]),
        }),
        finalizer: None,
    }));
    Stmt::const_decl(
        name,
        Expr::Arrow(Box::new(Arrow {
            span: Span::SYNTHETIC,
            params: vec![Pattern::Ident(Ident::synthetic("fn"))],
            body: ArrowBody::Block(vec![body]),
            is_async: false,
        })),
    )
}

struct ReplaceTagged<'a> {
    tag: &'a str,
}

impl VisitMut for ReplaceTagged<'_> {
    fn visit_expr(&mut self, expr: &mut Expr) {
        if let Expr::TaggedTemplate(tagged) = expr {
            if matches!(&*tagged.tag, Expr::Ident(id) if id.name == self.tag) {
                *expr = empty_object();
                return;
            }
        }
        visit::walk_expr_mut(self, expr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::collect_occurrences;
    use crate::hoist::Hoister;
    use crate::lower::parse_module;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wrapper_name_probing() {
        let mut used = HashSet::new();
        assert_eq!(free_wrapper_name(&used), "_wrap");
        used.insert("_wrap".to_string());
        assert_eq!(free_wrapper_name(&used), "wrap_1");
        used.insert("wrap_1".to_string());
        assert_eq!(free_wrapper_name(&used), "wrap_2");
    }

    #[test]
    fn test_synthesized_program() {
        let src = "import { theme } from './theme';\nfunction Card() {\n  const color = theme.fg;\n  return css`.a { color: ${color}; padding: ${theme.pad}; }`;\n}\nexport default Card;";
        let module = parse_module(src, "card.tsx").unwrap();
        let occurrence = &collect_occurrences(&module, "css")[0];
        let mut hoister = Hoister::new(&module.program);
        let lazy: Vec<Expr> = occurrence
            .expressions
            .iter()
            .map(|e| hoister.hoist(e))
            .collect();

        let synthesized = synthesize(
            hoister.into_program(),
            &lazy,
            &[occurrence.span],
            "css",
            src,
        );
        assert_eq!(synthesized.wrapper_name, "_wrap");
        assert_eq!(
            synthesized.code,
            concat!(
                "import { theme } from \"./theme\";\n",
                "const _color = theme.fg;\n",
                "function Card() {\n",
                "  const color = _color;\n",
                "  return {};\n",
                "}\n",
                "export default Card;\n",
                "const _wrap = (fn) => {\n",
                "  try {\n",
                "    return fn();\n",
                "  } catch (e) {\n",
                "    return e;\n",
                "  }\n",
                "};\n",
                "exports.__preval = [_wrap(() => _color), _wrap(() => theme.pad)];\n",
            )
        );
    }

    #[test]
    fn test_wrapper_avoids_collision() {
        let src = "const _wrap = 1;\nconst a = css`${f()}`;";
        let module = parse_module(src, "a.js").unwrap();
        let occurrence = &collect_occurrences(&module, "css")[0];
        let synthesized = synthesize(
            module.program.clone(),
            &occurrence.expressions,
            &[occurrence.span],
            "css",
            src,
        );
        assert_eq!(synthesized.wrapper_name, "wrap_1");
        assert!(synthesized
            .code
            .ends_with("exports.__preval = [wrap_1(() => f())];\n"));
    }

    #[test]
    fn test_nested_occurrences_never_call_tag() {
        let src = "const a = css`${x ? css`.in {}` : ''}`;";
        let module = parse_module(src, "a.js").unwrap();
        let outer = &collect_occurrences(&module, "css")[0];
        let synthesized =
            synthesize(module.program.clone(), &outer.expressions, &[outer.span], "css", src);
        assert!(!synthesized.code.contains("css`"));
    }
}
