use indoc::indoc;
use quill_il::ReferenceKind;

use super::*;
use crate::ast::LoopControl;

fn root(src: &str) -> Root {
    match parse(src, "/pages/index.html") {
        Ok(root) => root,
        Err(e) => panic!("{src:?} failed to parse: {e}"),
    }
}

fn expr(src: &str) -> String {
    let root = root(&format!("{{{{ {src} }}}}"));
    match &root.body[..] {
        [Node::Print(p)] => p.value.to_string(),
        other => panic!("expected a single print, got {other:?}"),
    }
}

fn parse_error(src: &str) -> ParseError {
    match parse(src, "/pages/index.html") {
        Err(SyntaxError::Parse(e)) => e,
        other => panic!("expected a parse error for {src:?}, got {other:?}"),
    }
}

#[test]
fn precedence_climbs_from_ternary_to_member_access() {
    quill_testhelpers::setup();
    assert_eq!(expr("1 + 2 * 3"), "(1 + (2 * 3))");
    assert_eq!(expr("(1 + 2) * 3"), "((1 + 2) * 3)");
    assert_eq!(expr("a ?? b || c && d"), "(((a ?? b) || c) && d)");
    assert_eq!(expr("a == b + 1"), "(a == (b + 1))");
    assert_eq!(expr("-a * b"), "((-a) * b)");
    assert_eq!(expr("x ? 1 : y ? 2 : 3"), "(x ? 1 : (y ? 2 : 3))");
    assert_eq!(expr("a.b(1)[2, 3]"), "a[\"b\"](1)[2, 3]");
    assert_eq!(expr("1.5 + 2"), "(1.5 + 2)");
    assert_eq!(expr("NULL"), "null");
}

#[test]
fn member_access_after_an_integer_is_not_a_float() {
    quill_testhelpers::setup();
    assert_eq!(expr("xs[0].name"), "xs[0][\"name\"]");
}

#[test]
fn unclosed_paren_in_if_is_reported_at_the_keyword() {
    quill_testhelpers::setup();
    let err = parse_error("{{ if (true }}");
    assert_eq!((err.line, err.column), (1, 4));
    assert!(err.message.contains("`)`"), "{}", err.message);
}

#[test]
fn print_statements_and_filters() {
    quill_testhelpers::setup();
    let root = root("{{ !x | upper | pad(3) | join = (\",\", 1); y }}");
    let [Node::Print(raw), Node::Print(escaped)] = &root.body[..] else {
        panic!("{:?}", root.body);
    };
    assert!(!raw.escape);
    assert!(escaped.escape);
    let filters: Vec<_> = raw
        .filters
        .iter()
        .map(|f| (f.name.as_str(), f.args.len()))
        .collect();
    assert_eq!(filters, [("upper", 0), ("pad", 1), ("join", 2)]);
}

#[test]
fn whitespace_only_lines_between_tags_are_dropped() {
    quill_testhelpers::setup();
    let root = root(indoc! {"
        {{ set a = 1 }}
        {{ set b = 2 }}
        a {{ a }}
    "});
    let kinds: Vec<_> = root
        .body
        .iter()
        .map(|n| match n {
            Node::Set(_) => "set",
            Node::Print(p) if matches!(*p.value, Node::Data(..)) => "data",
            Node::Print(_) => "print",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, ["set", "set", "data", "print"]);
}

#[test]
fn if_chain_keeps_elif_and_else() {
    quill_testhelpers::setup();
    let root = root("{{ if a }}1{{ elif b }}2{{ elif c }}3{{ else }}4{{ /if }}");
    let [Node::If(chain)] = &root.body[..] else {
        panic!("{:?}", root.body);
    };
    assert_eq!(chain.branches.len(), 3);
    assert_eq!(chain.branches[1].condition.to_string(), "b");
    assert_eq!(chain.branches[2].pos, Pos::new(1, 28));
    assert_eq!(chain.otherwise.as_ref().map(Vec::len), Some(1));
}

#[test]
fn for_with_key_and_else() {
    quill_testhelpers::setup();
    let root = root("{{ for k, v : items }}{{ k }}{{ break }}{{ else }}none{{ /for }}");
    let [Node::For(l)] = &root.body[..] else {
        panic!("{:?}", root.body);
    };
    assert_eq!(l.key.as_deref(), Some("k"));
    assert_eq!(l.value, "v");
    assert_eq!(l.body.len(), 2);
    assert!(matches!(l.body[1], Node::Break(LoopControl::Break, _)));
    assert!(l.otherwise.is_some());
}

#[test]
fn blocks_and_layout_are_hoisted() {
    quill_testhelpers::setup();
    let root = root(indoc! {r#"
        {{ layout "../base" }}
        {{ block title }}Hi{{ /block }}
        {{ #title }}{{ #body x=1, y=2 }}
    "#});
    assert_eq!(root.layout.as_ref().map(|l| l.src.as_str()), Some("/base"));
    assert_eq!(root.blocks.len(), 1);
    assert_eq!(root.blocks[0].id, "title");
    let [Node::BlockCall(title), Node::BlockCall(body)] = &root.body[..] else {
        panic!("{:?}", root.body);
    };
    assert!(title.params.is_empty());
    assert_eq!(body.id, "body");
    assert_eq!(body.params.len(), 2);
}

#[test]
fn references_resolve_against_the_including_file() {
    quill_testhelpers::setup();
    let root = root(r#"{{ include "nav.html"; require "/lib/macros" }}"#);
    let refs: Vec<_> = root
        .body
        .iter()
        .filter_map(|n| match n {
            Node::Reference(r) => Some((r.kind, r.src.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(
        refs,
        [
            (ReferenceKind::Include, "/pages/nav.html"),
            (ReferenceKind::Require, "/lib/macros"),
        ]
    );
}

#[test]
fn literal_region_prints_verbatim() {
    quill_testhelpers::setup();
    let root = root("{{ literal }}{{ x }}{{ /literal }}");
    let [Node::Print(p)] = &root.body[..] else {
        panic!("{:?}", root.body);
    };
    assert_eq!(*p.value, Node::Data("{{ x }}".into(), Pos::new(1, 1)));
    assert!(!p.escape);
}

#[test]
fn structural_errors() {
    quill_testhelpers::setup();
    let cases = [
        ("{{ layout \"a\" }}{{ layout \"b\" }}", (1, 20), "one layout"),
        ("{{ block a }}{{ /block }}{{ block a }}{{ /block }}", (1, 29), "twice"),
        ("{{ if x }}{{ block a }}{{ /block }}{{ /if }}", (1, 14), "top level"),
        ("{{ break }}", (1, 4), "outside of a loop"),
        ("{{ if x }}{{ continue }}{{ /if }}", (1, 14), "outside of a loop"),
        ("x{{ else }}", (1, 5), "unexpected `else`"),
        ("{{ /for }}", (1, 4), "closing tag"),
        ("\n  {{ for x : xs }}abc", (2, 6), "never closed"),
        ("{{ x ", (1, 1), "never closed"),
        ("{{ set = 1 }}", (1, 4), "in `set` tag"),
    ];
    for (src, (line, column), needle) in cases {
        let err = parse_error(src);
        assert_eq!((err.line, err.column), (line, column), "{src:?}: {err}");
        assert!(err.message.contains(needle), "{src:?}: {err}");
    }
}

#[test]
fn lexer_errors_surface_unchanged() {
    quill_testhelpers::setup();
    let err = parse("{{ \"open }}", "/x").unwrap_err();
    assert!(matches!(err, SyntaxError::Lex(_)), "{err:?}");
}

#[test]
fn custom_tags_can_be_registered() {
    quill_testhelpers::setup();
    fn shout(tag: Token, p: &mut Parser<'_>) -> Result<Node, SyntaxError> {
        let value = p.parse_expression()?;
        p.expect_boundary()?;
        Ok(Node::Print(Print {
            value: Box::new(value),
            escape: false,
            filters: vec![Filter {
                name: "upper".into(),
                args: Vec::new(),
                pos: tag.pos(),
            }],
            pos: tag.pos(),
        }))
    }
    let mut tags = TagTable::builtin();
    tags.register("shout", shout);
    let root = Parser::new("{{ shout name }}", "/x", &tags).parse().unwrap();
    let [Node::Print(p)] = &root.body[..] else {
        panic!("{:?}", root.body);
    };
    assert_eq!(p.filters[0].name, "upper");
}
