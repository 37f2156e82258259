use indoc::indoc;
use quill::{Engine, Env, Error, Object, Value};
use quill_syntax::SyntaxError;
use quill_testhelpers::{TemplateDir, setup};

fn engine(dir: &TemplateDir) -> Engine {
    Engine::new(Env::new(dir.root().to_path_buf())).unwrap()
}

async fn render(dir: &TemplateDir, name: &str, data: Value) -> String {
    engine(dir).render(name, data).await.unwrap()
}

#[tokio::test]
async fn hello_world() {
    setup();
    let dir = TemplateDir::new();
    dir.write("hello.html", "Hello {{ name }}!");
    let out = render(&dir, "hello", Value::map([("name", "World")])).await;
    assert_eq!(out, "Hello World!");
}

#[tokio::test]
async fn loops_over_a_range() {
    setup();
    let dir = TemplateDir::new();
    dir.write("count.html", "{{ for i : range(0,3) }}{{i}},{{ /for }}");
    assert_eq!(render(&dir, "count", Value::Null).await, "0,1,2,");
}

#[tokio::test]
async fn branches() {
    setup();
    let dir = TemplateDir::new();
    dir.write("size.html", "{{ if x > 1 }}big{{ else }}small{{ /if }}");
    let engine = engine(&dir);
    let small = engine.render("size", Value::map([("x", 0)])).await.unwrap();
    let big = engine.render("size", Value::map([("x", 5)])).await.unwrap();
    assert_eq!((small.as_str(), big.as_str()), ("small", "big"));
}

#[tokio::test]
async fn elif_chains() {
    setup();
    let dir = TemplateDir::new();
    dir.write(
        "grade.html",
        "{{ if n >= 90 }}A{{ elif n >= 80 }}B{{ elif n >= 70 }}C{{ else }}F{{ /if }}",
    );
    let engine = engine(&dir);
    let mut grades = String::new();
    for n in [95, 85, 75, 10] {
        grades += &engine.render("grade", Value::map([("n", n)])).await.unwrap();
    }
    assert_eq!(grades, "ABCF");
}

#[tokio::test]
async fn child_blocks_fill_the_layout() {
    setup();
    let dir = TemplateDir::new();
    dir.write("base.html", "[{{ #content }}]");
    dir.write(
        "child.html",
        "{{ layout \"base\" }}{{ block content }}Child{{ /block }}",
    );
    assert_eq!(render(&dir, "child", Value::Null).await, "[Child]");
}

#[tokio::test]
async fn layout_runs_the_child_body_and_keeps_its_defaults() {
    setup();
    let dir = TemplateDir::new();
    dir.write(
        "layouts/base.html",
        indoc! {"
            {{ block title }}Untitled{{ /block }}
            <title>{{ #title }}</title>
            <main>{{ #body }}</main>
            <footer>{{ #footer }}</footer>
        "},
    );
    dir.write(
        "pages/about.html",
        indoc! {r#"
            {{ layout "../layouts/base" }}
            {{ block footer }}(c) {{ year }}{{ /block }}
            About {{ name }}
        "#},
    );
    let out = render(
        &dir,
        "pages/about",
        Value::map([("name", Value::from("us")), ("year", Value::from(2024))]),
    )
    .await;
    assert_eq!(
        out,
        "\n<title>Untitled</title>\n<main>\nAbout us</main>\n<footer>(c) 2024</footer>\n"
    );
}

#[tokio::test]
async fn includes_inside_loops_keep_the_loop_going() {
    setup();
    let dir = TemplateDir::new();
    dir.write("part.html", "{{ a ?? 'd' }}{{ b || '-' }}");
    dir.write("page.html", "{{ for x : xs }}{{ x }}{{ include 'part' }}{{ /for }}");
    let out = render(&dir, "page", Value::map([("xs", vec![1, 2, 3])])).await;
    assert_eq!(out, "1d-2d-3d-");
}

#[tokio::test]
async fn layout_loops_call_child_blocks() {
    setup();
    let dir = TemplateDir::new();
    dir.write("list.html", "{{ for x : xs }}{{ x }}{{ #item }}{{ /for }}");
    dir.write(
        "page.html",
        "{{ layout 'list' }}{{ block item }}{{ u || '-' }}{{ for c : 'ab' }}{{ c }}{{ /for }}{{ /block }}",
    );
    let out = render(&dir, "page", Value::map([("xs", vec![1, 2, 3])])).await;
    assert_eq!(out, "1-ab2-ab3-ab");
}

#[tokio::test]
async fn layouts_chain() {
    setup();
    let dir = TemplateDir::new();
    dir.write("outer.html", "<{{ #body }}|{{ #a }}>");
    dir.write("inner.html", "{{ layout 'outer' }}{{ block a }}inner{{ /block }}({{ #body }})");
    dir.write("page.html", "{{ layout 'inner' }}{{ block a }}page{{ /block }}text");
    assert_eq!(render(&dir, "page", Value::Null).await, "<(text)|page>");
}

#[tokio::test]
async fn malformed_templates_fail_at_the_tag() {
    setup();
    let dir = TemplateDir::new();
    dir.write("bad.html", "{{ if (true }}");
    let err = engine(&dir).render("bad", Value::Null).await.unwrap_err();
    let (template, parse) = match err {
        Error::Syntax {
            template,
            source: SyntaxError::Parse(parse),
        } => (template, parse),
        other => panic!("expected a parse error, got {other:?}"),
    };
    assert_eq!(template, "/bad");
    assert_eq!((parse.line, parse.column), (1, 4));
}

#[tokio::test]
async fn nested_scopes_do_not_leak() {
    setup();
    let dir = TemplateDir::new();
    dir.write(
        "scope.html",
        "{{ set x = 1 }}{{ if true }}{{ x }}{{ set x = 2 }}{{ set y = 3 }}{{ x }}{{ /if }}|{{ x }}{{ y }}",
    );
    assert_eq!(render(&dir, "scope", Value::Null).await, "12|1");

    dir.write(
        "loop.html",
        "{{ for i : range(2) }}{{ set last = i }}{{ /for }}[{{ last }}{{ i }}]",
    );
    assert_eq!(render(&dir, "loop", Value::Null).await, "[]");
}

#[tokio::test]
async fn key_value_loops_and_else() {
    setup();
    let dir = TemplateDir::new();
    dir.write(
        "kv.html",
        "{{ for k, v : items }}{{ k }}={{ v }};{{ else }}none{{ /for }}",
    );
    let engine = engine(&dir);
    let map = Value::map([("items", Value::map([("b", 2), ("c", 3), ("a", 1)]))]);
    assert_eq!(engine.render("kv", map).await.unwrap(), "a=1;b=2;c=3;");

    let list = Value::map([("items", Value::from(vec!["x", "y"]))]);
    assert_eq!(engine.render("kv", list).await.unwrap(), "0=x;1=y;");

    let empty = Value::map([("items", Value::List(vec![]))]);
    assert_eq!(engine.render("kv", empty).await.unwrap(), "none");
    assert_eq!(engine.render("kv", Value::Null).await.unwrap(), "none");
}

#[tokio::test]
async fn break_and_continue() {
    setup();
    let dir = TemplateDir::new();
    dir.write(
        "ctl.html",
        indoc! {"
            {{ for i : range(10) }}
              {{ if i == 1 }}{{ continue }}{{ /if }}
              {{ if i > 3 }}{{ if true }}{{ break }}{{ /if }}{{ /if }}
              {{ i }}
            {{ /for }}
        "},
    );
    let out = render(&dir, "ctl", Value::Null).await;
    assert_eq!(out.split_whitespace().collect::<String>(), "023");

    dir.write(
        "nested.html",
        "{{ for a : range(3) }}{{ for b : range(3) }}{{ if b > a }}{{ break }}{{ /if }}{{ a }}{{ b }} {{ /for }}{{ /for }}",
    );
    assert_eq!(
        render(&dir, "nested", Value::Null).await,
        "00 10 11 20 21 22 "
    );
}

#[tokio::test]
async fn coalesce_only_replaces_null() {
    setup();
    let dir = TemplateDir::new();
    dir.write(
        "nc.html",
        "{{ missing ?? 'd' }}|{{ zero ?? 'd' }}|{{ empty ?? 'd' }}|{{ no ?? 'd' }}|{{ nil ?? zero }}",
    );
    let data = Value::map([
        ("zero", Value::from(0)),
        ("empty", Value::from("")),
        ("no", Value::from(false)),
    ]);
    assert_eq!(render(&dir, "nc", data).await, "d|0||false|0");
}

#[tokio::test]
async fn logical_operators_short_circuit() {
    setup();
    let dir = TemplateDir::new();
    dir.write(
        "logic.html",
        "{{ 0 || 'b' }}|{{ 'a' && 'b' }}|{{ 0 && boom() }}|{{ 'a' || boom() }}|{{ n > 1 ? 'many' : 'one' }}",
    );
    let out = render(&dir, "logic", Value::map([("n", 1)])).await;
    assert_eq!(out, "b|b|0|a|one");
}

#[tokio::test]
async fn arithmetic_and_members() {
    setup();
    let dir = TemplateDir::new();
    dir.write(
        "math.html",
        "{{ 1 + 2 * 3 }} {{ (1 + 2) * 3 }} {{ 7 / 2 }} {{ 6 / 3 }} {{ -x }} {{ 1.5 + 1 }} {{ 'n' + 1 }} {{ xs[1] }} {{ xs[-1] }} {{ user.name }} {{ user['name'] }}",
    );
    let data = Value::map([
        ("x", Value::from(4)),
        ("xs", Value::from(vec![10, 20, 30])),
        ("user", Value::map([("name", "ada")])),
    ]);
    assert_eq!(
        render(&dir, "math", data).await,
        "7 9 3.5 2 -4 2.5 n1 20 30 ada ada"
    );
}

#[tokio::test]
async fn filters_are_calls() {
    setup();
    let dir = TemplateDir::new();
    dir.write(
        "filters.html",
        "{{ name | upper }}|{{ items | len }}|{{ 'a' | str = ('b', 'c') }}|{{ 5 | str('x') }}|{{ 'q' | str = 1 | upper }}",
    );
    let mut env = Env::new(dir.root().to_path_buf());
    env.register_fn("upper", |args| {
        let text = args.first().map(Value::render_to_string).unwrap_or_default();
        Ok(Value::from(text.to_uppercase()))
    });
    let engine = Engine::new(env).unwrap();
    let data = Value::map([
        ("name", Value::from("world")),
        ("items", Value::from(vec![1, 2, 3])),
    ]);
    assert_eq!(
        engine.render("filters", data).await.unwrap(),
        "WORLD|3|abc|5x|Q1"
    );
}

#[tokio::test]
async fn escaping_raw_output_and_literals() {
    setup();
    let dir = TemplateDir::new();
    dir.write(
        "esc.html",
        "{{ html }}|{{ !html }}|{{ literal }}{{ html }}{{ /literal }}",
    );
    let out = render(&dir, "esc", Value::map([("html", "<i>&</i>")])).await;
    assert_eq!(out, "&lt;i&gt;&amp;&lt;/i&gt;|<i>&</i>|{{ html }}");
}

#[tokio::test]
async fn includes_share_the_scope() {
    setup();
    let dir = TemplateDir::new();
    dir.write("partials/nav.html", "<nav>{{ title }}</nav>");
    dir.write(
        "pages/index.html",
        "{{ include \"../partials/nav\" }}|{{ include '/partials/nav' }}|{{ title }}",
    );
    let out = render(&dir, "pages/index", Value::map([("title", "T")])).await;
    assert_eq!(out, "<nav>T</nav>|<nav>T</nav>|T");
}

#[tokio::test]
async fn required_blocks_take_parameters() {
    setup();
    let dir = TemplateDir::new();
    dir.write("lib.html", "{{ block greet }}Hi {{ who }}{{ /block }}ignored");
    dir.write(
        "page.html",
        "{{ require 'lib' }}{{ #greet who='Ada' }}[{{ who }}]{{ #greet }}",
    );
    assert_eq!(render(&dir, "page", Value::Null).await, "Hi Ada[]Hi ");
}

#[tokio::test]
async fn missing_blocks_are_skipped() {
    setup();
    let dir = TemplateDir::new();
    dir.write("holes.html", "a{{ #nothing }}{{ #body }}b");
    assert_eq!(render(&dir, "holes", Value::Null).await, "ab");
}

#[tokio::test]
async fn variables_ignore_case() {
    setup();
    let dir = TemplateDir::new();
    dir.write(
        "case.html",
        "{{ username }}{{ USERNAME }}{{ set Total = 1 }}{{ total }}|{{ viewdata.UserName }}",
    );
    let out = render(&dir, "case", Value::map([("UserName", "ada")])).await;
    assert_eq!(out, "adaada1|ada");
}

#[tokio::test]
async fn strict_mode_reports_unbound_variables() {
    setup();
    let dir = TemplateDir::new();
    dir.write("strict.html", "ok\n{{ missing }}");
    let engine = Engine::new(Env::new(dir.root().to_path_buf()).with_strict_mode(true)).unwrap();
    let err = engine.render("strict", Value::Null).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "variable `missing` is not defined (at /strict:2)"
    );
}

#[tokio::test]
async fn unknown_functions_are_errors() {
    setup();
    let dir = TemplateDir::new();
    dir.write("call.html", "{{ nope(1) }}");
    let err = engine(&dir).render("call", Value::Null).await.unwrap_err();
    assert!(matches!(err, Error::Runtime { .. }), "{err:?}");
}

#[tokio::test]
async fn missing_templates_are_resolution_errors() {
    setup();
    let dir = TemplateDir::new();
    dir.write("page.html", "{{ include 'gone' }}");
    let engine = engine(&dir);

    let err = engine.render("absent", Value::Null).await.unwrap_err();
    assert!(
        matches!(&err, Error::Resolution { name, .. } if name == "/absent"),
        "{err:?}"
    );
    let err = engine.render("page", Value::Null).await.unwrap_err();
    assert!(
        matches!(&err, Error::Resolution { name, .. } if name == "/gone"),
        "{err:?}"
    );
}

#[derive(Debug)]
struct User;

impl Object for User {
    fn member(&self, name: &str) -> Value {
        match name {
            "name" => Value::from("grace"),
            _ => Value::Null,
        }
    }

    fn iterate(&self) -> Option<Vec<(Value, Value)>> {
        Some(vec![
            (Value::from("id"), Value::from(7)),
            (Value::from("name"), Value::from("grace")),
        ])
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(name, "greet" | "fail")
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value, Error> {
        match name {
            "greet" => {
                let times = match args {
                    [Value::Int(n)] => *n,
                    _ => 1,
                };
                Ok(Value::from("hi ".repeat(times.max(0) as usize)))
            }
            _ => Err(Error::runtime(format!("`{name}` failed"))),
        }
    }
}

#[tokio::test]
async fn host_objects() {
    setup();
    let dir = TemplateDir::new();
    dir.write(
        "obj.html",
        "{{ user.name }}|{{ user.missing }}|{{ for k, v : user }}{{ k }}:{{ v }} {{ /for }}",
    );
    let out = render(&dir, "obj", Value::map([("user", Value::object(User))])).await;
    assert_eq!(out, "grace||id:7 name:grace ");
}

#[tokio::test]
async fn host_object_methods() {
    setup();
    let dir = TemplateDir::new();
    dir.write("greet.html", "{{ user.greet(2) }}|{{ user.greet() }}|{{ user.name() }}");
    dir.write("fail.html", "\n{{ user.fail() }}");
    let data = || Value::map([("user", Value::object(User))]);
    assert_eq!(render(&dir, "greet", data()).await, "hi hi |hi |");

    let err = engine(&dir).render("fail", data()).await.unwrap_err();
    assert_eq!(err.to_string(), "`fail` failed (at /fail:2)");
}

#[tokio::test]
async fn json_data() {
    setup();
    let dir = TemplateDir::new();
    dir.write(
        "json.html",
        "{{ for p : posts }}{{ p.title }}{{ if p.draft }}*{{ /if }};{{ /for }}",
    );
    let data = serde_json::json!({
        "posts": [
            {"title": "one", "draft": false},
            {"title": "two", "draft": true},
        ]
    });
    assert_eq!(render(&dir, "json", data.into()).await, "one;two*;");
}

#[tokio::test]
async fn renders_are_deterministic_and_independent() {
    setup();
    let dir = TemplateDir::new();
    dir.write("page.html", "{{ for k, v : m }}{{ k }}{{ v }}{{ /for }}{{ set z = 1 }}");
    let engine = engine(&dir);
    let data = || Value::map([("m", Value::map([("y", 2), ("x", 1)]))]);
    let (a, b) = tokio::join!(engine.render("page", data()), engine.render("page", data()));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a, "x1y2");
    assert_eq!(a, b);
}
