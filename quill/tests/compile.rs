use quill::{Engine, Env, Error, Value, artifact_name};
use quill_il::decode;
use quill_testhelpers::{TemplateDir, setup};

fn engine(dir: &TemplateDir, debug: bool) -> Engine {
    Engine::new(Env::new(dir.root().to_path_buf()).with_debug(debug)).unwrap()
}

#[tokio::test]
async fn unchanged_sources_are_not_recompiled() {
    setup();
    let dir = TemplateDir::new();
    dir.write("page.html", "Hello {{ name }}");
    dir.set_mtime("page.html", 100);
    let engine = engine(&dir, false);

    let first = engine.compile("page").await.unwrap();
    assert!(first.recompiled);
    assert_eq!(first.name, "/page");
    assert_eq!(first.path, dir.cache().join(artifact_name("/page")));

    let second = engine.compile("/page.html").await.unwrap();
    assert!(!second.recompiled);
    assert_eq!(second.path, first.path);

    dir.set_mtime("page.html", 200);
    let third = engine.compile("page").await.unwrap();
    assert!(third.recompiled);

    let bytes = std::fs::read(&third.path).unwrap();
    let (header, _) = decode(&bytes).unwrap();
    assert_eq!(header.mtime, 200_000);
    assert_eq!(header.source, "/page");
}

#[tokio::test]
async fn debug_mode_always_recompiles() {
    setup();
    let dir = TemplateDir::new();
    dir.write("page.html", "x");
    let engine = engine(&dir, true);
    assert!(engine.compile("page").await.unwrap().recompiled);
    assert!(engine.compile("page").await.unwrap().recompiled);
}

#[tokio::test]
async fn extensions_are_tried_in_order() {
    setup();
    let dir = TemplateDir::new();
    dir.write("a.html", "html");
    dir.write("a.quill", "quill");
    dir.write("notes.txt", "plain {{ 1 + 1 }}");
    let engine = engine(&dir, false);
    assert_eq!(engine.render("a", Value::Null).await.unwrap(), "quill");
    assert_eq!(engine.render("notes.txt", Value::Null).await.unwrap(), "plain 2");
}

#[tokio::test]
async fn byte_order_marks_are_stripped() {
    setup();
    let dir = TemplateDir::new();
    dir.write("bom.html", "\u{feff}Hi");
    let out = engine(&dir, false).render("bom", Value::Null).await.unwrap();
    assert_eq!(out, "Hi");
}

#[tokio::test]
async fn failed_compiles_leave_no_artifact() {
    setup();
    let dir = TemplateDir::new();
    dir.write("bad.html", "{{ for x }}");
    let err = engine(&dir, false).compile("bad").await.unwrap_err();
    assert!(matches!(err, Error::Syntax { .. }), "{err:?}");
    assert!(!dir.cache().join(artifact_name("/bad")).exists());
}

#[tokio::test]
async fn corrupt_artifacts_are_rebuilt() {
    setup();
    let dir = TemplateDir::new();
    dir.write("page.html", "ok");
    let engine = engine(&dir, false);
    let compiled = engine.compile("page").await.unwrap();
    std::fs::write(&compiled.path, b"garbage").unwrap();

    let again = engine.compile("page").await.unwrap();
    assert!(again.recompiled);
    assert_eq!(engine.render("page", Value::Null).await.unwrap(), "ok");
}

#[tokio::test]
async fn invalid_configuration_is_rejected() {
    setup();
    let env = Env::new("site").with_extensions(Vec::<String>::new());
    assert!(matches!(Engine::new(env), Err(Error::Config(_))));
}
