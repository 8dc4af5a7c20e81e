mod common;

use chariot::{
    Value,
    eval::EvalError,
    parser::{self, ParseError},
    runtime::Runtime,
};
use pretty_assertions::assert_eq;

async fn run(source: &str) -> Result<Value, EvalError> {
    common::SHARED_RUNTIME.run(source).await
}

#[tokio::test]
async fn test_inventory_report_over_csv() {
    let source = r#"
        // count the low-stock rows and build an XML summary
        declare(stock, 'T', parseCSV("sku,qty\nA-1,3\nB-2,40\nC-3,0\n"))
        declare(report, 'X', xmlNode('report'))
        declare(low, 'N', 0)
        declare(rows, 'A', getChildren(stock))
        declare(i, 'N', 0)
        declare(row, 'V')
        declare(item, 'X')
        while (smaller(i, length(rows))) {
            setq(row, getAt(rows, i))
            if (smaller(toNumber(getAttribute(row, 'qty')), 5)) {
                setq(low, add(low, 1))
                setq(item, xmlNode('item'))
                setAttribute(item, 'sku', getAttribute(row, 'sku'))
                addChild(report, item)
            }
            setq(i, add(i, 1))
        }
        setAttribute(report, 'low', low)
        toXML(report)
    "#;
    let xml = run(source).await.unwrap();
    let xml = xml.as_str().unwrap();
    assert!(xml.starts_with(r#"<report low="2">"#), "{}", xml);
    assert!(xml.contains(r#"<item sku="A-1"/>"#));
    assert!(xml.contains(r#"<item sku="C-3"/>"#));
    assert!(!xml.contains("B-2"));
}

#[tokio::test]
async fn test_json_tree_edit_and_export() {
    let source = r#"
        declare(doc, 'J', parseJSON('{"user": {"name": "ann"}}'))
        declare(user, 'V', findByName(doc, 'user'))
        setAttribute(user, 'name', 'bea')
        [getName(user), nodeDepth(user), toJSON(doc)]
    "#;
    assert_eq!(
        run(source).await.unwrap().to_json(),
        serde_json::json!(["user", 1, r#"{"user":{"name":"bea"}}"#])
    );
}

#[tokio::test]
async fn test_maps_and_closures_together() {
    let source = r#"
        declare(counts, 'M', map())
        declare(tally, 'F', func(word) {
            if (hasKey(counts, word)) {
                setValue(counts, word, add(getValue(counts, word), 1))
            } else {
                setValue(counts, word, 1)
            }
        })
        declare(words, 'A', ['a', 'b', 'a', 'c', 'a'])
        declare(i, 'N', 0)
        while (smaller(i, length(words))) {
            tally(getAt(words, i))
            setq(i, add(i, 1))
        }
        [getValue(counts, 'a'), getValue(counts, 'b'), length(keys(counts))]
    "#;
    assert_eq!(run(source).await.unwrap().to_string(), "[3, 1, 3]");
}

#[tokio::test]
async fn test_error_carries_position() {
    let runtime = Runtime::default();
    let error = runtime
        .run("declare(x, 'N', 1)\n\n  assign(x, 'not a number')")
        .await
        .unwrap_err();
    let position = error.position().unwrap();
    assert_eq!(position.file, "main.ch");
    assert_eq!((position.line, position.column), (3, 3));
    assert!(matches!(error.root(), EvalError::TypeMismatch { .. }));
}

#[tokio::test]
async fn test_program_runs_do_not_share_declarations() {
    let runtime = Runtime::default();
    runtime.run("declare(local, 'N', 1)").await.unwrap();
    assert_eq!(
        runtime.run("local").await.unwrap_err().root(),
        &EvalError::UnboundIdentifier("local".into())
    );

    runtime.run("declareGlobal(shared, 'N', 7)").await.unwrap();
    assert_eq!(runtime.run("shared").await.unwrap(), Value::Number(7.0));
}

#[test]
fn test_parse_errors() {
    assert!(matches!(
        parser::parse_program("if (true) { 1", "broken.ch"),
        Err(ParseError::UnexpectedEof { .. }) | Err(ParseError::Unexpected { .. })
    ));
    assert!(parser::parse_program("'unterminated", "broken.ch").is_err());
    assert!(parser::parse_program("func(a, b) { add(a, b) }", "ok.ch").is_ok());
}
