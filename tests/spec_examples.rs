use serde::Deserialize;
use std::fs;

use treemark::markdown_to_html;

#[derive(Debug, Deserialize)]
struct SpecExample {
    markdown: String,
    html: String,
    example: u32,
    section: String,
}

#[test]
fn commonmark_spec_examples() {
    let data = fs::read_to_string("tests/data/spec_examples.json")
        .expect("Failed to read spec_examples.json");
    let examples: Vec<SpecExample> =
        serde_json::from_str(&data).expect("Failed to parse spec_examples.json");

    let mut failures = Vec::new();
    for example in &examples {
        let result = markdown_to_html(&example.markdown);
        if result != example.html {
            eprintln!("\nExample {} failed ({})", example.example, example.section);
            eprintln!("  Input:    {:?}", example.markdown);
            eprintln!("  Expected: {:?}", example.html);
            eprintln!("  Got:      {:?}", result);
            failures.push(example.example);
        }
    }
    assert!(
        failures.is_empty(),
        "{} of {} spec examples failed: {:?}",
        failures.len(),
        examples.len(),
        failures
    );
}
