//! Quick benchmark to verify template compile/render and pattern extraction performance

use rustc_hash::FxHashMap;
use serde_json::json;
use std::time::Instant;
use tessera::binding::TokenPattern;
use tessera::template::{self, vdom, RenderScope};

fn main() {
    let model = json!({
        "title": "Dashboard",
        "data": {
            "name": "Widget",
            "width": 320,
            "height": 200,
            "items": [{"label": "a"}, {"label": "b"}, {"label": "c"}, {"label": "d"}],
        }
    });

    // Test templates of varying complexity
    let templates = vec![
        "<p>Simple text with no placeholders</p>",
        "<div id=\"label-{id}\">${name}</div>",
        "<div id=\"box\" style=\"width: ${width}px; height: ${height}px\">${name}</div>",
        "<h1>${model.title}</h1><ul><li id=\"item\" data-pos=\"${loop.index}\">${loop.value.label}</li></ul>",
        "<button id=\"go\" onclick=\"${_go}\">${name}</button><span>\\${literal}</span>",
    ];
    let methods = vec!["_go".to_string()];

    println!("Template Render Performance Test");
    println!("================================\n");

    // Warm up the compile cache
    for source in &templates {
        let _ = template::compile(source, &methods);
    }

    let mut loops = FxHashMap::default();
    loops.insert(
        "item".to_string(),
        model["data"]["items"].as_array().cloned().unwrap_or_default(),
    );
    let scope = RenderScope {
        model: &model,
        view_id: "w1",
        loops: &loops,
    };

    for source in &templates {
        let iterations = 20_000;

        let start = Instant::now();
        for _ in 0..iterations {
            let _ = template::compile(source, &methods);
        }
        let cached = start.elapsed();

        let compiled = template::compile(source, &methods).unwrap();
        let start = Instant::now();
        for _ in 0..iterations {
            let _ = vdom::to_html(&compiled.render(&scope));
        }
        let rendered = start.elapsed();

        println!("Template: {:60}", format!("\"{}\"", source));
        println!("  Cached compile per op: {:?}", cached / iterations);
        println!("  Render to HTML per op: {:?}\n", rendered / iterations);
    }

    println!("Token Pattern Extraction");
    println!("========================\n");

    let names = vec![
        "width".to_string(),
        "height".to_string(),
        "name".to_string(),
    ];
    let patterns = vec![
        ("{name}", "Widget"),
        ("width: {width}px", "width: 320px"),
        ("width: {width}px; height: {height}px", "width: 640px; height: 480px"),
    ];
    let iterations = 200_000;

    for (source, value) in &patterns {
        let pattern = TokenPattern::compile(source, &names).unwrap();
        let start = Instant::now();
        for _ in 0..iterations {
            let _ = pattern.extract(value);
        }
        let elapsed = start.elapsed();

        println!("Pattern: {:40} <- {:?}", format!("\"{}\"", source), value);
        println!("  Time for {} iterations: {:?}", iterations, elapsed);
        println!("  Per operation: {:?}\n", elapsed / iterations);
    }

    println!("Compiled templates cached: {}", template::cache_len());
}
