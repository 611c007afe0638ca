use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mender_core::FileSnapshot;
use mender_engine::{decode_response, merge_edit_set, repair_truncated, stream_status};

fn synthetic_envelope(file_count: usize) -> String {
    let mut files = serde_json::Map::with_capacity(file_count);
    for i in 0..file_count {
        let body = (0..40)
            .map(|line| format!("export const value_{i}_{line} = \"{line}\";\n"))
            .collect::<String>();
        files.insert(
            format!("src/feature_{:03}/file_{i:05}.ts", i % 40),
            serde_json::Value::String(body),
        );
    }
    serde_json::json!({ "files": files, "explanation": "synthetic" }).to_string()
}

/// A large envelope cut off in the middle of its last file body.
fn truncated_envelope(file_count: usize) -> String {
    let full = synthetic_envelope(file_count);
    let cut = full.len() - full.len() / (file_count * 2);
    let mut cut = cut;
    while !full.is_char_boundary(cut) {
        cut -= 1;
    }
    full[..cut].to_string()
}

fn nested_payload(depth: usize) -> String {
    let mut text = String::from("{\"files\": {\"a.json\": \"x\"}, \"tree\": ");
    for i in 0..depth {
        text.push_str(&format!("{{\"level{i}\": ["));
    }
    text.push_str("\"leaf");
    text
}

fn bench_decode(c: &mut Criterion) {
    let complete = synthetic_envelope(400);
    c.bench_function("decode_complete_envelope", |b| {
        b.iter(|| {
            let set = decode_response(black_box(&complete)).expect("decodes");
            black_box(set.files.len());
        });
    });

    let truncated = truncated_envelope(400);
    c.bench_function("decode_truncated_envelope", |b| {
        b.iter(|| {
            let set = decode_response(black_box(&truncated)).expect("decodes");
            black_box(set.truncated);
        });
    });

    c.bench_function("stream_status_truncated_envelope", |b| {
        b.iter(|| black_box(stream_status(black_box(&truncated), &[])));
    });
}

fn bench_repair(c: &mut Criterion) {
    let nested = nested_payload(2_000);
    c.bench_function("repair_deeply_nested", |b| {
        b.iter(|| {
            let repaired = repair_truncated(black_box(&nested), usize::MAX).expect("repairs");
            black_box(repaired.changed);
        });
    });
}

fn bench_merge(c: &mut Criterion) {
    let set = decode_response(&synthetic_envelope(400)).expect("decodes");
    let snapshot: FileSnapshot = set
        .files
        .iter()
        .map(|(path, content)| (path.clone(), content.replace("= \"1\"", "= \"one\"")))
        .collect();
    c.bench_function("merge_full_content_edit_set", |b| {
        b.iter(|| black_box(merge_edit_set(black_box(&snapshot), &set).stats));
    });
}

criterion_group!(perf_core, bench_decode, bench_repair, bench_merge);
criterion_main!(perf_core);
