use criterion::{black_box, criterion_group, criterion_main, Criterion};

use chat2api::auth::{authenticate, build_allowed_key_set};
use chat2api::config::{AppConfig, ClientAuthConfig};
use chat2api::protocol::openai_chat::stream::ChunkEmitter;
use chat2api::stream::{EventClassifier, RecordParser, StreamEvent, Utf8Decoder};

fn upstream_body(deltas: usize) -> Vec<u8> {
    let mut body = String::from("event: openai_response_id\ndata: {\"id\":\"resp_bench\"}\n\n");
    for i in 0..deltas {
        body.push_str("data: {\"delta\":\"token ");
        body.push_str(&i.to_string());
        body.push_str(" \u{e9}\u{4e2d}\"}\n\n");
    }
    body.push_str("data: [DONE]\n\n");
    body.into_bytes()
}

fn bench_tokenize_and_classify(c: &mut Criterion) {
    let body = upstream_body(512);
    let classifier = EventClassifier::default();

    for chunk_size in [7_usize, 256, 4096] {
        c.bench_function(&format!("tokenize_classify_512_deltas_chunk_{chunk_size}"), |b| {
            b.iter(|| {
                let mut decoder = Utf8Decoder::new();
                let mut parser = RecordParser::new();
                let mut text = String::new();
                let mut records = Vec::new();
                let mut content_len = 0;
                for chunk in black_box(&body).chunks(chunk_size) {
                    text.clear();
                    decoder.decode_into(chunk, &mut text);
                    parser.feed_into(&text, &mut records);
                    for record in records.drain(..) {
                        if let StreamEvent::ContentDelta(delta) = classifier.classify(&record) {
                            content_len += delta.len();
                        }
                    }
                }
                black_box(content_len)
            });
        });
    }
}

fn bench_chunk_encoding(c: &mut Criterion) {
    let emitter = ChunkEmitter::with_identity(
        "chatcmpl-0123456789abcdef0123456789abcdef",
        "gpt-4o-mini",
        1_700_000_000,
    );
    c.bench_function("content_frame_short_delta", |b| {
        b.iter(|| black_box(emitter.content_frame(black_box("Hello, \"world\"\n"))));
    });
}

fn bench_authentication(c: &mut Criterion) {
    let config = AppConfig {
        client_authentication: ClientAuthConfig {
            allowed_keys: (0..64).map(|i| format!("client-key-{i}")).collect(),
        },
        ..AppConfig::default()
    };
    let allowed = build_allowed_key_set(&config);
    let mut headers = http::HeaderMap::new();
    headers.insert(
        "authorization",
        http::HeaderValue::from_static("Bearer client-key-63"),
    );
    c.bench_function("auth_multi64_bearer", |b| {
        b.iter(|| black_box(authenticate(black_box(&headers), &allowed).is_ok()));
    });
}

criterion_group!(
    benches,
    bench_tokenize_and_classify,
    bench_chunk_encoding,
    bench_authentication
);
criterion_main!(benches);
