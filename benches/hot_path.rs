use std::sync::Arc;

use ccproxy::protocol::canonical::CanonicalStreamEvent;
use ccproxy::protocol::{anthropic, gemini, openai_chat};
use ccproxy::stream::sse::{encode_sse_event, SseParser};
use ccproxy::transform::builtins::build_transformer;
use ccproxy::transform::{CompiledChain, TransformerChainCache};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

fn bench_sse_parse(c: &mut Criterion) {
    let chunk = "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"bench\"}}\n\n";

    c.bench_function("sse_parse_single_event", |b| {
        b.iter(|| {
            let mut parser = SseParser::new();
            black_box(parser.feed(black_box(chunk)));
        });
    });

    let mut many = String::new();
    for _ in 0..64 {
        many.push_str(chunk);
    }
    c.bench_function("sse_parse_64_events_one_chunk", |b| {
        b.iter(|| {
            let mut parser = SseParser::new();
            black_box(parser.feed(black_box(&many)));
        });
    });
}

fn bench_sse_encode(c: &mut Criterion) {
    let data = json!({
        "type": "content_block_delta",
        "index": 0,
        "delta": {"type": "text_delta", "text": "bench"},
    });
    c.bench_function("sse_encode_event", |b| {
        b.iter(|| black_box(encode_sse_event(black_box("content_block_delta"), black_box(&data))));
    });
}

fn bench_stream_decode(c: &mut Criterion) {
    let openai_chunk = json!({
        "id": "chatcmpl-1",
        "object": "chat.completion.chunk",
        "created": 1,
        "model": "gpt-4o-mini",
        "choices": [{"index": 0, "delta": {"content": "bench"}, "finish_reason": null}],
    });
    c.bench_function("decode_stream_event_openai_chat", |b| {
        b.iter(|| {
            let mut state = openai_chat::StreamState::default();
            black_box(openai_chat::decode_stream_event(black_box(&openai_chunk), &mut state).unwrap());
        });
    });

    let anthropic_delta = json!({
        "type": "content_block_delta",
        "index": 0,
        "delta": {"type": "text_delta", "text": "bench"},
    });
    c.bench_function("decode_stream_event_anthropic", |b| {
        b.iter(|| {
            let mut state = anthropic::StreamState::default();
            black_box(
                anthropic::decode_stream_event(
                    black_box("content_block_delta"),
                    black_box(&anthropic_delta),
                    &mut state,
                )
                .unwrap(),
            );
        });
    });

    let gemini_chunk = json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": "bench"}]},
            "index": 0,
        }],
    });
    c.bench_function("decode_stream_event_gemini", |b| {
        b.iter(|| {
            let mut state = gemini::StreamState::default();
            black_box(gemini::decode_stream_event(black_box(&gemini_chunk), &mut state).unwrap());
        });
    });
}

fn compile_openai_chain() -> CompiledChain {
    CompiledChain::new(vec![
        build_transformer("openai").unwrap(),
        build_transformer("maxtoken:8192").unwrap(),
    ])
}

fn bench_transformer_chain_cache(c: &mut Criterion) {
    let cache = TransformerChainCache::new(100);
    // Warm the cache once so the steady-state lookup path is measured.
    cache.get_or_compile("openai", "gpt-4o-mini", compile_openai_chain);

    c.bench_function("transformer_chain_cache_hit", |b| {
        b.iter(|| {
            black_box(cache.get_or_compile(
                black_box("openai"),
                black_box("gpt-4o-mini"),
                compile_openai_chain,
            ));
        });
    });

    c.bench_function("transformer_chain_compile_cold", |b| {
        b.iter(compile_openai_chain);
    });
}

fn bench_transformer_chain_apply(c: &mut Criterion) {
    use ccproxy::protocol::canonical::parse_request;

    let chain = compile_openai_chain();
    let request = parse_request(&json!({
        "model": "claude-3-5-sonnet-latest",
        "max_tokens": 1024,
        "messages": [{"role": "user", "content": "bench"}],
    }))
    .unwrap();

    c.bench_function("transformer_chain_apply_request_in", |b| {
        b.iter(|| black_box(chain.apply_request_in(black_box(request.clone())).unwrap()));
    });

    let response_payload = json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "bench"}}],
    });
    c.bench_function("transformer_chain_apply_response_in", |b| {
        b.iter(|| {
            black_box(
                chain
                    .apply_response_in(black_box(response_payload.clone()))
                    .unwrap(),
            )
        });
    });
}

fn bench_canonical_stream_event_alloc(c: &mut Criterion) {
    c.bench_function("canonical_stream_event_text_delta_clone", |b| {
        let event = CanonicalStreamEvent::ContentBlockDelta {
            index: 0,
            delta: ccproxy::protocol::canonical::ContentDelta::TextDelta("bench".to_string()),
        };
        b.iter(|| black_box(event.clone()));
    });
}

criterion_group!(
    benches,
    bench_sse_parse,
    bench_sse_encode,
    bench_stream_decode,
    bench_transformer_chain_cache,
    bench_transformer_chain_apply,
    bench_canonical_stream_event_alloc
);
criterion_main!(benches);
