//! Protocol encoding/decoding benchmarks.

use bson::{doc, Document};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use docwire_protocol::{
    InsertFlags, Message, MessageHeader, QueryFlags, Reply, ReplyFlags, Request, HEADER_SIZE,
};

fn create_document(payload_size: usize) -> Document {
    doc! {
        "_id": 12345,
        "status": "completed",
        "tags": ["alpha", "beta"],
        "payload": { "data": "x".repeat(payload_size) },
    }
}

fn create_reply(count: usize) -> Reply {
    Reply {
        flags: ReplyFlags::new(),
        cursor_id: 42,
        starting_from: 0,
        documents: (0..count).map(|_| create_document(100)).collect(),
    }
}

fn bench_query_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_encode");

    for size in [100, 1000, 10000] {
        let query = create_document(size);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &query, |b, query| {
            b.iter(|| {
                let msg = Message::query("bench.items", QueryFlags::new(), 0, 100, query, None)
                    .unwrap();
                black_box(msg.encode(7).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_insert_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_encode");

    for count in [1, 10, 100] {
        let docs: Vec<Document> = (0..count).map(|_| create_document(100)).collect();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &docs, |b, docs| {
            b.iter(|| {
                let msg = Message::insert("bench.items", InsertFlags::new(), docs).unwrap();
                black_box(msg.encode(7).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_reply_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("reply_decode");

    for count in [1, 10, 100] {
        let encoded = create_reply(count).encode(1, 7).unwrap();

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &encoded, |b, encoded| {
            b.iter(|| {
                let header = MessageHeader::decode(encoded).unwrap();
                let body = &encoded[HEADER_SIZE..];
                black_box(Reply::<Document>::decode(header.message_length as usize, body).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_request_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_decode");

    for count in [1, 10, 100] {
        let docs: Vec<Document> = (0..count).map(|_| create_document(100)).collect();
        let encoded = Message::insert("bench.items", InsertFlags::new(), &docs)
            .unwrap()
            .encode(7)
            .unwrap();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &encoded, |b, encoded| {
            b.iter(|| {
                let header = MessageHeader::decode(encoded).unwrap();
                black_box(Request::<Document>::decode(&header, &encoded[HEADER_SIZE..]).unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_query_encode,
    bench_insert_encode,
    bench_reply_decode,
    bench_request_decode,
);
criterion_main!(benches);
