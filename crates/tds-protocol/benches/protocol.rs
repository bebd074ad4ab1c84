//! Protocol encode/decode benchmarks.

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use tds_protocol::codec::WriteBuffer;
use tds_protocol::metadata::ColMetaData;
use tds_protocol::packet::{PacketHeader, PacketStatus, PacketType};
use tds_protocol::types::TypeId;
use tds_protocol::version::TdsVersion;

fn bench_packet_header(c: &mut Criterion) {
    let header = PacketHeader::new(PacketType::BulkLoad, PacketStatus::END_OF_MESSAGE, 4096);
    let bytes = header.encode_to_bytes();

    c.bench_function("packet_header_decode", |b| {
        b.iter(|| {
            let mut cursor = black_box(bytes.as_ref());
            PacketHeader::decode(&mut cursor)
        });
    });
}

fn bench_colmetadata_decode(c: &mut Criterion) {
    let mut buf = WriteBuffer::new();
    buf.put_u16(64);
    for i in 0..64 {
        buf.put_u32(0);
        buf.put_u16(0x0001);
        buf.put_u8(TypeId::Int4 as u8);
        buf.put_b_varchar(&format!("column_{i}"));
    }
    let bytes = buf.take();

    c.bench_function("colmetadata_decode_64_columns", |b| {
        b.iter(|| {
            let mut cursor = black_box(bytes.as_ref());
            ColMetaData::decode(&mut cursor, TdsVersion::V7_4)
        });
    });
}

criterion_group!(benches, bench_packet_header, bench_colmetadata_decode);
criterion_main!(benches);
