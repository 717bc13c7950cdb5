use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use pneumatic_control::control::state::{Channel, PressureValue};
use pneumatic_control::link::codec::{decode_pressure, LineBuffer, Request};

fn encode_bench(c: &mut Criterion) {
    let req = Request::WritePressure(Channel::C1, PressureValue::clamped(12.51));
    c.bench_function("encode_write_pressure", |b| b.iter(|| black_box(&req).encode()));
}

fn decode_bench(c: &mut Criterion) {
    c.bench_function("decode_pressure_line", |b| {
        b.iter(|| decode_pressure(black_box("12.37\r\n")))
    });

    let mut lines = LineBuffer::new();
    c.bench_function("line_buffer_split_reading", |b| {
        b.iter(|| {
            lines.extend(black_box(b"12."));
            lines.extend(black_box(b"37\r\n"));
            lines.next_line()
        })
    });
}

criterion_group!(benches, encode_bench, decode_bench);
criterion_main!(benches);
