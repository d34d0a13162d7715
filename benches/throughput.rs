//! Dispatch throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use navlink::core::protocol::{ascii, binary};
use navlink::core::measurement::imu_fields;
use navlink::{
    AsciiPacketDispatcher, BinaryPacketDispatcher, CommandProcessor, MeasurementGroup,
    MeasurementGroups, MeasurementSink, PacketDispatcher, PacketSynchronizer,
};

fn mixed_stream(repeats: usize) -> Vec<u8> {
    let sentence = ascii::frame_sentence("YMR,+010.5,-002.1,+000.3,+1.09,-0.25,+3.01,-00.01,-00.02,-09.80,-0.001,+0.002,-0.001");
    let groups = MeasurementGroups::with_group(
        MeasurementGroup::Imu,
        imu_fields::ACCEL | imu_fields::GYRO,
    );
    let mut payload = Vec::new();
    for v in [0.0f32, 0.0, -9.81, 0.01, 0.02, 0.03] {
        payload.extend_from_slice(&v.to_le_bytes());
    }
    let frame = binary::encode_frame(&groups, &payload);

    let mut stream = Vec::new();
    for i in 0..repeats {
        stream.extend_from_slice(sentence.as_bytes());
        stream.extend_from_slice(&frame);
        if i % 7 == 0 {
            stream.extend_from_slice(b"##noise##");
        }
    }
    stream
}

fn build_synchronizer(sink_capacity: usize) -> PacketSynchronizer {
    let sink = Arc::new(MeasurementSink::new(sink_capacity));
    let commands = Arc::new(CommandProcessor::new(Duration::from_secs(5)));
    let ascii_dispatcher = Arc::new(Mutex::new(AsciiPacketDispatcher::new(
        4,
        Arc::clone(&sink),
        commands,
    )));
    let binary_dispatcher = Arc::new(Mutex::new(BinaryPacketDispatcher::new(4, sink)));

    let mut synchronizer = PacketSynchronizer::new(1 << 16, 1024);
    synchronizer.add_dispatcher(ascii_dispatcher as Arc<Mutex<dyn PacketDispatcher>>);
    synchronizer.add_dispatcher(binary_dispatcher as Arc<Mutex<dyn PacketDispatcher>>);
    synchronizer
}

fn synchronizer_benchmark(c: &mut Criterion) {
    let stream = mixed_stream(64);

    let mut group = c.benchmark_group("synchronizer");
    group.throughput(Throughput::Bytes(stream.len() as u64));

    group.bench_function("mixed_stream", |b| {
        b.iter(|| {
            // Sink capacity 0 isolates framing + fan-out cost from decode
            let mut synchronizer = build_synchronizer(0);
            synchronizer.feed(black_box(&stream)).unwrap();
            while !synchronizer.dispatch_next_packet() {}
            black_box(synchronizer.received_byte_count())
        })
    });

    group.bench_function("mixed_stream_with_decode", |b| {
        b.iter(|| {
            let mut synchronizer = build_synchronizer(1 << 16);
            synchronizer.feed(black_box(&stream)).unwrap();
            while !synchronizer.dispatch_next_packet() {}
            black_box(synchronizer.received_byte_count())
        })
    });

    group.finish();
}

fn crc_benchmark(c: &mut Criterion) {
    let data: Vec<u8> = (0..1024).map(|i| (i % 256) as u8).collect();

    let mut group = c.benchmark_group("checksum");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("crc16", |b| {
        b.iter(|| black_box(navlink::core::protocol::crc16(black_box(&data))))
    });
    group.bench_function("xor8", |b| {
        b.iter(|| black_box(navlink::core::protocol::xor_checksum(black_box(&data))))
    });

    group.finish();
}

criterion_group!(benches, synchronizer_benchmark, crc_benchmark);
criterion_main!(benches);
