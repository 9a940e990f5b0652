use bytes::{Bytes, BytesMut};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use echorpc::echo::EchoServiceHandler;
use echorpc::protocol::{RpcCodec, RpcFrame, message};
use echorpc::{
    Channel, ChannelOptions, Controller, EchoRequest, EchoServiceImpl, EchoServiceStub, Protocol,
    Server, ServerOptions,
};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_util::codec::{Decoder, Encoder};

fn start_server(rt: &Runtime) -> (Server, String) {
    rt.block_on(async {
        let mut server = Server::new();
        server
            .add_service(EchoServiceHandler::new(EchoServiceImpl::new(true)))
            .unwrap();
        server
            .start(&"127.0.0.1:0".parse().unwrap(), ServerOptions::default())
            .await
            .unwrap();
        let address = server.listen_address().unwrap().to_string();
        (server, address)
    })
}

fn connect(rt: &Runtime, address: &str, protocol: Protocol) -> Channel {
    let options = ChannelOptions::default()
        .with_protocol(protocol)
        .with_timeout(Some(Duration::from_secs(5)));
    rt.block_on(Channel::init(address, "", options)).unwrap()
}

async fn echo(channel: &Channel, attachment: Bytes) {
    let mut cntl = Controller::new();
    cntl.set_request_attachment(attachment);
    let response = EchoServiceStub::new(channel)
        .echo(&mut cntl, &EchoRequest::new("hello world"))
        .await
        .unwrap();
    black_box(response);
}

fn bench_attachment_sizes(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (server, address) = start_server(&rt);
    let channel = connect(&rt, &address, Protocol::Std);

    let mut group = c.benchmark_group("echo_attachment");
    for size in [0usize, 64, 1024, 16384, 262144] {
        let attachment = Bytes::from(vec![b'x'; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("std_single", size), &attachment, |b, a| {
            let channel = &channel;
            b.to_async(&rt).iter(|| echo(channel, a.clone()));
        });
    }
    group.finish();

    drop(channel);
    rt.block_on(async move {
        let mut server = server;
        server.stop().await.unwrap();
        server.join().await.unwrap();
    });
}

fn bench_protocols(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (server, address) = start_server(&rt);

    let mut group = c.benchmark_group("echo_protocol");
    for protocol in [Protocol::Std, Protocol::Http] {
        let channel = connect(&rt, &address, protocol);
        group.bench_function(protocol.name(), |b| {
            let channel = &channel;
            b.to_async(&rt).iter(|| echo(channel, Bytes::new()));
        });
    }
    group.finish();

    rt.block_on(async move {
        let mut server = server;
        server.stop().await.unwrap();
        server.join().await.unwrap();
    });
}

fn bench_concurrent_calls(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (server, address) = start_server(&rt);
    let channel = connect(&rt, &address, Protocol::Std);

    let mut group = c.benchmark_group("concurrent_calls");
    for count in [1usize, 8, 32, 128] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("std_single", count), &count, |b, &count| {
            let channel = &channel;
            b.to_async(&rt).iter(|| async move {
                let calls = (0..count).map(|_| echo(channel, Bytes::new()));
                futures::future::join_all(calls).await;
            });
        });
    }
    group.finish();

    drop(channel);
    rt.block_on(async move {
        let mut server = server;
        server.stop().await.unwrap();
        server.join().await.unwrap();
    });
}

fn bench_codec(c: &mut Criterion) {
    let payload = message::encode(&EchoRequest::new("hello world")).unwrap();
    let frame = RpcFrame::request(
        "EchoService",
        "Echo",
        42,
        payload,
        Bytes::from(vec![b'x'; 1024]),
    );

    let mut group = c.benchmark_group("codec");
    group.bench_function("encode_decode", |b| {
        let mut codec = RpcCodec::default();
        let mut buf = BytesMut::with_capacity(4096);
        b.iter(|| {
            codec.encode(black_box(frame.clone()), &mut buf).unwrap();
            let decoded = codec.decode(&mut buf).unwrap();
            black_box(decoded)
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_attachment_sizes,
    bench_protocols,
    bench_concurrent_calls,
    bench_codec
);
criterion_main!(benches);
