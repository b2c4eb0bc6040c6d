//! End-to-end tests: wire frames over a real socket, through the ring and
//! dispatcher, into the summary store and its publish log.

use quota_ingest::area::AreaMap;
use quota_ingest::codec::encode_overpunch;
use quota_ingest::config::ServiceConfig;
use quota_ingest::handler::Dispatcher;
use quota_ingest::record::{H01Record, H05pRecord, HEADER_LEN, T_CODE_H01, T_CODE_H05P};
use quota_ingest::server::IngestServer;
use quota_ingest::store::{DocumentStore, MemoryStore, SummaryStore};
use quota_ingest::summary::Summary;
use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------
// fixtures
// ---------------------------------------------------------------------

fn num<const N: usize>(value: i64) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&encode_overpunch(value, N).unwrap());
    out
}

fn text<const N: usize>(s: &str) -> [u8; N] {
    let mut out = [b' '; N];
    out[..s.len()].copy_from_slice(s.as_bytes());
    out
}

/// Assembles a complete wire frame: header, payload, delimiter.
fn frame(t_code: &[u8; 6], system: &str, entry_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![b' '; HEADER_LEN];
    buf[0..4].copy_from_slice(b"0200");
    buf[4..10].copy_from_slice(t_code);
    buf[10..13].copy_from_slice(b"CB ");
    buf[110..110 + system.len()].copy_from_slice(system.as_bytes());
    buf[158] = entry_type;
    buf.extend_from_slice(payload);
    buf.push(b'\n');
    buf
}

/// The worked snapshot: margin side populated, short side zero.
fn sample_h01(area: &str, stock: &str) -> H01Record {
    let mut rec = H01Record::blank();
    rec.area_center = text(area);
    rec.stock_id = text(stock);
    rec.margin_amount = num(1_000_000);
    rec.margin_buy_order_amount = num(200_000);
    rec.margin_sell_match_amount = num(50_000);
    rec.margin_qty = num(100);
    rec.margin_buy_order_qty = num(20);
    rec.margin_sell_match_qty = num(5);
    rec.margin_buy_match_amount = num(150_000);
    rec.margin_buy_match_qty = num(15);
    rec.margin_after_hour_buy_order_amount = num(30_000);
    rec.margin_after_hour_buy_order_qty = num(3);
    rec
}

fn h01_frame(area: &str, stock: &str) -> Vec<u8> {
    frame(T_CODE_H01, area, b'A', &sample_h01(area, stock).to_bytes())
}

fn h05p_frame(area: &str, stock: &str, buy_offset: i64, sell_offset: i64) -> Vec<u8> {
    let mut rec = H05pRecord::blank();
    rec.broker_id = text(area);
    rec.stock_id = text(stock);
    rec.margin_buy_offset_qty = num(buy_offset);
    rec.short_sell_offset_qty = num(sell_offset);
    frame(T_CODE_H05P, area, b'A', &rec.to_bytes())
}

struct Harness {
    mem: Arc<MemoryStore>,
    summaries: Arc<SummaryStore>,
    server: IngestServer,
}

fn start_server() -> Harness {
    let areas = Arc::new(
        AreaMap::from_json(r#"{ "A1": ["8801", "8802"], "A2": ["8810"] }"#).unwrap(),
    );
    let mem = Arc::new(MemoryStore::new());
    let summaries = Arc::new(SummaryStore::new(
        Arc::clone(&mem) as Arc<dyn DocumentStore>,
        Arc::clone(&areas),
    ));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&summaries), areas));

    let cfg = ServiceConfig {
        redis_url: "127.0.0.1:6379".into(),
        server_port: 0, // ephemeral
        socket_timeout_ms: 100,
        redis_pool_size: 1,
        redis_wait_timeout_ms: 100,
        redis_password: None,
    };
    let mut server = IngestServer::bind(&cfg, dispatcher).unwrap();
    server.start().unwrap();

    Harness {
        mem,
        summaries,
        server,
    }
}

fn connect(server: &IngestServer) -> TcpStream {
    let addr = server.local_addr().unwrap();
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_nodelay(true).unwrap();
    stream
}

/// Polls until `probe` returns `Some`, failing after five seconds.
fn wait_for<T>(mut probe: impl FnMut() -> Option<T>) -> T {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(value) = probe() {
            return value;
        }
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn get_when(summaries: &SummaryStore, key: &str, cond: impl Fn(&Summary) -> bool) -> Summary {
    wait_for(|| summaries.get(key).filter(|s| cond(s)))
}

// ---------------------------------------------------------------------
// scenarios
// ---------------------------------------------------------------------

#[test]
fn test_snapshot_offsets_and_rollup_over_socket() {
    let mut harness = start_server();
    let mut feed = connect(&harness.server);

    // Keep-alive first: must not reach any handler.
    feed.write_all(b"\n").unwrap();
    feed.write_all(&h01_frame("A1", "2330")).unwrap();
    feed.flush().unwrap();

    let summary = get_when(&harness.summaries, "summary:A1:2330", |s| {
        s.margin_available_qty == 85
    });
    assert_eq!(summary.stock_id, "2330");
    assert_eq!(summary.margin_available_amount, 850_000);
    assert_eq!(summary.after_margin_available_amount, 870_000);
    assert_eq!(summary.after_margin_available_qty, 87);
    assert_eq!(summary.belong_branches, ["8801", "8802"]);

    // The keep-alive produced no publish: first publish is the area key,
    // second the company rollup.
    let keys: Vec<String> = harness
        .mem
        .publishes()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, ["summary:A1:2330", "summary:ALL:2330"]);

    // Offsets arrive; quantities shift, amounts stay.
    feed.write_all(&h05p_frame("A1", "2330", 10, 0)).unwrap();
    feed.flush().unwrap();

    let summary = get_when(&harness.summaries, "summary:A1:2330", |s| {
        s.margin_available_qty == 95
    });
    assert_eq!(summary.after_margin_available_qty, 97);
    assert_eq!(summary.margin_available_amount, 850_000);

    // Replaying the snapshot preserves the offsets. Each applied frame
    // publishes the area key and the rollup, so the third apply brings the
    // publish count to six.
    feed.write_all(&h01_frame("A1", "2330")).unwrap();
    feed.flush().unwrap();
    wait_for(|| (harness.mem.publish_count() >= 6).then_some(()));
    let replayed = harness.summaries.get("summary:A1:2330").unwrap();
    assert_eq!(replayed, summary);

    // Rollup tracks the single populated area.
    let rollup = harness.summaries.get("summary:ALL:2330").unwrap();
    assert_eq!(rollup.area_center, "ALL");
    assert_eq!(rollup.margin_available_qty, 95);
    assert_eq!(rollup.belong_branches, ["8801", "8802", "8810"]);

    harness.server.stop();
}

#[test]
fn test_rollup_sums_across_areas() {
    let mut harness = start_server();
    let mut feed = connect(&harness.server);

    feed.write_all(&h01_frame("A1", "2330")).unwrap();
    feed.write_all(&h01_frame("A2", "2330")).unwrap();
    feed.flush().unwrap();

    let rollup = wait_for(|| {
        harness
            .summaries
            .get("summary:ALL:2330")
            .filter(|s| s.margin_available_qty == 170)
    });
    // 85 from each of the two areas.
    assert_eq!(rollup.margin_available_qty, 170);
    assert_eq!(harness.summaries.get("summary:A2:2330").unwrap().belong_branches, ["8810"]);

    harness.server.stop();
}

#[test]
fn test_invalid_area_dropped_stream_continues() {
    let mut harness = start_server();
    let mut feed = connect(&harness.server);

    // Unknown area center: dropped, no store mutation, no publish.
    feed.write_all(&h01_frame("ZZZ", "2330")).unwrap();
    // The stream stays in sync: the next valid frame is applied.
    feed.write_all(&h01_frame("A1", "2330")).unwrap();
    feed.flush().unwrap();

    get_when(&harness.summaries, "summary:A1:2330", |s| {
        s.margin_available_qty == 85
    });
    assert!(harness.summaries.get("summary:ZZZ:2330").is_none());
    let keys: Vec<String> = harness
        .mem
        .publishes()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert!(!keys.iter().any(|k| k.contains("ZZZ")));

    harness.server.stop();
}

#[test]
fn test_unknown_t_code_and_entry_type_dropped() {
    let mut harness = start_server();
    let mut feed = connect(&harness.server);

    // Unknown transaction code.
    feed.write_all(&frame(b"ELD999", "A1", b'A', &[b' '; 64]))
        .unwrap();
    // Delete entry type: not dispatched.
    feed.write_all(&frame(
        T_CODE_H01,
        "A1",
        b'D',
        &sample_h01("A1", "2330").to_bytes(),
    ))
    .unwrap();
    // Header/payload area-center mismatch.
    feed.write_all(&frame(
        T_CODE_H01,
        "A2",
        b'A',
        &sample_h01("A1", "2330").to_bytes(),
    ))
    .unwrap();
    // A valid frame still lands after all three drops.
    feed.write_all(&h01_frame("A1", "2330")).unwrap();
    feed.flush().unwrap();

    get_when(&harness.summaries, "summary:A1:2330", |s| {
        s.margin_available_qty == 85
    });
    assert_eq!(harness.mem.publish_count(), 2);

    harness.server.stop();
}

#[test]
fn test_reconnect_supported() {
    let mut harness = start_server();

    {
        let mut feed = connect(&harness.server);
        feed.write_all(&h01_frame("A1", "2330")).unwrap();
        feed.flush().unwrap();
        get_when(&harness.summaries, "summary:A1:2330", |s| {
            s.margin_available_qty == 85
        });
    } // connection dropped

    let mut feed = connect(&harness.server);
    feed.write_all(&h05p_frame("A1", "2330", 10, 0)).unwrap();
    feed.flush().unwrap();
    get_when(&harness.summaries, "summary:A1:2330", |s| {
        s.margin_available_qty == 95
    });

    harness.server.stop();
}

#[test]
fn test_split_frame_across_writes() {
    let mut harness = start_server();
    let mut feed = connect(&harness.server);

    // Deliver one frame byte-dribbled across many writes.
    let bytes = h01_frame("A1", "2330");
    for piece in bytes.chunks(37) {
        feed.write_all(piece).unwrap();
        feed.flush().unwrap();
        std::thread::sleep(Duration::from_millis(1));
    }

    get_when(&harness.summaries, "summary:A1:2330", |s| {
        s.margin_available_qty == 85
    });

    harness.server.stop();
}

#[test]
fn test_graceful_shutdown() {
    let mut harness = start_server();
    let _feed = connect(&harness.server);
    assert!(harness.server.is_running());

    harness.server.stop();
    assert!(!harness.server.is_running());
    // Stop is idempotent.
    harness.server.stop();
}
