use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use airslot::engine::Engine;
use airslot::wire;

const HOUR: i64 = 3_600_000; // 1 hour in ms
const DAY: i64 = 24 * HOUR;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("airslot_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("airslot.wal")).unwrap());

    let served = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = served.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine).await;
            });
        }
    });

    (addr, engine)
}

struct Client(Framed<TcpStream, LinesCodec>);

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        Client(Framed::new(TcpStream::connect(addr).await.unwrap(), LinesCodec::new()))
    }

    async fn call(&mut self, request: Value) -> Value {
        self.send_raw(&request.to_string()).await
    }

    async fn send_raw(&mut self, line: &str) -> Value {
        self.0.send(line.to_string()).await.unwrap();
        let reply = self.0.next().await.unwrap().unwrap();
        serde_json::from_str(&reply).unwrap()
    }
}

/// Midnight UTC two days from now, so every test interval lies ahead.
fn day_after_tomorrow() -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    now - now.rem_euclid(DAY) + 2 * DAY
}

async fn airfield_with_slot(client: &mut Client, max_concurrent_flights: u32, day: i64) -> Ulid {
    let af = Ulid::new();
    let resp = client
        .call(json!({
            "op": "create_airfield",
            "id": af,
            "settings": {"name": "Bonn-Hangelar", "granularity_minutes": 15,
                         "max_concurrent_flights": max_concurrent_flights}
        }))
        .await;
    assert_eq!(resp["ok"], true, "{resp}");

    let resp = client
        .call(json!({
            "op": "add_timeslot",
            "id": Ulid::new(),
            "airfield_id": af,
            "timeslot": {"start": day + 8 * HOUR, "end": day + 18 * HOUR, "type": "available"}
        }))
        .await;
    assert_eq!(resp["ok"], true, "{resp}");
    af
}

fn reservation(start: i64, end: i64) -> Value {
    json!({"start": start, "end": end, "aircraft_id": "D-KOOL", "phone": "+49 228 555"})
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn place_list_and_cancel_over_tcp() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    let day = day_after_tomorrow();
    let af = airfield_with_slot(&mut client, 2, day).await;

    let id = Ulid::new();
    let resp = client
        .call(json!({"op": "place_reservation", "id": id, "airfield_id": af,
                     "reservation": reservation(day + 9 * HOUR, day + 10 * HOUR)}))
        .await;
    assert_eq!(resp["ok"], true, "{resp}");
    assert_eq!(resp["result"]["reservation"]["aircraft_id"], "D-KOOL");

    let resp = client
        .call(json!({"op": "list_reservations", "airfield_id": af,
                     "start": day, "end": day + DAY}))
        .await;
    assert_eq!(resp["result"].as_array().unwrap().len(), 1);

    let resp = client.call(json!({"op": "cancel_reservation", "id": id})).await;
    assert_eq!(resp["ok"], true);
    let resp = client.call(json!({"op": "cancel_reservation", "id": id})).await;
    assert_eq!(resp["error"]["code"], "not_found");
}

#[tokio::test]
async fn capacity_exceeded_is_reported_distinctly() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    let day = day_after_tomorrow();
    let af = airfield_with_slot(&mut client, 1, day).await;

    let place = |start: i64, end: i64| {
        json!({"op": "place_reservation", "id": Ulid::new(), "airfield_id": af,
               "reservation": reservation(start, end)})
    };
    assert_eq!(client.call(place(day + 9 * HOUR, day + 11 * HOUR)).await["ok"], true);

    let resp = client.call(place(day + 10 * HOUR, day + 12 * HOUR)).await;
    assert_eq!(resp["error"]["code"], "capacity_exceeded");
    assert_eq!(resp["error"]["violations"][0]["kind"], "capacity_exceeded");

    let resp = client
        .call(json!({"op": "peak_concurrency", "airfield_id": af,
                     "start": day, "end": day + DAY}))
        .await;
    assert_eq!(resp["result"]["peak"], 1);
}

#[tokio::test]
async fn dry_run_fail_fast_over_tcp() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    let day = day_after_tomorrow();
    let af = airfield_with_slot(&mut client, 1, day).await;

    let bad = json!({"start": "not a time", "end": day + 9 * HOUR + 7 * 60_000});
    let resp = client
        .call(json!({"op": "check_reservation", "airfield_id": af,
                     "reservation": bad, "mode": "collect_all"}))
        .await;
    assert_eq!(resp["error"]["violations"].as_array().unwrap().len(), 4);

    let resp = client
        .call(json!({"op": "check_reservation", "airfield_id": af,
                     "reservation": bad, "mode": "fail_fast"}))
        .await;
    let violations = resp["error"]["violations"].as_array().unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0]["field"], "start");
    assert_eq!(violations[0]["kind"], "malformed");
}

#[tokio::test]
async fn availability_over_tcp() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    let day = day_after_tomorrow();
    let af = airfield_with_slot(&mut client, 1, day).await;
    client
        .call(json!({"op": "place_reservation", "id": Ulid::new(), "airfield_id": af,
                     "reservation": reservation(day + 12 * HOUR, day + 13 * HOUR)}))
        .await;

    let resp = client
        .call(json!({"op": "availability", "airfield_id": af,
                     "start": day, "end": day + DAY, "min_duration_minutes": 240}))
        .await;
    assert_eq!(
        resp["result"],
        json!([{"start": day + 8 * HOUR, "end": day + 12 * HOUR},
               {"start": day + 13 * HOUR, "end": day + 18 * HOUR}])
    );
}

#[tokio::test]
async fn bad_lines_keep_connection_open() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let resp = client.send_raw("definitely not json").await;
    assert_eq!(resp["error"]["code"], "bad_request");
    let resp = client.send_raw(r#"{"op":"launch_rocket"}"#).await;
    assert_eq!(resp["error"]["code"], "bad_request");

    let resp = client.call(json!({"op": "list_airfields"})).await;
    assert_eq!(resp, json!({"ok": true, "result": []}));
}

#[tokio::test]
async fn parallel_clients_never_overbook() {
    let (addr, engine) = start_test_server().await;
    let day = day_after_tomorrow();
    let af = {
        let mut client = Client::connect(addr).await;
        airfield_with_slot(&mut client, 3, day).await
    };

    let mut handles = Vec::new();
    for _ in 0..12 {
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            let resp = client
                .call(json!({"op": "place_reservation", "id": Ulid::new(), "airfield_id": af,
                             "reservation": reservation(day + 9 * HOUR, day + 10 * HOUR)}))
                .await;
            resp["ok"] == true
        }));
    }
    let mut placed = 0;
    for h in handles {
        if h.await.unwrap() {
            placed += 1;
        }
    }
    assert_eq!(placed, 3);
    assert_eq!(engine.peak_concurrency(af, day, day + DAY).await.unwrap(), 3);
}
