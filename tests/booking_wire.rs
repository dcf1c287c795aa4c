use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use parkspot::engine::Engine;
use parkspot::gateway::SandboxGateway;
use parkspot::notify::NotifyHub;
use parkspot::wire;

const PASSWORD: &str = "parkspot";
const H: i64 = 3_600_000;
const DAY0: i64 = 1_900_000_000_000;

fn at(hour: i64) -> i64 {
    DAY0 + hour * H
}

// ── Test infrastructure ──────────────────────────────────────

struct TestServer {
    addr: SocketAddr,
    admin: Ulid,
    gateway: Arc<SandboxGateway>,
}

async fn start_test_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("parkspot_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let gateway = Arc::new(SandboxGateway::new());
    let engine = Arc::new(
        Engine::new(dir.join("parkspot.wal"), Arc::new(NotifyHub::new()), gateway.clone()).unwrap(),
    );
    let admin = Ulid::new();
    engine.seed_admin(admin).await.unwrap();

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, PASSWORD.to_string(), None).await;
            });
        }
    });

    TestServer { addr, admin, gateway }
}

/// Connect with the session user set to `user`.
async fn connect_as(addr: SocketAddr, user: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("parkspot")
        .user(user)
        .password(PASSWORD);

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

/// Register a fresh user over the wire and hand back a session for them.
async fn signup(addr: SocketAddr, role: &str) -> (Ulid, Client) {
    let id = Ulid::new();
    let client = connect_as(addr, &id.to_string()).await;
    client
        .batch_execute(&format!("INSERT INTO users (id, role) VALUES ('{id}', '{role}')"))
        .await
        .unwrap();
    (id, client)
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(r) => Some(r),
            _ => None,
        })
        .collect()
}

fn code_of(err: &tokio_postgres::Error) -> Option<&SqlState> {
    err.code()
}

/// A homeowner with one active spot and an open `[09:00, 17:00)` window.
async fn listed_spot(server: &TestServer) -> (Ulid, Client, Ulid) {
    let (owner, owner_client) = signup(server.addr, "homeowner").await;
    let spot = Ulid::new();
    owner_client
        .batch_execute(&format!(
            r#"INSERT INTO spots (id, hourly_price, latitude, longitude, vehicle_capacity, amenities_json) VALUES ('{spot}', 500, 52.52, 13.405, 1, '["covered"]')"#
        ))
        .await
        .unwrap();

    let admin = connect_as(server.addr, &server.admin.to_string()).await;
    admin
        .batch_execute(&format!(
            "INSERT INTO spot_changes (spot_id, status, is_available, hourly_price) VALUES ('{spot}', 'active', NULL, NULL)"
        ))
        .await
        .unwrap();

    owner_client
        .batch_execute(&format!(
            r#"INSERT INTO availability (id, spot_id, start, "end") VALUES ('{}', '{spot}', {}, {})"#,
            Ulid::new(),
            at(9),
            at(17)
        ))
        .await
        .unwrap();
    (owner, owner_client, spot)
}

async fn book(client: &Client, spot: Ulid, start: i64, end: i64) -> Result<Ulid, tokio_postgres::Error> {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            r#"INSERT INTO bookings (id, spot_id, start, "end", total_price) VALUES ('{id}', '{spot}', {start}, {end}, 500)"#
        ))
        .await?;
    Ok(id)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn listing_and_booking_round_trip() {
    let server = start_test_server().await;
    let (owner, owner_client, spot) = listed_spot(&server).await;
    let (driver, driver_client) = signup(server.addr, "driver").await;

    let listed = rows(&driver_client, &format!("SELECT * FROM spots WHERE id = '{spot}'")).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("owner_id"), Some(owner.to_string().as_str()));
    assert_eq!(listed[0].get("status"), Some("active"));
    assert_eq!(listed[0].get("amenities_json"), Some(r#"["covered"]"#));

    let booking = book(&driver_client, spot, at(10), at(11)).await.unwrap();
    let found = rows(&driver_client, &format!("SELECT * FROM bookings WHERE id = '{booking}'")).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("driver_id"), Some(driver.to_string().as_str()));
    assert_eq!(found[0].get("status"), Some("pending"));
    assert_eq!(found[0].get("payment_status"), Some("pending"));

    let windows = rows(
        &driver_client,
        &format!(
            r#"SELECT * FROM open_windows WHERE spot_id = '{spot}' AND start >= {} AND "end" <= {}"#,
            at(0),
            at(24)
        ),
    )
    .await;
    let spans: Vec<(String, String)> = windows
        .iter()
        .map(|r| (r.get("start").unwrap().to_string(), r.get("end").unwrap().to_string()))
        .collect();
    assert_eq!(
        spans,
        vec![
            (at(9).to_string(), at(10).to_string()),
            (at(11).to_string(), at(17).to_string()),
        ]
    );

    owner_client
        .batch_execute(&format!(
            "INSERT INTO booking_transitions (booking_id, status) VALUES ('{booking}', 'confirmed')"
        ))
        .await
        .unwrap();
    let inbox = rows(&driver_client, "SELECT * FROM notifications").await;
    assert!(inbox.iter().any(|r| r.get("message") == Some("booking is now confirmed")));
}

#[tokio::test]
async fn overlapping_booking_is_an_exclusion_violation() {
    let server = start_test_server().await;
    let (_, _, spot) = listed_spot(&server).await;
    let (_, first) = signup(server.addr, "driver").await;
    let (_, second) = signup(server.addr, "driver").await;

    book(&first, spot, at(10), at(11)).await.unwrap();
    let err = book(&second, spot, at(10), at(11)).await.unwrap_err();
    assert_eq!(code_of(&err), Some(&SqlState::EXCLUSION_VIOLATION));

    // Outside every window.
    let err = book(&second, spot, at(18), at(19)).await.unwrap_err();
    assert_eq!(code_of(&err), Some(&SqlState::EXCLUSION_VIOLATION));
}

#[tokio::test]
async fn errors_carry_their_sqlstate() {
    let server = start_test_server().await;
    let (_, owner_client, spot) = listed_spot(&server).await;
    let (_, driver_client) = signup(server.addr, "driver").await;
    let booking = book(&driver_client, spot, at(10), at(11)).await.unwrap();

    // Drivers do not confirm.
    let err = driver_client
        .batch_execute(&format!("INSERT INTO booking_transitions VALUES ('{booking}', 'confirmed')"))
        .await
        .unwrap_err();
    assert_eq!(code_of(&err), Some(&SqlState::INSUFFICIENT_PRIVILEGE));

    owner_client
        .batch_execute(&format!("INSERT INTO booking_transitions VALUES ('{booking}', 'confirmed')"))
        .await
        .unwrap();
    let err = owner_client
        .batch_execute(&format!("INSERT INTO booking_transitions VALUES ('{booking}', 'rejected')"))
        .await
        .unwrap_err();
    assert_eq!(code_of(&err), Some(&SqlState::OBJECT_NOT_IN_PREREQUISITE_STATE));

    let err = driver_client
        .batch_execute(&format!("INSERT INTO users VALUES ('{}', 'driver')", Ulid::new()))
        .await
        .unwrap_err();
    assert_eq!(code_of(&err), Some(&SqlState::INSUFFICIENT_PRIVILEGE));

    let err = driver_client.batch_execute("SELECT * FROM nowhere").await.unwrap_err();
    assert_eq!(code_of(&err), Some(&SqlState::SYNTAX_ERROR));
}

#[tokio::test]
async fn session_user_must_be_an_id() {
    let server = start_test_server().await;
    let client = connect_as(server.addr, "postgres").await;
    let err = client.batch_execute("SELECT * FROM notifications").await.unwrap_err();
    assert_eq!(code_of(&err), Some(&SqlState::INVALID_AUTHORIZATION_SPECIFICATION));
}

#[tokio::test]
async fn bound_parameters_reach_the_engine() {
    let server = start_test_server().await;
    let (_, _, spot) = listed_spot(&server).await;
    let (driver, driver_client) = signup(server.addr, "driver").await;

    let id = Ulid::new().to_string();
    let spot = spot.to_string();
    let start = at(12).to_string();
    let end = at(13).to_string();
    let inserted = driver_client
        .execute(
            r#"INSERT INTO bookings (id, spot_id, start, "end", total_price) VALUES ($1, $2, $3, $4, $5)"#,
            &[&id, &spot, &start, &end, &"500"],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let mine = rows(&driver_client, &format!("SELECT * FROM bookings WHERE driver_id = '{driver}'")).await;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].get("id"), Some(id.as_str()));
}

#[tokio::test]
async fn payment_flow_over_the_wire() {
    let server = start_test_server().await;
    let (_, owner_client, spot) = listed_spot(&server).await;
    let (_, driver_client) = signup(server.addr, "driver").await;
    let booking = book(&driver_client, spot, at(10), at(11)).await.unwrap();

    let intent = rows(&driver_client, &format!("INSERT INTO payment_intents (booking_id) VALUES ('{booking}')")).await;
    assert_eq!(intent.len(), 1);
    let reference = intent[0].get("reference").unwrap().to_string();
    assert_eq!(intent[0].get("amount"), Some("500"));

    server
        .gateway
        .settle(&reference, parkspot::model::PaymentOutcome::Succeeded)
        .unwrap();
    let confirm = format!("INSERT INTO payment_confirmations (booking_id, reference) VALUES ('{booking}', '{reference}')");
    let first = rows(&driver_client, &confirm).await;
    assert_eq!(first[0].get("result"), Some("applied"));
    let again = rows(&driver_client, &confirm).await;
    assert_eq!(again[0].get("result"), Some("replayed"));

    let txs = rows(&owner_client, &format!("SELECT * FROM transactions WHERE booking_id = '{booking}'")).await;
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].get("status"), Some("completed"));

    let found = rows(&owner_client, &format!("SELECT * FROM bookings WHERE id = '{booking}'")).await;
    assert_eq!(found[0].get("payment_status"), Some("paid"));
    assert_eq!(found[0].get("gateway_reference"), Some(reference.as_str()));
}
