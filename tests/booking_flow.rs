use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, Config, NoTls, Notification, SimpleQueryMessage};
use ulid::Ulid;

use mentord::tenant::TenantManager;
use mentord::wire;

const HOUR: i64 = 3_600_000;
const DAY: i64 = 24 * HOUR;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("mentord_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000, 604_800_000));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "mentord".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

async fn connect(
    addr: SocketAddr,
    db: &str,
) -> (
    tokio_postgres::Client,
    mpsc::UnboundedReceiver<Notification>,
) {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(db)
        .user("mentord")
        .password("mentord");

    let (client, mut connection) = config.connect(NoTls).await.unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let stream = stream::poll_fn(move |cx| connection.poll_message(cx));
        futures::pin_mut!(stream);
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(AsyncMessage::Notification(n)) => {
                    let _ = tx.send(n);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    (client, rx)
}

/// Next UTC midnight, so every booked window lies in the future.
fn tomorrow() -> i64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64;
    (now / DAY + 1) * DAY
}

fn date_of(ts: i64) -> String {
    mentord::model::utc(ts).unwrap().date_naive().to_string()
}

async fn create_mentor(client: &tokio_postgres::Client, name: &str) -> Ulid {
    let id = Ulid::new();
    client
        .simple_query(&format!(
            "INSERT INTO mentors (id, name) VALUES ('{id}', '{name}')"
        ))
        .await
        .unwrap();
    id
}

/// Open the whole UTC date containing `ts` with a one-off slot.
async fn open_day(client: &tokio_postgres::Client, mentor_id: Ulid, ts: i64) {
    let slot_id = Ulid::new();
    let date = date_of(ts);
    client
        .simple_query(&format!(
            "INSERT INTO slots (id, mentor_id, weekday, specific_date, start_time, end_time) \
             VALUES ('{slot_id}', '{mentor_id}', NULL, '{date}', '00:00', '24:00')"
        ))
        .await
        .unwrap();
}

fn rows(messages: Vec<SimpleQueryMessage>) -> Vec<tokio_postgres::SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(r) => Some(r),
            _ => None,
        })
        .collect()
}

// ── Lifecycle over the wire ──────────────────────────────────

#[tokio::test]
async fn full_booking_lifecycle() {
    let (addr, _tm) = start_test_server().await;
    let (client, _rx) = connect(addr, "lifecycle").await;

    let mentor_id = create_mentor(&client, "Asha").await;
    open_day(&client, mentor_id, tomorrow()).await;

    let booking_id = Ulid::new();
    let start = tomorrow() + 9 * HOUR;
    let end = start + HOUR;
    client
        .simple_query(&format!(
            "INSERT INTO bookings (id, mentor_id, start, \"end\", price_cents) \
             VALUES ('{booking_id}', '{mentor_id}', {start}, {end}, 5000)"
        ))
        .await
        .unwrap();

    // Freshly requested, payment pending.
    let bookings = rows(
        client
            .simple_query(&format!(
                "SELECT * FROM bookings WHERE mentor_id = '{mentor_id}'"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].get("status"), Some("requested"));
    assert_eq!(bookings[0].get("payment_status"), Some("pending"));
    assert_eq!(bookings[0].get("price_cents"), Some("5000"));

    // The booked hour is carved out of availability.
    let day_start = tomorrow();
    let day_end = day_start + DAY;
    let free = rows(
        client
            .simple_query(&format!(
                "SELECT * FROM availability WHERE mentor_id = '{mentor_id}' \
                 AND start >= {day_start} AND \"end\" <= {day_end}"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(free.len(), 2);
    assert_eq!(free[0].get("start"), Some(day_start.to_string().as_str()));
    assert_eq!(free[0].get("end"), Some(start.to_string().as_str()));
    assert_eq!(free[1].get("start"), Some(end.to_string().as_str()));
    assert_eq!(free[1].get("end"), Some(day_end.to_string().as_str()));

    // Confirm, then complete with payment.
    client
        .simple_query(&format!(
            "UPDATE bookings SET status = 'confirmed' WHERE id = '{booking_id}'"
        ))
        .await
        .unwrap();
    client
        .simple_query(&format!(
            "UPDATE bookings SET status = 'completed', payment_status = 'paid' \
             WHERE id = '{booking_id}'"
        ))
        .await
        .unwrap();

    let stats = rows(
        client
            .simple_query(&format!(
                "SELECT * FROM mentor_stats WHERE mentor_id = '{mentor_id}'"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].get("sessions_completed"), Some("1"));
    assert_eq!(stats[0].get("earnings_cents"), Some("5000"));

    // Completed sessions cannot be cancelled.
    let result = client
        .simple_query(&format!("DELETE FROM bookings WHERE id = '{booking_id}'"))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn double_booking_rejected_adjacent_allowed() {
    let (addr, _tm) = start_test_server().await;
    let (client, _rx) = connect(addr, "conflicts").await;

    let mentor_id = create_mentor(&client, "Ravi").await;
    open_day(&client, mentor_id, tomorrow()).await;

    let start = tomorrow() + 10 * HOUR;
    client
        .simple_query(&format!(
            "INSERT INTO bookings (id, mentor_id, start, \"end\") \
             VALUES ('{}', '{mentor_id}', {start}, {})",
            Ulid::new(),
            start + HOUR
        ))
        .await
        .unwrap();

    // Overlapping request fails.
    let result = client
        .simple_query(&format!(
            "INSERT INTO bookings (id, mentor_id, start, \"end\") \
             VALUES ('{}', '{mentor_id}', {}, {})",
            Ulid::new(),
            start + 30 * 60_000,
            start + 90 * 60_000
        ))
        .await;
    let err = result.err().unwrap();
    assert!(err.to_string().contains("conflict"), "got: {err}");

    // Touching request succeeds.
    client
        .simple_query(&format!(
            "INSERT INTO bookings (id, mentor_id, start, \"end\") \
             VALUES ('{}', '{mentor_id}', {}, {})",
            Ulid::new(),
            start + HOUR,
            start + 2 * HOUR
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn window_validation_errors_reach_client() {
    let (addr, _tm) = start_test_server().await;
    let (client, _rx) = connect(addr, "validation").await;

    let mentor_id = create_mentor(&client, "Meera").await;
    open_day(&client, mentor_id, tomorrow()).await;

    // Past window.
    let yesterday = tomorrow() - 2 * DAY + 9 * HOUR;
    let err = client
        .simple_query(&format!(
            "INSERT INTO bookings (id, mentor_id, start, \"end\") \
             VALUES ('{}', '{mentor_id}', {yesterday}, {})",
            Ulid::new(),
            yesterday + HOUR
        ))
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("past time slot"), "got: {err}");

    // Inverted window.
    let start = tomorrow() + 9 * HOUR;
    let err = client
        .simple_query(&format!(
            "INSERT INTO bookings (id, mentor_id, start, \"end\") \
             VALUES ('{}', '{mentor_id}', {}, {start})",
            Ulid::new(),
            start + HOUR
        ))
        .await
        .err()
        .unwrap();
    assert!(
        err.to_string().contains("after start time"),
        "got: {err}"
    );

    // Outside any slot: a different mentor with no availability.
    let closed = create_mentor(&client, "Nobody").await;
    let err = client
        .simple_query(&format!(
            "INSERT INTO bookings (id, mentor_id, start, \"end\") \
             VALUES ('{}', '{closed}', {start}, {})",
            Ulid::new(),
            start + HOUR
        ))
        .await
        .err()
        .unwrap();
    assert!(
        err.to_string().contains("outside mentor availability"),
        "got: {err}"
    );
}

#[tokio::test]
async fn tenants_are_isolated_over_the_wire() {
    let (addr, _tm) = start_test_server().await;
    let (client_a, _rx_a) = connect(addr, "school_a").await;
    let (client_b, _rx_b) = connect(addr, "school_b").await;

    create_mentor(&client_a, "OnlyInA").await;

    let mentors_b = rows(client_b.simple_query("SELECT * FROM mentors").await.unwrap());
    assert!(mentors_b.is_empty());

    let mentors_a = rows(client_a.simple_query("SELECT * FROM mentors").await.unwrap());
    assert_eq!(mentors_a.len(), 1);
    assert_eq!(mentors_a[0].get("name"), Some("OnlyInA"));
}

// ── LISTEN / NOTIFY ──────────────────────────────────────────

/// Notifications are drained to the client on its next query round-trip,
/// so poke the connection with a cheap query until one shows up.
async fn wait_for_notification(
    client: &tokio_postgres::Client,
    rx: &mut mpsc::UnboundedReceiver<Notification>,
) -> Option<Notification> {
    for _ in 0..20 {
        client.simple_query("SELECT * FROM mentors").await.unwrap();
        if let Ok(Some(n)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
            return Some(n);
        }
    }
    None
}

#[tokio::test]
async fn listen_delivers_booking_notifications() {
    let (addr, _tm) = start_test_server().await;
    let (listener_client, mut rx) = connect(addr, "notify_db").await;
    let (booker_client, _rx_b) = connect(addr, "notify_db").await;

    let mentor_id = create_mentor(&booker_client, "Asha").await;
    open_day(&booker_client, mentor_id, tomorrow()).await;

    listener_client
        .simple_query(&format!("LISTEN mentor_{mentor_id}"))
        .await
        .unwrap();

    let booking_id = Ulid::new();
    let start = tomorrow() + 11 * HOUR;
    booker_client
        .simple_query(&format!(
            "INSERT INTO bookings (id, mentor_id, start, \"end\", price_cents) \
             VALUES ('{booking_id}', '{mentor_id}', {start}, {}, 2500)",
            start + HOUR
        ))
        .await
        .unwrap();

    let notification = wait_for_notification(&listener_client, &mut rx)
        .await
        .expect("no notification received");
    assert_eq!(notification.channel(), format!("mentor_{mentor_id}"));
    assert!(notification.payload().contains("booking_requested"));
    assert!(notification.payload().contains(&booking_id.to_string()));
}

#[tokio::test]
async fn unlisten_stops_notifications() {
    let (addr, _tm) = start_test_server().await;
    let (listener_client, mut rx) = connect(addr, "unlisten_db").await;
    let (booker_client, _rx_b) = connect(addr, "unlisten_db").await;

    let mentor_id = create_mentor(&booker_client, "Asha").await;
    open_day(&booker_client, mentor_id, tomorrow()).await;

    listener_client
        .simple_query(&format!("LISTEN mentor_{mentor_id}"))
        .await
        .unwrap();
    listener_client
        .simple_query(&format!("UNLISTEN mentor_{mentor_id}"))
        .await
        .unwrap();

    let start = tomorrow() + 9 * HOUR;
    booker_client
        .simple_query(&format!(
            "INSERT INTO bookings (id, mentor_id, start, \"end\") \
             VALUES ('{}', '{mentor_id}', {start}, {})",
            Ulid::new(),
            start + HOUR
        ))
        .await
        .unwrap();

    // A few pokes, nothing should arrive.
    for _ in 0..3 {
        listener_client
            .simple_query("SELECT * FROM mentors")
            .await
            .unwrap();
    }
    let got = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(got.is_err() || got.unwrap().is_none());
}
