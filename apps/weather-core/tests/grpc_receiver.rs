//! End-to-end receiver test over a real localhost gRPC connection:
//! register a station, stream readings at it, and watch them come out of
//! the fan-in channel stamped with the registered identity.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use weather_core::drivers::DriverOutlet;
use weather_core::model::Reading;
use weather_core::proto::weather_v1_client::WeatherV1Client;
use weather_core::proto::RemoteStationConfig;
use weather_core::receiver::{serve, RemoteRegistry, WeatherService};
use weather_core::store::{ConfigProvider, SqliteProvider};

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("ephemeral bind");
    listener.local_addr().expect("local addr").port()
}

async fn connect_with_retry(port: u16) -> WeatherV1Client<tonic::transport::Channel> {
    let endpoint = format!("http://127.0.0.1:{port}");
    for _ in 0..50 {
        if let Ok(client) = WeatherV1Client::connect(endpoint.clone()).await {
            return client;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("receiver never came up on {endpoint}");
}

#[tokio::test]
async fn register_then_stream_lands_on_the_bus() {
    let provider = Arc::new(SqliteProvider::open_in_memory().unwrap());
    let registry = Arc::new(RemoteRegistry::new(provider.clone()));

    let (bus_tx, mut bus_rx) = mpsc::channel::<Reading>(32);
    let outlet = DriverOutlet::new("grpc-receiver", bus_tx);
    let service = WeatherService::new(registry.clone(), outlet);

    let port = free_port();
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move { serve(addr, service, server_cancel).await });

    let mut client = connect_with_retry(port).await;

    let ack = client
        .register_remote_station(RemoteStationConfig {
            station_id: String::new(),
            station_name: "remote-a".to_string(),
            station_type: "davis".to_string(),
            aprs_enabled: true,
            aprs_callsign: "K0TEST".to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
        .into_inner();
    let station_id = Uuid::parse_str(&ack.station_id).expect("ack carries a uuid");

    // The row must exist durably, not only in memory.
    let rows = provider.get_remote_stations().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].station_id, station_id);

    let wires: Vec<_> = (0..3)
        .map(|n| {
            let mut reading = Reading::new("sender-side-name", "davis");
            reading.out_temp = 70.0 + n as f64;
            let mut wire = reading.to_wire();
            wire.station_id = station_id.to_string();
            wire
        })
        .collect();
    client
        .send_weather_readings(tokio_stream::iter(wires))
        .await
        .unwrap();

    for n in 0..3 {
        let reading = tokio::time::timeout(Duration::from_secs(5), bus_rx.recv())
            .await
            .expect("reading forwarded")
            .unwrap();
        assert_eq!(reading.station_name, "remote-a", "registry name wins");
        assert_eq!(reading.station_id, Some(station_id));
        assert_eq!(reading.out_temp, 70.0 + n as f64);
    }

    // A stream for an unknown station produces nothing on the bus.
    let mut wire = Reading::new("ghost", "davis").to_wire();
    wire.station_id = Uuid::new_v4().to_string();
    client
        .send_weather_readings(tokio_stream::iter(vec![wire]))
        .await
        .unwrap();
    assert!(
        tokio::time::timeout(Duration::from_millis(300), bus_rx.recv())
            .await
            .is_err(),
        "unknown station ids must be dropped"
    );

    cancel.cancel();
    server.await.unwrap().unwrap();
}
