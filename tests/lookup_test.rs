mod common;

use common::{TEST_HOST, capture_server, lines, options};
use devo_sdk::domain::FixedClock;
use devo_sdk::lookup::{CsvOptions, LookupAction, LookupSession, LookupValue};
use devo_sdk::sender::{Sender, SenderConfig, SenderTcpConfig};
use std::io::Write;
use std::time::Duration;

const NOW: i64 = 1_659_616_680_000;

/// Splits a captured line into its tag and body.
fn tag_and_body(line: &str) -> (String, String) {
    let prefix = format!("<14>Jan  1 00:00:00 {TEST_HOST} ");
    let rest = line.strip_prefix(&prefix).unwrap();
    let (tag, body) = rest.split_once(": ").unwrap();
    (tag.to_string(), body.to_string())
}

async fn sender_for(address: devo_sdk::sender::Address) -> Sender {
    Sender::new(SenderConfig::Tcp(SenderTcpConfig::new(address)), options())
        .await
        .unwrap()
}

#[tokio::test]
async fn incremental_delete_reaches_the_socket() {
    let (address, server) = capture_server().await;
    let sender = sender_for(address).await;
    let clock = FixedClock::new(NOW);

    let mut session = LookupSession::with_clock(&sender, "L", LookupAction::Inc, &clock)
        .with_delay(Duration::ZERO);
    assert_eq!(session.id(), NOW.to_string());

    let headers = ["id", "hex", "color"].map(String::from);
    session.send_headers(&headers, 0, "str").await.unwrap();
    session
        .send_data_line(&["11", "HEX12", "COLOR12"].map(LookupValue::from), 0, true)
        .await
        .unwrap();
    session.send_end().await.unwrap();
    sender.close().await.unwrap();

    let events: Vec<_> = lines(&server.await.unwrap())
        .iter()
        .map(|line| tag_and_body(line))
        .collect();
    assert_eq!(events.len(), 3);

    let prefix = format!("{NOW}_L|");
    assert_eq!(events[0].0, "my.lookup.control.L.INC");
    assert!(events[0].1.starts_with(&format!("{prefix}START|")));
    assert_eq!(events[1].0, "my.lookup.data.L.DELETE");
    assert!(events[1].1.starts_with(&format!("{prefix}\"11\"")));
    assert_eq!(events[2].0, "my.lookup.control.L.INC");
    assert!(events[2].1.starts_with(&format!("{prefix}END|")));

    let start_headers = events[0].1.trim_start_matches(&format!("{prefix}START|"));
    let end_headers = events[2].1.trim_start_matches(&format!("{prefix}END|"));
    assert_eq!(start_headers, end_headers);
}

#[tokio::test]
async fn csv_file_upload_with_deletes() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "id,name,hex,delete\n1,red,FF0000,\n2,green,00FF00,true\n3,blue,0000FF,0\n"
    )
    .unwrap();
    file.flush().unwrap();

    let (address, server) = capture_server().await;
    let sender = sender_for(address).await;
    let mut session =
        LookupSession::new(&sender, "colors", LookupAction::Full).with_delay(Duration::ZERO);

    let options = CsvOptions::default()
        .with_key("id")
        .with_key_type("int4")
        .with_delete_column("delete");
    let rows = session.send_csv(file.path(), &options).await.unwrap();
    assert_eq!(rows, 3);
    sender.close().await.unwrap();

    let tags: Vec<String> = lines(&server.await.unwrap())
        .iter()
        .map(|line| tag_and_body(line).0)
        .collect();
    assert_eq!(
        tags,
        vec![
            "my.lookup.control.colors.FULL",
            "my.lookup.data.colors",
            "my.lookup.data.colors.DELETE",
            "my.lookup.data.colors",
            "my.lookup.control.colors.FULL",
        ]
    );
}

#[tokio::test]
async fn historic_rows_are_echoed_before_each_data_row() {
    let (address, server) = capture_server().await;
    let sender = sender_for(address).await;
    let mut session = LookupSession::new(&sender, "colors", LookupAction::Full)
        .with_delay(Duration::ZERO)
        .with_historic_tag("my.app.colors.history");

    let csv = "id,color\n1,red\n2,blue\n";
    session
        .send_csv_reader(csv.as_bytes(), &CsvOptions::default())
        .await
        .unwrap();
    sender.close().await.unwrap();

    let events: Vec<_> = lines(&server.await.unwrap())
        .iter()
        .map(|line| tag_and_body(line))
        .collect();
    let historic: Vec<&str> = events
        .iter()
        .filter(|(tag, _)| tag == "my.app.colors.history")
        .map(|(_, body)| body.as_str())
        .collect();
    assert_eq!(historic, vec!["1,red", "2,blue"]);
    assert_eq!(events.len(), 6);
    assert_eq!(events[1].0, "my.app.colors.history");
    assert_eq!(events[2].0, "my.lookup.data.colors");
}

#[tokio::test]
async fn missing_file_is_reported_before_start() {
    let (address, server) = capture_server().await;
    let sender = sender_for(address).await;
    let mut session =
        LookupSession::new(&sender, "colors", LookupAction::Full).with_delay(Duration::ZERO);

    let result = session
        .send_csv("/nonexistent/colors.csv", &CsvOptions::default())
        .await;
    assert!(matches!(result, Err(devo_sdk::LookupError::Io(_))));
    sender.close().await.unwrap();

    assert!(server.await.unwrap().is_empty());
}
