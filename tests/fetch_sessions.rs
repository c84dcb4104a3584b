use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tokio::time::Instant;

async fn connect(device: &pepperoni::FakeDevice) -> anyhow::Result<pepperoni::DeviceSession> {
    let client = pepperoni::fake_hardware_client(device.clone());
    let found = client.discover("peppe", Duration::from_secs(60)).await?;
    Ok(client.connect(&found).await?)
}

fn device_replying(chunks: &[&str]) -> pepperoni::FakeDevice {
    pepperoni::FakeDevice::builder()
        .name("peppe")
        .advertised_session_time(1000)
        .responses(vec![pepperoni::FakeResponse::new(
            "turndata disp",
            chunks.iter().copied(),
        )])
        .build()
}

#[tokio::test(start_paused = true)]
async fn fetch_reassembles_fragmented_listing() -> anyhow::Result<()> {
    let device = device_replying(&[
        "Data re",
        "adings\n\rid:1 t:1000 p:6",
        "0 10,11,",
        "12\n\rTotal readings:",
        "1\n\r",
    ]);
    let session = connect(&device).await?;

    let outcome = pepperoni::SessionFetchHandler::new(false)
        .fetch(&session, 0)
        .await?;
    session.close().await?;

    let batch = outcome.into_complete()?;
    assert_eq!(1, batch.records().len());
    let record = &batch.records()[0];
    assert_eq!(1, record.id());
    assert_eq!(1000, record.time());
    assert_eq!(60, record.period());
    assert_eq!(vec![10, 11, 12], record.readings()?);
    assert_eq!(vec!["turndata disp 1".to_string()], device.written_commands());
    assert_eq!(0, device.open_subscriptions());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fetch_requests_sessions_after_high_water_mark() -> anyhow::Result<()> {
    let device = device_replying(&["Data readings\nTotal readings:0\n"]);
    let session = connect(&device).await?;

    let outcome = pepperoni::SessionFetchHandler::new(true)
        .fetch(&session, 1_700_000_000)
        .await?;

    assert_matches!(outcome, pepperoni::FetchOutcome::Complete(batch) if batch.is_empty());
    assert_eq!(
        vec!["turndata disp 1700000001".to_string()],
        device.written_commands()
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fetch_reports_missing_sessions_as_incomplete() -> anyhow::Result<()> {
    let device = device_replying(&[
        "Data readings\n",
        "id:1 t:1000 p:60 10,11,12\n",
        "Total readings:2\n",
    ]);
    let session = connect(&device).await?;

    let outcome = pepperoni::SessionFetchHandler::new(false)
        .fetch(&session, 0)
        .await?;

    let pepperoni::FetchOutcome::Incomplete { partial } = outcome else {
        panic!("a short listing should be incomplete");
    };
    assert_eq!(2, partial.declared_count());
    assert_eq!(1, partial.records().len());
    assert!(partial.terminated());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn silent_device_times_out_after_five_seconds() -> anyhow::Result<()> {
    let device = device_replying(&["Data readings\n", "id:1 t:1000 p:60 1\n"]);
    let session = connect(&device).await?;
    let started = Instant::now();

    let outcome = pepperoni::SessionFetchHandler::new(false)
        .fetch(&session, 0)
        .await?;

    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_matches!(
        outcome.into_complete(),
        Err(pepperoni::ProtocolError::IncompleteTransfer {
            declared: 0,
            collected: 1
        })
    );
    assert_eq!(0, device.open_subscriptions());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dropped_link_fails_fetch_without_waiting() -> anyhow::Result<()> {
    let device = pepperoni::FakeDevice::builder()
        .name("peppe")
        .responses(vec![
            pepperoni::FakeResponse::new("turndata disp", ["Data readings\nid:1 t:1"])
                .then_disconnect(),
        ])
        .build();
    let session = connect(&device).await?;
    let started = Instant::now();

    let result = pepperoni::SessionFetchHandler::new(false)
        .fetch(&session, 0)
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_matches!(result, Err(pepperoni::InteractionError::LinkDropped { .. }));
    assert_eq!(0, device.open_subscriptions());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn version_query_collects_until_quiet() -> anyhow::Result<()> {
    let device = pepperoni::FakeDevice::builder()
        .name("peppe")
        .responses(vec![pepperoni::FakeResponse::new(
            "version",
            ["Build: Oct 12 2026\n\r", "IDF: v5.2\n\r"],
        )])
        .build();
    let session = connect(&device).await?;

    let lines = pepperoni::VersionHandler::query(&session).await?;

    assert_eq!(
        vec!["Build: Oct 12 2026".to_string(), "IDF: v5.2".to_string()],
        lines
    );
    assert_eq!(vec!["version".to_string()], device.written_commands());
    Ok(())
}
