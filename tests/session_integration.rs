mod common;

use std::sync::Arc;

use common::{FakeConnector, ScriptedDriver, app_config, write_mcp_json};
use mcp_assistant::agent::{EventDemultiplexer, QueryError};
use mcp_assistant::llm::ToolLoopModel;
use mcp_assistant::mcp::TransportKind;
use mcp_assistant::session::Session;

const SCENARIO: &str = r#"{
    "mcpServers": {
        "A": { "url": "http://127.0.0.1:8080/mcp" },
        "B": { "command": "echo", "args": ["hi"] }
    }
}"#;

async fn scenario_session(
    dir: &tempfile::TempDir,
    connector: &FakeConnector,
    driver: Arc<ScriptedDriver>,
    max_turns: usize,
) -> anyhow::Result<Session<Vec<u8>>> {
    let path = write_mcp_json(dir, SCENARIO);
    let model = Arc::new(ToolLoopModel::new(driver, 65_536));
    let session = Session::setup(
        &app_config(&path, max_turns),
        connector,
        model,
        EventDemultiplexer::new(Vec::new()),
    )
    .await?;
    Ok(session)
}

#[tokio::test]
async fn test_stream_and_process_servers_answer_a_streamed_query() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let connector = FakeConnector::default();
    let driver = Arc::new(ScriptedDriver::new("B__echo", 1));
    let mut session = scenario_session(&dir, &connector, Arc::clone(&driver), 3).await?;

    let handles = session.registry().handles();
    assert_eq!(handles.len(), 2);
    assert_eq!(handles[0].name(), "A");
    assert_eq!(handles[0].transport_kind(), TransportKind::Stream);
    assert_eq!(handles[1].name(), "B");
    assert_eq!(handles[1].transport_kind(), TransportKind::Process);
    assert_eq!(connector.spawned.lock().unwrap().as_slice(), ["echo hi"]);

    let answer = session.run_query("ping", true).await?;
    assert!(!answer.is_empty());
    assert!(answer.contains("pong"));
    assert_eq!(driver.request_count(), 2);

    let streamed = String::from_utf8(session.sink().clone())?;
    assert_eq!(streamed, format!("{answer}\n"));

    let report = session.teardown().await;
    assert_eq!(report.released_count(), 2);
    assert_eq!(report.failure_count(), 0);
    assert_eq!(connector.close_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_turn_limit_fails_query_and_teardown_still_completes() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let connector = FakeConnector::default();
    let driver = Arc::new(ScriptedDriver::new("A__echo", usize::MAX));
    let mut session = scenario_session(&dir, &connector, Arc::clone(&driver), 3).await?;

    let err = session.run_query("ping", true).await.unwrap_err();
    assert!(matches!(err, QueryError::TurnLimitExceeded { max_turns: 3 }));
    assert_eq!(driver.request_count(), 3);

    let report = session.teardown().await;
    assert_eq!(report.released_count(), 2);
    assert_eq!(connector.close_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_streaming_and_blocking_yield_the_same_answer() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let connector = FakeConnector::default();

    let mut answers = Vec::new();
    for streaming in [true, false] {
        let driver = Arc::new(ScriptedDriver::new("B__echo", 1));
        let mut session = scenario_session(&dir, &connector, driver, 3).await?;
        answers.push(session.run_query("ping", streaming).await?);
        if !streaming {
            assert!(session.sink().is_empty());
        }
        session.teardown().await;
    }

    assert_eq!(answers[0], answers[1]);
    Ok(())
}

#[tokio::test]
async fn test_invalid_entry_is_skipped_and_siblings_connect() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_mcp_json(
        &dir,
        r#"{
            "mcpServers": {
                "broken": { "env": { "X": "1" } },
                "B": { "command": "echo", "args": ["hi"] }
            }
        }"#,
    );
    let connector = FakeConnector::default();
    let model = Arc::new(ToolLoopModel::new(Arc::new(ScriptedDriver::new("B__echo", 0)), 65_536));

    let mut session = Session::setup(
        &app_config(&path, 3),
        &connector,
        model,
        EventDemultiplexer::new(Vec::new()),
    )
    .await?;

    let registry = session.registry();
    assert_eq!(registry.names(), vec!["B"]);
    assert_eq!(registry.warnings().len(), 1);
    assert_eq!(registry.warnings()[0].server, "broken");
    assert_eq!(registry.len() + registry.warnings().len(), 2);

    let answer = session.run_query("ping", false).await?;
    assert_eq!(answer, "reply: no tools");

    session.teardown().await;
    let second = session.teardown().await;
    assert!(second.outcomes.is_empty());
    assert_eq!(connector.close_count(), 1);
    Ok(())
}
