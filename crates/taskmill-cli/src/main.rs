//! Demo wiring for the task engine: reference chat/analysis/search handlers,
//! a few submitted tasks, and progress observation over the event channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use taskmill_core::{
    EngineConfig, JobContext, Task, TaskEngine, TaskError, TaskHandler, TaskType,
};

#[derive(Debug, Deserialize)]
struct ChatInput {
    message: String,
}

/// Canonical handler shape: validate input, report mid progress, do the work.
struct ChatHandler;

#[async_trait]
impl TaskHandler for ChatHandler {
    async fn handle(&self, ctx: &JobContext, task: &Task) -> Result<serde_json::Value, TaskError> {
        let input: ChatInput = serde_json::from_value(task.input.clone())
            .map_err(|e| TaskError::invalid_input(format!("Invalid input for chat task: {e}")))?;
        ctx.report_progress(50).await;

        // Stand-in for the LLM call.
        sleep(Duration::from_millis(100)).await;
        Ok(serde_json::json!({ "reply": format!("echo: {}", input.message) }))
    }
}

struct AnalysisHandler;

#[async_trait]
impl TaskHandler for AnalysisHandler {
    async fn handle(&self, ctx: &JobContext, task: &Task) -> Result<serde_json::Value, TaskError> {
        let Some(address) = task.input.get("address").and_then(|a| a.as_str()) else {
            return Err(TaskError::invalid_input("Invalid input for analysis task"));
        };
        ctx.report_progress(50).await;

        // Stand-in for the chain RPC call; long enough that cancellation has
        // something to interrupt.
        for _ in 0..10 {
            if ctx.is_cancelled() {
                return Err(TaskError::permanent("analysis aborted"));
            }
            sleep(Duration::from_millis(50)).await;
        }
        Ok(serde_json::json!({ "address": address, "score": 0.87 }))
    }
}

struct SearchHandler;

#[async_trait]
impl TaskHandler for SearchHandler {
    async fn handle(&self, ctx: &JobContext, task: &Task) -> Result<serde_json::Value, TaskError> {
        if task.input.is_null() {
            return Err(TaskError::invalid_input("Invalid input for search task"));
        }
        ctx.report_progress(50).await;
        sleep(Duration::from_millis(100)).await;
        Ok(serde_json::json!({ "results": [] }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let engine = TaskEngine::builder()
        .config(EngineConfig {
            concurrency: 2,
            ..EngineConfig::default()
        })
        .handler(TaskType::new(TaskType::CHAT), Arc::new(ChatHandler))?
        .handler(TaskType::new(TaskType::ANALYSIS), Arc::new(AnalysisHandler))?
        .handler(TaskType::new(TaskType::SEARCH), Arc::new(SearchHandler))?
        .build();

    let mut events = engine.subscribe();
    engine.start();

    let chat = engine
        .add_task(
            TaskType::new(TaskType::CHAT),
            serde_json::json!({ "message": "hello" }),
            "u1",
        )
        .await?;
    let analysis = engine
        .add_task(
            TaskType::new(TaskType::ANALYSIS),
            serde_json::json!({ "address": "0xabc" }),
            "u1",
        )
        .await?;
    // Null input: fails fast with the search handler's validation error.
    let bad_search = engine
        .add_task(TaskType::new(TaskType::SEARCH), serde_json::Value::Null, "u1")
        .await?;

    println!("submitted: chat={chat} analysis={analysis} search={bad_search}");
    for summary in engine.list_tasks("u1").await? {
        println!(
            "  {} {} {} {}%",
            summary.id,
            summary.task_type,
            summary.state.as_str(),
            summary.progress
        );
    }

    // Cancel the analysis while it is (most likely) in flight.
    sleep(Duration::from_millis(80)).await;
    let cancelled = engine.cancel_task(analysis).await?;
    println!("cancel analysis -> {cancelled}");

    // Watch the remaining notifications until the channel quiets down.
    while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
        println!(
            "event: {} {}% {}",
            event.job_id,
            event.progress,
            event.state.as_str()
        );
    }

    // The failed search stays inspectable; the completed chat is gone.
    if let Some(progress) = engine.get_task_progress(bad_search).await? {
        println!(
            "search: state={} error={:?}",
            progress.state.as_str(),
            progress.error
        );
    }
    assert!(engine.get_task_progress(chat).await?.is_none());

    engine.shutdown().await;
    Ok(())
}
