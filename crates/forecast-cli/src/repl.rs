use std::io::{BufRead, Write};

use anyhow::Result;
use forecast_core::{AgentOutput, ForecastAgent, ForecastError, McpClient};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const PROMPT: &str = "\nQuery: ";

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Quit,
    Empty,
    Question(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        Input::Empty
    } else if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
        Input::Quit
    } else {
        Input::Question(line.to_string())
    }
}

pub async fn print_capabilities(client: &McpClient) -> Result<()> {
    let tools = client.list_tools().await?;
    let resources = client.list_resources().await?;
    let mut out = std::io::stdout();
    writeln!(out, "Connected to {}", client.server_name)?;
    writeln!(out, "Available tools:")?;
    for tool in &tools {
        writeln!(
            out,
            "  - {}: {}",
            tool.name,
            tool.description.as_deref().unwrap_or("")
        )?;
    }
    writeln!(out, "Available resources:")?;
    for resource in &resources {
        writeln!(out, "  - {} ({})", resource.name, resource.uri)?;
    }
    Ok(())
}

/// Interactive loop on stdin/stdout.
pub async fn run(agent: &ForecastAgent, cancel: &CancellationToken, json: bool) -> Result<()> {
    run_lines(agent, stdin_lines(), &mut std::io::stdout(), cancel, json).await
}

/// Lines from stdin, read on a plain thread. A blocked read never holds up
/// the runtime, so an interrupt can end the session while input is pending.
fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(1);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let text = line.trim_end_matches(['\r', '\n']).to_string();
                    if tx.blocking_send(text).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("reading stdin failed: {}", e);
                    break;
                }
            }
        }
        debug!("stdin closed");
    });
    rx
}

async fn run_lines<W: Write>(
    agent: &ForecastAgent,
    mut lines: mpsc::Receiver<String>,
    out: &mut W,
    cancel: &CancellationToken,
    json: bool,
) -> Result<()> {
    writeln!(out, "Ask about the weather. Type 'exit' or 'quit' to leave.")?;
    loop {
        write!(out, "{PROMPT}")?;
        out.flush()?;

        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.recv() => line,
        };
        let Some(line) = line else { break };

        let question = match parse_input(&line) {
            Input::Quit => break,
            Input::Empty => continue,
            Input::Question(q) => q,
        };

        match agent.ask_with_cancel(&question, cancel).await {
            Ok(output) => print_answer(out, &output, json)?,
            Err(ForecastError::Cancelled) => break,
            Err(e) if e.is_fatal_to_session() => return Err(e.into()),
            Err(e) => {
                warn!("question failed: {}", e);
                writeln!(out, "\nError: {e}")?;
            }
        }
    }
    writeln!(out, "\nGoodbye.")?;
    Ok(())
}

fn print_answer<W: Write>(out: &mut W, output: &AgentOutput, json: bool) -> Result<()> {
    if json {
        writeln!(out, "\n{}", serde_json::to_string_pretty(output)?)?;
    } else {
        writeln!(out, "\n{}", output.answer)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use forecast_core::{
        ClientOptions, ForecastAgentBuilder, ForecastConfig, LlmProvider, LlmResponse, ToolCall,
        ToolDef, Transport, Turn,
    };
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{duplex, split};
    use tokio::task::JoinHandle;

    struct Scripted(Mutex<VecDeque<LlmResponse>>);

    #[async_trait]
    impl LlmProvider for Scripted {
        async fn complete(
            &self,
            _conversation: &[Turn],
            _tools: &[ToolDef],
        ) -> forecast_core::Result<LlmResponse> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ForecastError::Oracle("script exhausted".into()))
        }
    }

    async fn agent(script: Vec<LlmResponse>) -> ForecastAgent {
        agent_with_provider(script).await.0
    }

    async fn agent_with_provider(
        script: Vec<LlmResponse>,
    ) -> (ForecastAgent, JoinHandle<anyhow::Result<()>>) {
        let (ours, theirs) = duplex(16 * 1024);
        let provider = tokio::spawn(async move {
            let (r, w) = split(theirs);
            forecast_mcp::server().serve(r, w).await
        });
        let (r, w) = split(ours);
        let client = McpClient::connect(
            "weather",
            Transport::from_io("weather", r, w),
            ClientOptions::default(),
        )
        .await
        .unwrap();
        let agent = ForecastAgentBuilder::new(
            &ForecastConfig::default(),
            Scripted(Mutex::new(script.into())),
            Arc::new(client),
        )
        .build();
        (agent, provider)
    }

    /// A finished line source holding `input`.
    fn feed(input: &str) -> mpsc::Receiver<String> {
        let lines: Vec<&str> = input.lines().collect();
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            tx.try_send(line.to_string()).unwrap();
        }
        rx
    }

    async fn session(agent: &ForecastAgent, input: &str, json: bool) -> String {
        let mut out = Vec::new();
        run_lines(agent, feed(input), &mut out, &CancellationToken::new(), json)
            .await
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn recognises_quit_words() {
        assert_eq!(parse_input("exit"), Input::Quit);
        assert_eq!(parse_input("  QUIT "), Input::Quit);
        assert_eq!(parse_input("   "), Input::Empty);
        assert_eq!(
            parse_input("Weather in Aleppo?"),
            Input::Question("Weather in Aleppo?".into())
        );
    }

    #[tokio::test]
    async fn answers_then_quits() {
        let agent = agent(vec![
            LlmResponse::tool_calls(vec![ToolCall::new(
                "c1",
                "getWeatherDataByCityName",
                r#"{"city":"Aleppo"}"#,
            )]),
            LlmResponse::text("21°C and sunny"),
        ])
        .await;
        let out = session(&agent, "\nWeather in Aleppo?\nExit\nnever asked\n", false).await;

        assert!(out.contains("\n21°C and sunny\n"));
        assert!(!out.contains("never asked"));
        assert!(out.ends_with("Goodbye.\n"));
    }

    #[tokio::test]
    async fn errors_are_reported_and_the_loop_continues() {
        let agent = agent(vec![
            LlmResponse::tool_calls(vec![ToolCall::new(
                "c1",
                "getWeatherDataByCityName",
                "{city: Aleppo",
            )]),
            LlmResponse::text("second answer"),
        ])
        .await;
        let out = session(&agent, "first\nsecond\n", false).await;

        assert!(out.contains("Error: "));
        assert!(out.contains("second answer"));
    }

    #[tokio::test]
    async fn json_output_includes_transcript() {
        let agent = agent(vec![LlmResponse::text("hello")]).await;
        let out = session(&agent, "hi\n", true).await;
        assert!(out.contains(r#""answer": "hello""#));
        assert!(out.contains(r#""transcript""#));
    }

    #[tokio::test]
    async fn cancelled_before_input_exits_cleanly() {
        let agent = agent(Vec::new()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut out = Vec::new();
        run_lines(&agent, feed("Weather?\n"), &mut out, &cancel, false)
            .await
            .unwrap();
        assert!(String::from_utf8(out).unwrap().ends_with("Goodbye.\n"));
    }

    #[tokio::test]
    async fn cancel_ends_the_session_while_waiting_for_input() {
        let agent = agent(Vec::new()).await;
        let cancel = CancellationToken::new();
        // The sender stays alive, so no line and no end of input ever arrive.
        let (_tx, lines) = mpsc::channel::<String>(1);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let mut out = Vec::new();
        let finished = tokio::time::timeout(
            Duration::from_secs(2),
            run_lines(&agent, lines, &mut out, &cancel, false),
        )
        .await;
        assert!(matches!(finished, Ok(Ok(()))));
        assert!(String::from_utf8(out).unwrap().ends_with("Goodbye.\n"));
    }

    #[tokio::test]
    async fn provider_exit_ends_the_session() {
        let (agent, provider) = agent_with_provider(vec![LlmResponse::text("unused")]).await;
        provider.abort();
        let _ = provider.await;

        let mut out = Vec::new();
        let err = run_lines(
            &agent,
            feed("Weather in Aleppo?\nWeather in Istanbul?\n"),
            &mut out,
            &CancellationToken::new(),
            false,
        )
        .await
        .unwrap_err();

        let err = err.downcast::<ForecastError>().unwrap();
        assert!(matches!(err, ForecastError::SessionClosed { .. }));
        assert!(!String::from_utf8(out).unwrap().contains("Goodbye."));
    }
}
