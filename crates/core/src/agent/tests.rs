use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tagcall_model::{ErrorKind, ModelMessage};
use tagcall_test_model::{PresetResponse, TestModelProvider};

use crate::conversation::Role;
use crate::tool::{Arguments, Error as ToolError, Schema};
use crate::{
    Agent, AgentBuilder, AgentError, AgentStage, DEFAULT_FALLBACK_ANSWER,
    Markup, RetryPolicy, RunOptions, ToolSpec,
};

const SYSTEM_PROMPT: &str = "You are a helpful AI Assistant";

fn call(name: &str, arguments: Value) -> String {
    call_with(Markup::default(), name, arguments)
}

fn call_with(markup: Markup, name: &str, arguments: Value) -> String {
    let arguments = arguments.as_object().cloned().unwrap_or_default();
    markup.encode(name, &arguments)
}

/// A provider answering round `n` of the first prompt with `replies[n-1]`.
fn scripted(replies: &[&str]) -> TestModelProvider {
    let mut provider = TestModelProvider::default();
    provider.add_input_step();
    for reply in replies {
        provider.add_exchange(reply);
    }
    provider
}

fn weather_spec(executions: Arc<AtomicUsize>) -> ToolSpec {
    ToolSpec::new("Get the current weather for a location.")
        .with_parameters(Schema::object().property(
            "location",
            Schema::string().described("City name"),
        ))
        .with_example("What's the weather in Bern?", json!({ "location": "Bern" }))
        .with_example("Is it cold in London?", json!({ "location": "London" }))
        .with_handler(move |arguments: Arguments| {
            executions.fetch_add(1, Ordering::SeqCst);
            let location = arguments
                .get("location")
                .and_then(Value::as_str)
                .unwrap_or("nowhere")
                .to_owned();
            async move { Ok(format!("Sunny in {location}, 22 degrees")) }
        })
}

fn agent_with(provider: &TestModelProvider, tools: Vec<(&str, ToolSpec)>) -> Agent {
    let mut builder = AgentBuilder::with_model_provider(provider.clone())
        .with_system_prompt(SYSTEM_PROMPT)
        .with_retry_policy(RetryPolicy::none());
    for (name, spec) in tools {
        builder = builder.with_tool_spec(name, spec);
    }
    builder.build().unwrap()
}

fn last_message(provider: &TestModelProvider, request_idx: usize) -> ModelMessage {
    let requests = provider.requests();
    requests[request_idx].messages.last().cloned().unwrap()
}

#[tokio::test]
async fn test_weather_in_two_rounds() {
    let provider = scripted(&[
        format!(
            "Let me check.\n{}",
            call("getWeather", json!({ "location": "Paris" }))
        )
        .as_str(),
        "It is sunny in Paris, 22 degrees.",
    ]);
    let executions = Arc::new(AtomicUsize::new(0));
    let mut agent = agent_with(
        &provider,
        vec![("getWeather", weather_spec(Arc::clone(&executions)))],
    );

    let ready = Arc::new(AtomicUsize::new(0));
    let options = RunOptions::default().on_engine_ready({
        let ready = Arc::clone(&ready);
        move || {
            ready.fetch_add(1, Ordering::SeqCst);
        }
    });
    let outcome = agent
        .run("What's the weather in Paris?", options)
        .await
        .unwrap();

    assert_eq!(outcome.answer, "It is sunny in Paris, 22 degrees.");
    assert!(!outcome.is_fallback);
    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.executed_calls.len(), 1);
    assert_eq!(outcome.executed_calls[0].name, "getWeather");
    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert_eq!(ready.load(Ordering::SeqCst), 2);

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    let ModelMessage::System(system_prompt) = &requests[0].messages[0] else {
        panic!("first message must be the system prompt");
    };
    assert!(system_prompt.starts_with("You are a helpful AI Assistant\n\n# Tools"));
    assert!(system_prompt.contains("## getWeather"));
    assert_eq!(
        requests[0].messages[1],
        ModelMessage::User("What's the weather in Paris?".to_owned())
    );
    assert_eq!(
        last_message(&provider, 1),
        ModelMessage::ToolResult("Sunny in Paris, 22 degrees".to_owned())
    );
}

#[tokio::test]
async fn test_history_keeps_raw_replies() {
    let first_reply = format!(
        "Checking. {}",
        call("getWeather", json!({ "location": "Bern" }))
    );
    let provider = scripted(&[first_reply.as_str(), "Sunny in Bern."]);
    let mut agent = agent_with(
        &provider,
        vec![("getWeather", weather_spec(Default::default()))],
    );
    agent
        .process_prompt("Weather in Bern?", RunOptions::default())
        .await
        .unwrap();

    let messages = agent.conversation().unwrap().messages();
    let roles = messages.iter().map(|m| m.role()).collect::<Vec<_>>();
    assert_eq!(
        roles,
        [
            Role::System,
            Role::User,
            Role::Assistant,
            Role::ToolResult,
            Role::Assistant
        ]
    );
    assert_eq!(messages[2].content(), first_reply);
    assert!(messages.iter().all(|m| !m.is_streaming()));
}

#[tokio::test]
async fn test_single_round_never_executes_tools() {
    let reply = format!(
        "I will look it up. {}",
        call("getWeather", json!({ "location": "Paris" }))
    );
    let provider = scripted(&[reply.as_str()]);
    let executions = Arc::new(AtomicUsize::new(0));
    let mut agent = agent_with(
        &provider,
        vec![("getWeather", weather_spec(Arc::clone(&executions)))],
    );

    let outcome = agent
        .run("Weather?", RunOptions::default().with_max_rounds(1))
        .await
        .unwrap();
    assert_eq!(outcome.answer, "I will look it up.");
    assert_eq!(outcome.rounds, 1);
    assert!(outcome.executed_calls.is_empty());
    assert_eq!(executions.load(Ordering::SeqCst), 0);
    assert_eq!(provider.requests().len(), 1);
}

#[tokio::test]
async fn test_zero_rounds() {
    let provider = scripted(&[]);
    let mut agent = agent_with(&provider, vec![]);
    let outcome = agent
        .run("Hi", RunOptions::default().with_max_rounds(0))
        .await
        .unwrap();
    assert_eq!(outcome.answer, DEFAULT_FALLBACK_ANSWER);
    assert!(outcome.is_fallback);
    assert_eq!(outcome.rounds, 0);
    assert!(provider.requests().is_empty());
}

#[tokio::test]
async fn test_plain_chat_without_tools() {
    let provider = scripted(&["Hello! How can I help?"]);
    let mut agent = agent_with(&provider, vec![]);
    let answer = agent
        .process_prompt("Hi", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(answer, "Hello! How can I help?");
    assert_eq!(
        provider.requests()[0].messages[0],
        ModelMessage::System(SYSTEM_PROMPT.to_owned())
    );
}

fn dedupe_script() -> TestModelProvider {
    let bern = call("getWeather", json!({ "location": "Bern" }));
    let london = call("getWeather", json!({ "location": "London" }));
    scripted(&[
        bern.as_str(),
        format!("{bern}\n{london}").as_str(),
        "Sunny in both cities.",
    ])
}

#[tokio::test]
async fn test_dedupe_skips_repeated_calls() {
    let provider = dedupe_script();
    let executions = Arc::new(AtomicUsize::new(0));
    let mut agent = agent_with(
        &provider,
        vec![("getWeather", weather_spec(Arc::clone(&executions)))],
    );

    let outcome = agent
        .run("Bern and London?", RunOptions::default().with_dedupe(true))
        .await
        .unwrap();
    assert_eq!(outcome.answer, "Sunny in both cities.");
    assert_eq!(outcome.rounds, 3);
    assert_eq!(executions.load(Ordering::SeqCst), 2);
    assert_eq!(
        last_message(&provider, 1),
        ModelMessage::ToolResult("Sunny in Bern, 22 degrees".to_owned())
    );
    assert_eq!(
        last_message(&provider, 2),
        ModelMessage::ToolResult("Sunny in London, 22 degrees".to_owned())
    );
}

#[tokio::test]
async fn test_repeated_calls_run_without_dedupe() {
    let provider = dedupe_script();
    let executions = Arc::new(AtomicUsize::new(0));
    let mut agent = agent_with(
        &provider,
        vec![("getWeather", weather_spec(Arc::clone(&executions)))],
    );

    let outcome = agent
        .run("Bern and London?", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.rounds, 3);
    assert_eq!(executions.load(Ordering::SeqCst), 3);
    assert_eq!(
        last_message(&provider, 2),
        ModelMessage::ToolResult(
            "Sunny in Bern, 22 degrees\n\nSunny in London, 22 degrees"
                .to_owned()
        )
    );
}

#[tokio::test]
async fn test_fallback_when_rounds_run_out() {
    let replies = ["Paris", "Rome", "Oslo", "Bern", "Lima"]
        .map(|city| call("getWeather", json!({ "location": city })));
    let provider =
        scripted(&replies.iter().map(String::as_str).collect::<Vec<_>>());
    let executions = Arc::new(AtomicUsize::new(0));
    let mut agent = agent_with(
        &provider,
        vec![("getWeather", weather_spec(Arc::clone(&executions)))],
    );

    let outcome = agent
        .run("Weather everywhere?", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.answer, DEFAULT_FALLBACK_ANSWER);
    assert!(outcome.is_fallback);
    assert_eq!(outcome.rounds, 5);
    // Calls of the last round are not executed.
    assert_eq!(executions.load(Ordering::SeqCst), 4);
    assert_eq!(provider.requests().len(), 5);
}

#[tokio::test]
async fn test_fallback_on_unreadable_markup() {
    let provider = scripted(&["<tool_call>no idea what goes here</tool_call>"]);
    let mut agent = AgentBuilder::with_model_provider(provider.clone())
        .with_tool_spec("getWeather", weather_spec(Default::default()))
        .with_system_prompt(SYSTEM_PROMPT)
        .with_fallback_answer("No answer.")
        .build()
        .unwrap();

    let outcome = agent.run("Hm?", RunOptions::default()).await.unwrap();
    assert_eq!(outcome.answer, "No answer.");
    assert_eq!(outcome.rounds, 1);
}

#[tokio::test]
async fn test_unknown_tools_are_ignored() {
    let reply = format!(
        "Booking now. {}",
        call("bookHotel", json!({ "city": "Paris" }))
    );
    let provider = scripted(&[reply.as_str()]);
    let mut agent = agent_with(
        &provider,
        vec![("getWeather", weather_spec(Default::default()))],
    );
    let outcome = agent.run("Book it", RunOptions::default()).await.unwrap();
    assert_eq!(outcome.answer, "Booking now.");
    assert_eq!(outcome.rounds, 1);
}

#[tokio::test]
async fn test_empty_tool_results_give_fallback() {
    let reply = format!("Noted. {}", call("note", json!({})));
    let provider = scripted(&[reply.as_str()]);
    let silent = ToolSpec::new("Takes a note.")
        .with_handler(|_| async { Ok(String::new()) });
    let mut agent = agent_with(&provider, vec![("note", silent)]);

    let outcome = agent.run("Note it", RunOptions::default()).await.unwrap();
    assert!(outcome.is_fallback);
    assert_eq!(outcome.rounds, 1);
    assert_eq!(outcome.executed_calls.len(), 1);
}

#[tokio::test]
async fn test_tool_failures_are_reported() {
    let provider = scripted(&[
        format!(
            "{}{}{}",
            call("getWeather", json!({ "location": "Atlantis" })),
            call("explode", json!({})),
            call("getWeather", json!({ "location": "Bern" })),
        )
        .as_str(),
        "Only Bern is known.",
    ]);
    let failing = ToolSpec::new("Get the weather.").with_handler(|_| async {
        Err(ToolError::execution_error().with_reason("city not found"))
    });
    let exploding = ToolSpec::new("Explodes.")
        .with_handler(|_| async { panic!("boom") });
    let mut agent = agent_with(
        &provider,
        vec![("getWeather", failing), ("explode", exploding)],
    );

    let answer = agent
        .process_prompt("Weather?", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(answer, "Only Bern is known.");
    assert_eq!(
        last_message(&provider, 1),
        ModelMessage::ToolResult(
            "Tool `getWeather` failed: Execution error: city not found\n\n\
             Tool `explode` failed: the tool panicked\n\n\
             Tool `getWeather` failed: Execution error: city not found"
                .to_owned()
        )
    );
}

#[tokio::test]
async fn test_results_follow_call_order() {
    let provider = scripted(&[
        format!("{}{}", call("slow", json!({})), call("fast", json!({}))).as_str(),
        "Done.",
    ]);
    let slow = ToolSpec::new("Slow.").with_handler(|_| async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok("slow result".to_owned())
    });
    let fast = ToolSpec::new("Fast.")
        .with_handler(|_| async { Ok("fast result".to_owned()) });
    let mut agent = agent_with(&provider, vec![("slow", slow), ("fast", fast)]);

    agent.run("Go", RunOptions::default()).await.unwrap();
    assert_eq!(
        last_message(&provider, 1),
        ModelMessage::ToolResult("slow result\n\nfast result".to_owned())
    );
}

#[tokio::test]
async fn test_argument_validation() {
    let provider = scripted(&[
        call("getWeather", json!({ "city": "Paris" })).as_str(),
        "Which city?",
    ]);
    let executions = Arc::new(AtomicUsize::new(0));
    let mut agent = AgentBuilder::with_model_provider(provider.clone())
        .with_tool_spec("getWeather", weather_spec(Arc::clone(&executions)))
        .with_system_prompt(SYSTEM_PROMPT)
        .validate_arguments(true)
        .build()
        .unwrap();

    let outcome = agent.run("Weather?", RunOptions::default()).await.unwrap();
    assert_eq!(outcome.answer, "Which city?");
    assert_eq!(executions.load(Ordering::SeqCst), 0);
    assert!(outcome.executed_calls.is_empty());
    assert_eq!(
        last_message(&provider, 1),
        ModelMessage::ToolResult(
            "Tool `getWeather` failed: Invalid input: `$.location` is required"
                .to_owned()
        )
    );
}

#[tokio::test]
async fn test_tools_registered_later_wait_for_next_conversation() {
    let weather = call("getWeather", json!({ "location": "Bern" }));
    let provider = scripted(&[weather.as_str(), "It is sunny in Bern."]);
    let mut agent = agent_with(&provider, vec![]);
    let executions = Arc::new(AtomicUsize::new(0));
    agent
        .register_tool_spec("getWeather", weather_spec(Arc::clone(&executions)))
        .unwrap();

    // The running conversation was compiled without the tool.
    let outcome = agent
        .run("Weather in Bern?", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.answer, DEFAULT_FALLBACK_ANSWER);
    assert!(outcome.executed_calls.is_empty());
    assert_eq!(executions.load(Ordering::SeqCst), 0);
    assert!(agent.conversation().unwrap().tools().is_empty());

    let conversation = agent.create_conversation(SYSTEM_PROMPT).unwrap();
    assert!(conversation.tools().contains("getWeather"));
    assert!(conversation.system_prompt().contains("## getWeather"));

    let outcome = agent
        .run("Weather in Bern?", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.answer, "It is sunny in Bern.");
    assert_eq!(outcome.executed_calls.len(), 1);
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_alternative_markup() {
    let markup = Markup::XML_FUNCTION_CALL;
    let provider = scripted(&[
        call_with(markup, "getWeather", json!({ "location": "Oslo" })).as_str(),
        "Sunny in Oslo.",
    ]);
    let mut agent = AgentBuilder::with_model_provider(provider.clone())
        .with_tool_spec("getWeather", weather_spec(Default::default()))
        .with_markup(markup)
        .with_system_prompt(SYSTEM_PROMPT)
        .build()
        .unwrap();

    let outcome = agent.run("Oslo?", RunOptions::default()).await.unwrap();
    assert_eq!(outcome.answer, "Sunny in Oslo.");
    assert_eq!(outcome.rounds, 2);
    assert!(provider.requests()[0].messages[0].content().contains("<function_call>"));
}

#[tokio::test]
async fn test_conversation_required() {
    let provider = scripted(&["Hi"]);
    let mut agent = AgentBuilder::with_model_provider(provider.clone())
        .build()
        .unwrap();
    let err = agent
        .process_prompt("Hi", RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::ConversationNotSet));
    assert!(provider.requests().is_empty());

    agent.create_conversation(SYSTEM_PROMPT).unwrap();
    let answer = agent
        .process_prompt("Hi", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(answer, "Hi");
}

#[tokio::test]
async fn test_model_required() {
    let mut agent = AgentBuilder::default().build().unwrap();
    let err = agent.create_conversation(SYSTEM_PROMPT).unwrap_err();
    assert!(matches!(err, AgentError::ModelNotConfigured));

    let err = AgentBuilder::default()
        .with_system_prompt(SYSTEM_PROMPT)
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, AgentError::ModelNotConfigured));

    agent.set_model_provider(scripted(&["Ready."]));
    agent.create_conversation(SYSTEM_PROMPT).unwrap();
    let answer = agent
        .process_prompt("Hi", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(answer, "Ready.");
}

#[tokio::test]
async fn test_invalid_tool_registration() {
    let provider = scripted(&[]);
    let err = AgentBuilder::with_model_provider(provider)
        .with_tool_spec("broken", ToolSpec::new("Has no handler."))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, AgentError::Registry(_)));
}

#[tokio::test]
async fn test_model_errors_propagate() {
    // The script ends before any reply.
    let provider = scripted(&[]);
    let mut agent = agent_with(&provider, vec![]);
    let stage = agent.subscribe_stage();

    let err = agent
        .process_prompt("Hi", RunOptions::default())
        .await
        .unwrap_err();
    match err {
        AgentError::Model(err) => assert_eq!(err.kind(), ErrorKind::Other),
        other => panic!("expected a model error, got {other:?}"),
    }
    assert_eq!(*stage.borrow(), AgentStage::Idle);
}

#[tokio::test]
async fn test_transient_model_errors_are_retried() {
    let mut provider = TestModelProvider::default();
    provider.add_input_step();
    provider.add_input_step();
    provider.add_assistant_response_step(
        PresetResponse::with_text("Back online.").with_failures(2),
    );
    let mut agent = AgentBuilder::with_model_provider(provider.clone())
        .with_system_prompt(SYSTEM_PROMPT)
        .with_retry_policy(RetryPolicy {
            initial_interval: Duration::from_millis(1),
            max_elapsed: Duration::from_secs(5),
        })
        .build()
        .unwrap();

    let answer = agent
        .process_prompt("Hi", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(answer, "Back online.");
    assert_eq!(provider.requests().len(), 3);
}

#[tokio::test]
async fn test_stage_updates() {
    let provider = scripted(&[
        call("getWeather", json!({ "location": "Bern" })).as_str(),
        "Sunny.",
    ]);
    let mut agent = agent_with(
        &provider,
        vec![("getWeather", weather_spec(Default::default()))],
    );
    let mut stage = agent.subscribe_stage();
    assert_eq!(*stage.borrow_and_update(), AgentStage::Idle);

    let watcher = tokio::spawn(async move {
        let mut seen = vec![];
        while stage.changed().await.is_ok() {
            let current = *stage.borrow_and_update();
            seen.push(current);
            if current == AgentStage::Done {
                break;
            }
        }
        seen
    });
    agent.run("Bern?", RunOptions::default()).await.unwrap();

    let seen = watcher.await.unwrap();
    assert_eq!(seen.last(), Some(&AgentStage::Done));
    for stage in &seen {
        assert!(matches!(
            stage,
            AgentStage::Generating { round: 1 | 2 }
                | AgentStage::Dispatching { round: 1, calls: 1 }
                | AgentStage::Done
        ));
    }
}
