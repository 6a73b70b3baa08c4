//! Whole conversations against a mocked LLM

use super::*;
use crate::compiler::compile;
use crate::compiler::fixtures::{action, bike_shop, form, menu, pizza_shop, sequence, three_steps, tool};
use crate::config::{Configuration, DEFAULT_UNAVAILABLE_MESSAGE};
use crate::llm::{LlmError, LlmService, ModelRegistry};
use crate::memory::{ConversationMemory, ScopeId};
use crate::recording::Interaction;
use crate::runtime::testing::{CapturingChannel, MockLlmService, ScriptedInput};
use crate::runtime::EvalError;
use crate::spec::{
    ChatbotModel, DataProperty, MemoryScope, ModuleSpec, PropertyType, QuestionAnswer,
    QuestionAnsweringModule, Response,
};
use std::time::Duration;

struct Harness {
    engine: Engine,
    mock: Arc<MockLlmService>,
    channel: CapturingChannel,
}

fn harness(model: &ChatbotModel) -> Harness {
    let mock = Arc::new(MockLlmService::new("mock"));
    let service: Arc<dyn LlmService> = mock.clone();
    let configuration = Configuration::default();
    let services = Services::new(Arc::new(ModelRegistry::single(service)), &configuration)
        .with_retry_base_delay(Duration::from_millis(1));
    let chatbot = Arc::new(compile(model, &configuration).unwrap());
    let channel = CapturingChannel::new();
    let engine = Engine::new(chatbot, Arc::new(services), Box::new(channel.clone()));
    Harness {
        engine,
        mock,
        channel,
    }
}

fn reply(text: &str) -> String {
    format!("Thought: Do I need to use a tool? No\nAI: {text}")
}

fn tool_call(tool: &str, input: &str) -> String {
    format!("Thought: Do I need to use a tool? Yes\nAction: {tool}\nAction Input: {input}")
}

fn collected(engine: &Engine, module: &str) -> crate::memory::DataRecord {
    engine
        .state()
        .memory()
        .bucket(module, ScopeId::CollectedData)
        .map(ConversationMemory::data)
        .unwrap_or_default()
}

#[tokio::test]
async fn test_greeting_and_direct_answer() {
    let mut h = harness(&bike_shop());
    h.mock.queue_text(reply("9am–5:30pm"));

    assert_eq!(h.engine.start().await.unwrap(), TurnOutcome::Quiescent);
    let outcome = h.engine.execute_with_input("What are your opening hours?").await.unwrap();

    assert_eq!(outcome, TurnOutcome::Quiescent);
    assert_eq!(h.channel.texts(), vec!["Hello", "9am–5:30pm"]);
    assert_eq!(h.engine.current_module(), Some("top-level"));

    let requests = h.mock.recorded_requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].human_text().contains("What are your opening hours?"));

    let trace = h.engine.recording().trace;
    assert!(trace
        .iter()
        .all(|r| r.event.as_deref() != Some("ActivateModule")));
}

#[tokio::test]
async fn test_tool_activation_precedes_any_reply() {
    let mut h = harness(&bike_shop());
    h.engine.start().await.unwrap();
    let skip = h.engine.recording().trace.len();

    h.mock
        .queue_text(tool_call("appointment", r#"{"date": "2024-05-02"}"#));
    h.mock.queue_text(reply("At what time?"));
    let outcome = h.engine.execute_with_input("I'd like to book a repair").await.unwrap();

    assert_eq!(outcome, TurnOutcome::Quiescent);
    assert_eq!(h.engine.current_module(), Some("appointment"));
    assert_eq!(h.channel.texts(), vec!["Hello", "At what time?"]);

    let trace = h.engine.recording().trace.split_off(skip);
    let activations: Vec<usize> = trace
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            r.action == "RunTool(appointment)" && r.event.as_deref() == Some("ActivateModule")
        })
        .map(|(i, _)| i)
        .collect();
    assert_eq!(activations.len(), 1);
    let first_say = trace
        .iter()
        .position(|r| r.action.starts_with("Say"))
        .unwrap();
    assert!(activations[0] < first_say);

    // The form asked for the missing time with the collected date in memory
    let requests = h.mock.recorded_requests();
    assert!(requests[1].human_text().contains("missing data: time"));
    assert_eq!(
        collected(&h.engine, "appointment").get("date"),
        Some(&serde_json::json!("02/05/2024"))
    );
}

#[tokio::test]
async fn test_booking_completes_and_returns_to_menu() {
    let mut h = harness(&bike_shop());
    h.engine.start().await.unwrap();

    h.mock
        .queue_text(tool_call("appointment", r#"{"date": "2024-05-02"}"#));
    h.mock.queue_text(reply("At what time?"));
    h.engine.execute_with_input("Book a repair on May 2nd").await.unwrap();

    h.mock.queue_text(tool_call(
        "appointment",
        r#"{"date": "2024-05-02", "time": "10:30"}"#,
    ));
    let outcome = h.engine.execute_with_input("At half past ten").await.unwrap();

    assert_eq!(outcome, TurnOutcome::Quiescent);
    assert_eq!(
        h.channel.texts().last().map(String::as_str),
        Some("Booked for 02/05/2024 at 10:30")
    );
    assert_eq!(h.engine.current_module(), Some("top-level"));
    assert_eq!(h.mock.remaining(), 0);
    assert!(h.engine.state().pending_events().is_empty());
}

#[tokio::test]
async fn test_required_fields_gate_completion() {
    let mut h = harness(&pizza_shop(Response::direct("Ordered {{quantity}} {{size}}")));
    h.engine.start().await.unwrap();

    h.mock.queue_text(tool_call("order", r#"{"size": "large"}"#));
    h.mock.queue_text(reply("How many pizzas?"));
    h.engine.execute_with_input("A large pizza").await.unwrap();

    let requests = h.mock.recorded_requests();
    let prompt = requests[1].human_text();
    assert!(prompt.contains("missing data: quantity"));
    assert!(prompt.contains("the following data is optional: notes"));
    assert_eq!(h.engine.current_module(), Some("order"));

    // Optional notes stay unset; the order completes without them
    h.mock
        .queue_text(tool_call("order", r#"{"size": "large", "quantity": 3}"#));
    h.engine.execute_with_input("Three please").await.unwrap();

    assert_eq!(
        h.channel.texts().last().map(String::as_str),
        Some("Ordered 3 large")
    );
    assert_eq!(h.engine.current_module(), Some("pizza-shop"));
}

#[tokio::test]
async fn test_enum_synonym_needs_no_lookup() {
    let mut h = harness(&pizza_shop(Response::direct("Ordered {{quantity}} {{size}}")));
    h.engine.start().await.unwrap();

    h.mock
        .queue_text(tool_call("order", r#"{"size": "little", "quantity": "2"}"#));
    h.engine.execute_with_input("Two little pizzas").await.unwrap();

    assert_eq!(h.mock.recorded_requests().len(), 1);
    assert_eq!(
        h.channel.texts().last().map(String::as_str),
        Some("Ordered 2 small")
    );
}

#[tokio::test]
async fn test_unknown_enum_value_is_reported() {
    let mut h = harness(&pizza_shop(Response::direct("Ordered {{quantity}} {{size}}")));
    h.mock.route("Answer only with the value", "NO_MATCH");
    h.engine.start().await.unwrap();

    h.mock.queue_text(tool_call("order", r#"{"size": "gigantic"}"#));
    h.mock.queue_text(reply("We only have small and large."));
    h.engine.execute_with_input("A gigantic pizza").await.unwrap();

    let requests = h.mock.recorded_requests();
    // Tool call, enum lookup, then the form's question
    assert_eq!(requests.len(), 3);
    let prompt = requests[2].human_text();
    assert!(prompt.contains("could not understand: gigantic"));
    assert!(prompt.contains("size, quantity"));
    assert_eq!(
        h.channel.texts().last().map(String::as_str),
        Some("We only have small and large.")
    );
}

#[tokio::test]
async fn test_in_caller_result_goes_through_the_menu() {
    let mut h = harness(&pizza_shop(
        Response::direct("Ordered {{quantity}} {{size}}").with_rephrase("in-caller"),
    ));
    h.engine.start().await.unwrap();

    h.mock
        .queue_text(tool_call("order", r#"{"size": "small", "quantity": 1}"#));
    h.mock.queue_text(reply("Your small pizza is on its way!"));
    h.engine.execute_with_input("One small pizza").await.unwrap();

    let requests = h.mock.recorded_requests();
    assert_eq!(requests.len(), 2);
    let prompt = format!("{}{}", requests[1].system_text(), requests[1].human_text());
    assert!(prompt.contains("Ordered 1 small"));
    assert_eq!(
        h.channel.texts(),
        vec!["Hello", "Your small pizza is on its way!"]
    );
    assert_eq!(h.engine.current_module(), Some("pizza-shop"));
}

/// Walk the three-step registration to its end
async fn register(h: &mut Harness) {
    h.engine.start().await.unwrap();

    h.mock.queue_text(tool_call("register", "{}"));
    h.mock.queue_text(reply("What is your name?"));
    h.engine.execute_with_input("I want to register").await.unwrap();
    assert_eq!(h.engine.current_module(), Some("step1"));

    h.mock.queue_text(tool_call("step1", r#"{"name": "Ann"}"#));
    h.mock.queue_text(reply("What is your email?"));
    h.engine.execute_with_input("Ann").await.unwrap();
    assert_eq!(h.engine.current_module(), Some("step2"));

    h.mock
        .queue_text(tool_call("step2", r#"{"email": "ann@example.com"}"#));
    h.mock.queue_text(reply("What is your phone number?"));
    h.engine.execute_with_input("ann@example.com").await.unwrap();
    assert_eq!(h.engine.current_module(), Some("step3"));

    h.mock.queue_text(tool_call("step3", r#"{"phone": "555 0101"}"#));
    let outcome = h.engine.execute_with_input("555 0101").await.unwrap();
    assert_eq!(outcome, TurnOutcome::Quiescent);
    assert_eq!(h.engine.current_module(), Some("shop"));
    assert_eq!(h.mock.remaining(), 0);
}

#[tokio::test]
async fn test_full_sequence_shares_collected_data() {
    let mut h = harness(&three_steps(MemoryScope::Full));
    register(&mut h).await;

    let step3 = collected(&h.engine, "step3");
    assert_eq!(step3.get("name"), Some(&serde_json::json!("Ann")));
    assert_eq!(step3.get("email"), Some(&serde_json::json!("ann@example.com")));

    let texts = h.channel.texts();
    assert!(texts.contains(&"The following data has been collected: name = Ann".to_string()));
    assert_eq!(
        texts.last().map(String::as_str),
        Some("The following data has been collected: phone = 555 0101")
    );
}

#[tokio::test]
async fn test_individual_sequence_isolates_steps() {
    let mut h = harness(&three_steps(MemoryScope::Individual));
    register(&mut h).await;

    let step3 = collected(&h.engine, "step3");
    assert!(!step3.contains_key("name"));
    assert!(!step3.contains_key("email"));
    assert_eq!(collected(&h.engine, "step1").get("name"), Some(&serde_json::json!("Ann")));
}

#[tokio::test]
async fn test_action_step_runs_its_effect() {
    let model = ChatbotModel::new(
        vec![
            menu("shop", vec![tool("Register", "register")]),
            sequence("register", &["step1", "welcome"], MemoryScope::Full),
            form("step1", vec![DataProperty::new("name", PropertyType::String)], None),
            action(
                "welcome",
                vec![DataProperty::new("name", PropertyType::String)],
                "echo \"Welcome $DATA_NAME\"",
                "{{result}}!",
            ),
        ],
        None,
    )
    .unwrap();
    let mut h = harness(&model);
    h.engine.start().await.unwrap();

    h.mock
        .queue_text(tool_call("register", r#"{"name": "Ann"}"#));
    h.engine.execute_with_input("Register me as Ann").await.unwrap();

    assert_eq!(
        h.channel.texts(),
        vec![
            "Hello",
            "The following data has been collected: name = Ann",
            "Welcome Ann!"
        ]
    );
    assert_eq!(h.engine.current_module(), Some("shop"));
}

#[tokio::test]
async fn test_unparseable_output_is_the_answer() {
    let mut h = harness(&bike_shop());
    h.engine.start().await.unwrap();

    h.mock.queue_text("We open at nine, see you soon.");
    let outcome = h.engine.execute_with_input("When do you open?").await.unwrap();

    assert_eq!(outcome, TurnOutcome::Quiescent);
    assert_eq!(
        h.channel.texts().last().map(String::as_str),
        Some("We open at nine, see you soon.")
    );
}

#[tokio::test]
async fn test_unknown_tool_is_an_error() {
    let mut h = harness(&bike_shop());
    h.engine.start().await.unwrap();

    h.mock.queue_text(tool_call("teleport", "{}"));
    let result = h.engine.execute_with_input("Beam me up").await;

    match result {
        Err(EngineError::UnknownTool { module, tool }) => {
            assert_eq!(module, "top-level");
            assert_eq!(tool, "teleport");
        }
        other => panic!("expected UnknownTool, got {other:?}"),
    }
    assert!(h.engine.state().pending_events().is_empty());
}

#[tokio::test]
async fn test_llm_unavailable_is_reported_and_recoverable() {
    let mut h = harness(&bike_shop());
    h.engine.start().await.unwrap();

    for _ in 0..3 {
        h.mock.queue_error(LlmError::network("connection refused"));
    }
    let outcome = h.engine.execute_with_input("Hours?").await.unwrap();

    assert!(matches!(outcome, TurnOutcome::LlmUnavailable { .. }));
    assert_eq!(h.mock.recorded_requests().len(), 3);
    assert_eq!(
        h.channel.texts().last().map(String::as_str),
        Some(DEFAULT_UNAVAILABLE_MESSAGE)
    );
    assert_eq!(h.engine.current_module(), Some("top-level"));

    h.mock.queue_text(reply("9am–5:30pm"));
    let outcome = h.engine.execute_with_input("Hours?").await.unwrap();
    assert_eq!(outcome, TurnOutcome::Quiescent);
    assert_eq!(
        h.channel.texts().last().map(String::as_str),
        Some("9am–5:30pm")
    );
}

/// Shop menu with a question answering tool
fn faq_shop() -> ChatbotModel {
    ChatbotModel::new(
        vec![
            menu("shop", vec![tool("FAQ", "faq")]),
            ModuleSpec::QuestionAnswering(QuestionAnsweringModule {
                name: "faq".to_string(),
                description: "Answers questions about the shop".to_string(),
                questions: vec![QuestionAnswer {
                    question: "Do you sell e-bikes?".to_string(),
                    answer: "Yes, from three brands.".to_string(),
                }],
                on_success: None,
            }),
        ],
        None,
    )
    .unwrap()
}

/// Shop whose registration ends in a failing effect
fn failing_welcome() -> ChatbotModel {
    ChatbotModel::new(
        vec![
            menu("shop", vec![tool("Register", "register")]),
            sequence("register", &["step1", "welcome"], MemoryScope::Full),
            form("step1", vec![DataProperty::new("name", PropertyType::String)], None),
            action(
                "welcome",
                vec![DataProperty::new("name", PropertyType::String)],
                "echo broken >&2; exit 3",
                "{{result}}",
            ),
        ],
        None,
    )
    .unwrap()
}

#[tokio::test]
async fn test_llm_failure_in_a_tool_returns_to_the_caller() {
    let mut h = harness(&faq_shop());
    h.engine.start().await.unwrap();

    h.mock.queue_text(tool_call("faq", "Do you sell e-bikes?"));
    for _ in 0..3 {
        h.mock.queue_error(LlmError::network("connection refused"));
    }
    let outcome = h.engine.execute_with_input("Do you sell e-bikes?").await.unwrap();

    assert!(matches!(outcome, TurnOutcome::LlmUnavailable { .. }));
    assert_eq!(h.engine.current_module(), Some("shop"));
    assert_eq!(
        h.channel.texts().last().map(String::as_str),
        Some(DEFAULT_UNAVAILABLE_MESSAGE)
    );

    h.mock.queue_text(reply("How can I help?"));
    let outcome = h.engine.execute_with_input("hello?").await.unwrap();
    assert_eq!(outcome, TurnOutcome::Quiescent);
    assert_eq!(h.engine.current_module(), Some("shop"));
    assert_eq!(
        h.channel.texts().last().map(String::as_str),
        Some("How can I help?")
    );
}

#[tokio::test]
async fn test_failed_effect_leaves_the_conversation_usable() {
    let mut h = harness(&failing_welcome());
    h.engine.start().await.unwrap();

    h.mock.queue_text(tool_call("register", r#"{"name": "Ann"}"#));
    let result = h.engine.execute_with_input("Register me as Ann").await;

    assert!(matches!(
        result,
        Err(EngineError::Evaluator(EvalError::Failed { code: 3, .. }))
    ));
    assert_eq!(h.engine.current_module(), Some("shop"));
    assert!(h.engine.state().pending_events().is_empty());

    h.mock.queue_text(reply("Anything else?"));
    let outcome = h.engine.execute_with_input("hello?").await.unwrap();
    assert_eq!(outcome, TurnOutcome::Quiescent);
    assert_eq!(
        h.channel.texts().last().map(String::as_str),
        Some("Anything else?")
    );
}

#[tokio::test]
async fn test_run_all_survives_a_failed_turn() {
    let mut h = harness(&failing_welcome());
    h.mock.queue_text(tool_call("register", r#"{"name": "Ann"}"#));
    h.mock.queue_text(reply("Anything else?"));

    let mut input = ScriptedInput::new(&["Register me as Ann", "hello?"]);
    h.engine.run_all(&mut input).await.unwrap();

    let texts = h.channel.texts();
    assert!(texts
        .iter()
        .any(|text| text.starts_with("Sorry, I could not complete that:")));
    assert_eq!(texts.last().map(String::as_str), Some("Anything else?"));
    assert_eq!(h.engine.current_module(), Some("shop"));
    assert_eq!(h.mock.remaining(), 0);
}

#[tokio::test]
async fn test_event_without_transition_is_unhandled() {
    let mut h = harness(&bike_shop());
    h.engine.start().await.unwrap();

    // the menu has no edge activating itself
    let menu = h.engine.chatbot().modules().lookup("top-level").unwrap();
    let stray = Event::ActivateModule {
        target: menu,
        input: None,
        previous_answer: crate::memory::MemoryPiece::new(),
    };
    h.engine.state.push_event(Event::user_input("never seen"));
    h.engine.state.push_event(stray.clone());
    let outcome = h.engine.run().await.unwrap();

    assert_eq!(outcome, TurnOutcome::Unhandled { event: stray });
    assert_ne!(outcome, TurnOutcome::Quiescent);
    assert!(h.engine.state().pending_events().is_empty());
    assert!(h.mock.recorded_requests().is_empty());
    assert_eq!(h.engine.current_module(), Some("top-level"));
}

#[tokio::test]
async fn test_input_before_start_is_rejected() {
    let mut h = harness(&bike_shop());
    let result = h.engine.execute_with_input("hello?").await;
    assert!(matches!(result, Err(EngineError::NotStarted)));
    assert!(h.mock.recorded_requests().is_empty());
}

#[tokio::test]
async fn test_run_all_records_the_conversation() {
    let mut h = harness(&bike_shop());
    h.mock.queue_text(reply("9am–5:30pm"));

    let mut input = ScriptedInput::new(&["What are your opening hours?"]);
    h.engine.run_all(&mut input).await.unwrap();

    let recording = h.engine.recording();
    assert_eq!(
        recording.interactions,
        vec![
            Interaction::Chatbot(vec!["Hello".into()]),
            Interaction::User("What are your opening hours?".into()),
            Interaction::Chatbot(vec!["9am–5:30pm".into()]),
        ]
    );
    assert_eq!(recording.response_times_ms.len(), 1);
    assert!(recording
        .trace
        .iter()
        .any(|r| r.action == "Say(event)" && r.event.as_deref() == Some("AIResponse")));
}
