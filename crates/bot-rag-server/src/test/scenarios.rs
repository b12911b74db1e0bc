use std::time::Duration;

use uuid::Uuid;

use super::support::{turn_fixture, TurnFixture, TEST_CONDENSE_TOKENS, TEST_MAX_TOKENS};
use crate::config::{ContextConfig, RateLimitConfig};
use crate::database::{MessageLog, NewChatMessage, NewFeedback};
use crate::models::chat::{ChatRequest, ChatResponse, CommandReply, TurnAnswer};
use crate::models::conversation::MessageRole;
use crate::models::metadata::ContextType;
use crate::services::conversation::TurnRequest;
use crate::utils::error::TurnError;
use crate::utils::token_estimator::estimate_tokens;

const BOT: i64 = 10;
const USER: i64 = 20;

fn fixture() -> TurnFixture {
    turn_fixture(ContextConfig::default(), RateLimitConfig::default())
}

fn request(message: &str) -> ChatRequest {
    ChatRequest {
        bot_id: BOT,
        user_id: USER,
        message: message.to_string(),
        conversation_id: None,
        is_initializing: false,
    }
}

async fn ask(fixture: &TurnFixture, message: &str) -> TurnAnswer {
    match fixture.chat.handle(request(message)).await.unwrap() {
        ChatResponse::Answer(answer) => answer,
        other => panic!("expected an answer, got {:?}", other),
    }
}

async fn command(fixture: &TurnFixture, message: &str) -> CommandReply {
    match fixture.chat.handle(request(message)).await.unwrap() {
        ChatResponse::Command(reply) => reply,
        other => panic!("expected a command reply, got {:?}", other),
    }
}

#[tokio::test]
async fn test_taught_fact_is_retrieved_for_question() {
    let fixture = fixture();
    let learned = command(&fixture, "/learn The sky is blue").await;
    assert!(learned.success);

    fixture.llm.reply("It is blue.");
    let answer = ask(&fixture, "What color is the sky?").await;

    assert_eq!(answer.answer, "It is blue.");
    assert!(answer.sources.iter().any(|s| s.content == "The sky is blue"));
    assert_eq!(answer.conversation_id, learned.conversation_id);

    let (prompt, options) = fixture.llm.calls().pop().unwrap();
    assert!(prompt[0].content.contains("The sky is blue"));
    assert_eq!(options.max_tokens, TEST_MAX_TOKENS);
}

#[tokio::test]
async fn test_fifteen_messages_keep_last_ten() {
    let fixture = fixture();
    let mut context = fixture.orchestrator.context_manager(BOT, USER, None);
    let id = context.initialize().await.unwrap();
    for turn in 1..=15 {
        context
            .add_message(&format!("turn {turn}"), MessageRole::Assistant, None)
            .await
            .unwrap();
    }

    let stored = fixture.store.conversation(id).unwrap();
    let expected: Vec<String> = (6..=15).map(|t| format!("turn {t}")).collect();
    let actual: Vec<String> = stored.messages.iter().map(|m| m.content.clone()).collect();
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_fifteen_chat_turns_keep_latest_window() {
    let fixture = fixture();
    let mut conversation_id = None;
    for turn in 1..=15 {
        fixture.llm.reply(format!("reply {turn}"));
        let answer = ask(&fixture, &format!("question number {turn} about gardening")).await;
        conversation_id = Some(answer.conversation_id);
    }

    let stored = fixture.store.conversation(conversation_id.unwrap()).unwrap();
    assert_eq!(stored.messages.len(), 10);
    assert_eq!(stored.messages[0].content, "question number 11 about gardening");
    assert_eq!(stored.messages[9].content, "reply 15");
    assert_eq!(fixture.store.conversation_count(), 1);
}

#[tokio::test]
async fn test_repeated_feedback_creates_distinct_rows() {
    let fixture = fixture();
    let conversation_id = Uuid::new_v4();
    let submit = |rating| NewFeedback {
        bot_id: BOT,
        user_id: USER,
        conversation_id,
        message_index: 3,
        rating: Some(rating),
        feedback_text: None,
        latency_ms: None,
        token_count: None,
        metadata: None,
    };

    let first = fixture.feedback.record(submit(5)).await.unwrap();
    let second = fixture.feedback.record(submit(2)).await.unwrap();

    assert_ne!(first.id, second.id);
    let rows: Vec<_> = fixture
        .store
        .feedback_rows()
        .into_iter()
        .filter(|f| f.conversation_id == conversation_id && f.message_index == 3)
        .collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(fixture.feedback.bot_metrics(BOT).await.unwrap().average_rating, Some(3.5));
}

#[tokio::test]
async fn test_forget_removes_taught_facts() {
    let fixture = fixture();
    command(&fixture, "/learn The sky is blue").await;
    assert_eq!(fixture.knowledge.search(BOT, "sky color", 5).await.unwrap().len(), 1);

    let forgot = command(&fixture, "/forget").await;
    assert!(forgot.success);
    assert!(fixture.knowledge.search(BOT, "The sky is blue", 5).await.unwrap().is_empty());
    assert_eq!(fixture.store.knowledge_count(BOT), 0);
}

#[tokio::test]
async fn test_learn_without_text_changes_nothing() {
    let fixture = fixture();
    let reply = command(&fixture, "/learn   ").await;
    assert!(!reply.success);
    assert_eq!(fixture.store.knowledge_count(BOT), 0);
    assert_eq!(fixture.store.embedding_count(), 0);
}

#[tokio::test]
async fn test_commands_are_kept_in_history_without_llm() {
    let fixture = fixture();
    let reply = command(&fixture, "/help").await;
    assert!(reply.success);
    command(&fixture, "/nope").await;

    let stored = fixture.store.conversation(reply.conversation_id).unwrap();
    assert_eq!(stored.metadata.command_history, vec!["/help", "/nope"]);
    assert_eq!(stored.messages.len(), 4);
    assert_eq!(fixture.llm.call_count(), 0);
    assert!(fixture.store.messages().is_empty());
}

#[tokio::test]
async fn test_rate_limited_turn_mutates_nothing() {
    let fixture = turn_fixture(
        ContextConfig::default(),
        RateLimitConfig {
            capacity: 300,
            refill_per_second: 1.0,
        },
    );
    ask(&fixture, "Where is the station?").await;

    let messages = fixture.store.messages().len();
    let feedback = fixture.store.feedback_rows().len();
    let embeddings = fixture.store.embedding_count();
    let llm_calls = fixture.llm.call_count();

    let err = fixture.chat.handle(request("Where is the museum?")).await.unwrap_err();
    match err {
        TurnError::RateLimited { retry_after } => assert!(retry_after > Duration::ZERO),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(fixture.store.messages().len(), messages);
    assert_eq!(fixture.store.feedback_rows().len(), feedback);
    assert_eq!(fixture.store.embedding_count(), embeddings);
    assert_eq!(fixture.llm.call_count(), llm_calls);

    fixture.clock.advance(Duration::from_secs(300));
    ask(&fixture, "Where is the museum?").await;
}

#[tokio::test]
async fn test_message_above_bucket_capacity_is_invalid_not_rate_limited() {
    let fixture = fixture();
    let oversized = "word ".repeat(40_000);

    let err = fixture.chat.handle(request(&oversized)).await.unwrap_err();
    assert!(matches!(err, TurnError::Invalid(_)), "got {:?}", err);

    assert!(fixture.store.messages().is_empty());
    assert!(fixture.store.feedback_rows().is_empty());
    assert_eq!(fixture.store.conversation_count(), 0);
    assert_eq!(fixture.store.embedding_count(), 0);
    assert_eq!(fixture.llm.call_count(), 0);
    assert_eq!(fixture.limiter.available(BOT), fixture.limiter.capacity());

    // waiting does not change the verdict
    fixture.clock.advance(Duration::from_secs(86_400));
    let err = fixture.chat.handle(request(&oversized)).await.unwrap_err();
    assert!(matches!(err, TurnError::Invalid(_)));
}

#[tokio::test]
async fn test_rewritten_turn_is_charged_for_both_calls() {
    let fixture = turn_fixture(
        ContextConfig::default(),
        RateLimitConfig {
            capacity: 10_000,
            refill_per_second: 0.0,
        },
    );
    let first = "When does the city library open on weekdays?";
    let follow_up = "and on sundays?";

    fixture.llm.reply("The library opens at nine.");
    ask(&fixture, first).await;
    let after_first = fixture.limiter.available(BOT);
    assert_eq!(10_000 - after_first as usize, estimate_tokens(first) + TEST_MAX_TOKENS);

    fixture.llm.reply("When does the city library open on Sundays?");
    fixture.llm.reply("At noon.");
    ask(&fixture, follow_up).await;
    assert_eq!(fixture.llm.call_count(), 3);

    let charged = (after_first - fixture.limiter.available(BOT)) as usize;
    assert_eq!(
        charged,
        2 * estimate_tokens(follow_up) + TEST_MAX_TOKENS + TEST_CONDENSE_TOKENS
    );
}

#[tokio::test]
async fn test_feedback_keeps_pointing_at_its_reply_after_window_slides() {
    let fixture = turn_fixture(
        ContextConfig {
            max_context_messages: 2,
            ..ContextConfig::default()
        },
        RateLimitConfig::default(),
    );
    for (question, reply) in [
        ("Which bakery sells rye bread?", "The corner bakery."),
        ("Which florist sells tulips?", "The market florist."),
        ("Which shop repairs watches?", "The clockmaker on Main Street."),
    ] {
        fixture.llm.reply(reply);
        ask(&fixture, question).await;
    }

    let rows = fixture.store.feedback_rows();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|f| f.message_index == 1));

    let mut previews: Vec<String> = fixture
        .feedback
        .history(BOT, 10, 0)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|item| item.message_preview)
        .collect();
    previews.sort();
    assert_eq!(
        previews,
        vec![
            "The clockmaker on Main Street.".to_string(),
            "The corner bakery.".to_string(),
            "The market florist.".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_failed_generation_keeps_user_message_only() {
    let fixture = fixture();
    fixture.llm.fail("model server returned 502");

    let err = fixture.chat.handle(request("Tell me a story")).await.unwrap_err();
    assert!(matches!(err, TurnError::ProcessingFailed));

    let messages = fixture.store.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "Tell me a story");
    assert!(!messages[0].sender_is_bot);
    assert!(fixture.store.feedback_rows().is_empty());
    assert_eq!(fixture.store.conversation_count(), 0);
}

#[tokio::test]
async fn test_successful_turn_commits_everything() {
    let fixture = fixture();
    fixture.llm.reply("Trains leave every hour.");
    let answer = ask(&fixture, "How often do trains leave the central station?").await;

    let messages = fixture.store.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages[1].sender_is_bot);
    assert_eq!(messages[1].content, "Trains leave every hour.");

    let context = fixture.store.conversation(answer.conversation_id).unwrap();
    assert_eq!(context.messages.len(), 2);
    assert_eq!(context.messages[0].role, MessageRole::User);
    assert!(context.metadata.last_topics.contains(&"trains".to_string()));

    let feedback = fixture.store.feedback_rows();
    assert_eq!(feedback.len(), 1);
    assert_eq!(feedback[0].message_index, 1);
    assert!(feedback[0].token_count.unwrap() > 0);
    assert!(feedback[0].rating.is_none());

    // the question itself is now recallable
    assert_eq!(fixture.store.embedding_count(), 1);
}

#[tokio::test]
async fn test_conversation_is_resolved_to_latest() {
    let fixture = fixture();
    let first = ask(&fixture, "Which museums open on Monday?").await;
    let second = ask(&fixture, "Which parks have playgrounds nearby?").await;
    assert_eq!(first.conversation_id, second.conversation_id);

    let mut other = request("Which libraries open late tonight?");
    other.conversation_id = Some(Uuid::new_v4());
    let fresh = match fixture.chat.handle(other.clone()).await.unwrap() {
        ChatResponse::Answer(a) => a,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(Some(fresh.conversation_id), other.conversation_id);

    let latest = ask(&fixture, "Which cafes serve breakfast all day?").await;
    assert_eq!(latest.conversation_id, fresh.conversation_id);
}

#[tokio::test]
async fn test_recall_brings_messages_from_other_chats() {
    let fixture = fixture();
    fixture
        .store
        .append_message(&NewChatMessage {
            sender_id: USER,
            sender_is_bot: false,
            destination: ContextType::Group,
            destination_id: 77,
            content: "My dog is named Pixel".to_string(),
        })
        .await
        .unwrap();

    ask(&fixture, "What is my dog named?").await;

    let (prompt, _) = fixture.llm.calls().pop().unwrap();
    assert!(prompt[0]
        .content
        .contains("User (in a group chat): My dog is named Pixel"));
}

#[tokio::test]
async fn test_follow_up_is_rewritten_before_retrieval() {
    let fixture = fixture();
    fixture.llm.reply("The library opens at nine.");
    ask(&fixture, "When does the city library open on weekdays?").await;

    fixture.llm.reply("When does the city library open on Sundays?");
    fixture.llm.reply("At noon.");
    let answer = ask(&fixture, "and on sundays?").await;
    assert_eq!(answer.answer, "At noon.");

    let calls = fixture.llm.calls();
    assert_eq!(calls.len(), 3);
    let (condense, condense_options) = &calls[1];
    assert!(condense[0].content.contains("Follow-up question: and on sundays?"));
    assert_eq!(condense_options.max_tokens, 64);
    let (final_prompt, _) = &calls[2];
    assert!(final_prompt[0]
        .content
        .contains("Question: When does the city library open on Sundays?"));
}

#[tokio::test]
async fn test_initializing_turn_only_stores_greeting() {
    let fixture = fixture();
    fixture.llm.reply("Hi! Ask me anything about the city.");
    let answer = fixture
        .orchestrator
        .process_turn(TurnRequest {
            bot_id: BOT,
            user_id: USER,
            query: String::new(),
            conversation_id: None,
            is_initializing: true,
        })
        .await
        .unwrap();

    assert!(answer.sources.is_empty());
    let messages = fixture.store.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].sender_is_bot);

    let context = fixture.store.conversation(answer.conversation_id).unwrap();
    assert_eq!(context.messages.len(), 1);
    assert_eq!(context.messages[0].role, MessageRole::Assistant);
}

#[tokio::test]
async fn test_empty_message_is_invalid() {
    let fixture = fixture();
    let err = fixture.chat.handle(request("   ")).await.unwrap_err();
    assert!(matches!(err, TurnError::Invalid(_)));
    assert!(fixture.store.messages().is_empty());
}

#[tokio::test]
async fn test_clear_conversation_keeps_id() {
    let fixture = fixture();
    let answer = ask(&fixture, "Where can I rent a bicycle?").await;

    let cleared = fixture
        .orchestrator
        .clear_conversation(BOT, USER, Some(answer.conversation_id))
        .await
        .unwrap();
    assert_eq!(cleared, answer.conversation_id);
    assert!(fixture.store.conversation(cleared).unwrap().is_empty());
}
