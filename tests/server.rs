mod common;

use std::sync::Arc;

use common::*;
use course_harness::index::RetrievalIndex;
use course_harness::models::ExtractedDocument;
use course_harness::query::QueryEngine;
use course_harness::server::router;
use serde_json::{json, Value};

async fn spawn_server() -> String {
    let docs = vec![ExtractedDocument::new(
        "Geology/Week 1/syllabus.pdf",
        "Midterm exam on October 3 in room 101.",
    )];
    let index = RetrievalIndex::build("s3-rag-index", &docs, &HashEmbedder, 64, 4)
        .await
        .unwrap();
    let engine = QueryEngine::new(
        index,
        Box::new(HashEmbedder),
        Box::new(ScriptedChat::new("{}")),
        8,
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(Arc::new(engine))).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn answer_endpoint_returns_answer() {
    let base = spawn_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/answer", base))
        .json(&json!({
            "question": "When is the midterm?",
            "history": [{ "question": "Hi", "answer": "Hello" }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["answer"], "The midterm is on October 3.");
}

#[tokio::test]
async fn history_is_optional() {
    let base = spawn_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/answer", base))
        .json(&json!({ "question": "When is the midterm?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn empty_question_is_a_bad_request() {
    let base = spawn_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/answer", base))
        .json(&json!({ "question": "   ", "history": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn health_reports_index() {
    let base = spawn_server().await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["index"], "s3-rag-index");
    assert_eq!(body["passages"], 1);
}
