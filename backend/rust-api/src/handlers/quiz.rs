use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use mongodb::bson::oid::ObjectId;
use std::sync::Arc;
use validator::Validate;

use crate::{
    models::{
        attempt::{
            AttemptView, GetQuizRequest, GetQuizResponse, SaveProgressRequest,
            SaveProgressResponse, SubmitAttemptRequest, SubmitAttemptResponse,
        },
        question::QuestionView,
    },
    services::{
        assembly_service::{AssemblyService, TopicBucket},
        attempt_service::{AttemptError, AttemptService},
        AppState,
    },
};

fn attempt_service(state: &AppState) -> AttemptService {
    AttemptService::new(
        state.mongo.clone(),
        AssemblyService::new(state.mongo.clone(), state.supplier.clone()),
    )
}

fn parse_object_id(value: &str, field: &str) -> Result<ObjectId, (StatusCode, String)> {
    ObjectId::parse_str(value)
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("Invalid {}", field)))
}

fn map_attempt_error(e: AttemptError) -> (StatusCode, String) {
    match e {
        AttemptError::NotFound => (StatusCode::NOT_FOUND, "Quiz attempt not found".to_string()),
        AttemptError::AlreadySubmitted => (
            StatusCode::FORBIDDEN,
            "Attempt already submitted".to_string(),
        ),
        AttemptError::MalformedAnswers => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "Answer payload references a question outside this attempt".to_string(),
        ),
        AttemptError::Storage(e) => {
            tracing::error!("Attempt storage failure: {:#}", e);
            let msg = e.to_string();
            if msg.contains("Session not found") {
                (StatusCode::NOT_FOUND, "Session not found".to_string())
            } else {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        }
    }
}

pub async fn get_quiz(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GetQuizRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let user_id = parse_object_id(&req.user_id, "user id")?;
    let session_id = parse_object_id(&req.session_id, "session id")?;

    tracing::info!(
        "Quiz requested: user={}, session={}, weak_topics={}",
        req.user_id,
        req.session_id,
        req.weak_topics.len()
    );

    let topics: Vec<TopicBucket> = req
        .weak_topics
        .iter()
        .map(|topic| TopicBucket {
            name: topic.title.clone(),
            target_count: topic.target_count,
        })
        .collect();

    let service = attempt_service(&state);
    let (attempt, questions, read_only) = service
        .get_or_create(&user_id, &session_id, &topics)
        .await
        .map_err(map_attempt_error)?;

    Ok((
        StatusCode::OK,
        Json(GetQuizResponse {
            attempt: AttemptView::from_doc(&attempt),
            questions: questions.iter().map(QuestionView::from_doc).collect(),
            read_only,
        }),
    ))
}

pub async fn save_progress(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SaveProgressRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let attempt_id = parse_object_id(&req.attempt_id, "attempt id")?;

    let service = attempt_service(&state);
    service
        .save_progress(
            &attempt_id,
            &req.answers,
            req.current_index,
            &req.time_left,
            req.time_taken,
        )
        .await
        .map_err(map_attempt_error)?;

    Ok((
        StatusCode::OK,
        Json(SaveProgressResponse {
            message: "Progress saved successfully".to_string(),
        }),
    ))
}

pub async fn submit_attempt(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitAttemptRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let attempt_id = parse_object_id(&req.attempt_id, "attempt id")?;

    let service = attempt_service(&state);
    let score = service
        .submit(&attempt_id, &req.answers, req.score, req.time_taken)
        .await
        .map_err(map_attempt_error)?;

    Ok((
        StatusCode::OK,
        Json(SubmitAttemptResponse {
            message: "Quiz submitted successfully".to_string(),
            score,
        }),
    ))
}
