use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
};
use serde::Deserialize;
use supervisor::SupervisorError;

use crate::error::ControllerError;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct SynthesizeReq {
    pub text: String,
    pub model_id: Option<String>,
    #[serde(alias = "speaker_name")]
    pub speaker_id: Option<String>,
    pub language_id: Option<String>,
}

pub async fn post_synthesize(
    State(st): State<SharedState>,
    Query(req): Query<SynthesizeReq>,
) -> Result<impl IntoResponse, ControllerError> {
    let audio = st
        .registry
        .synthesize(
            &req.text,
            req.model_id.as_deref(),
            req.speaker_id.as_deref(),
            req.language_id.as_deref(),
        )
        .await?
        .filter(|a| !a.is_empty())
        .ok_or(SupervisorError::SynthesisFailure)?;

    Ok((
        [
            (header::CONTENT_TYPE, "audio/wav"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=synthesized.wav",
            ),
        ],
        audio,
    ))
}
